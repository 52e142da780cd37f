//! Filter conditions (`logFilter` / `labelFilter`).
//!
//! Each condition evaluates to a boolean; `false` drops the event.

use logship_core::apis::{Filter, FilterOperator};
use serde_json::Value;

use crate::path::render_path;
use crate::RenderError;

/// Prefix `^` and suffix `$` unless already present.
pub fn anchor(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        out.push('^');
    }
    out.push_str(pattern);
    if !pattern.ends_with('$') {
        out.push('$');
    }
    out
}

/// VRL raw string literal (`r'...'`).
pub fn raw(pattern: &str) -> String {
    format!("r'{}'", pattern.replace('\'', "\\'"))
}

/// Values are compared as strings; numbers and booleans are stringified.
fn scalar(field: &str, v: &Value) -> Result<String, RenderError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RenderError::NonScalarValue { field: field.to_string(), value: other.to_string() }),
    }
}

fn string_list(field: &str, values: &[Value]) -> Result<String, RenderError> {
    let items = values
        .iter()
        .map(|v| scalar(field, v).map(|s| serde_json::Value::String(s).to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("[{}]", items.join(", ")))
}

fn membership(path: &str, list: &str, negate: bool) -> String {
    let bang = if negate { "!" } else { "" };
    format!(
        r#"if is_boolean({path}) || is_integer({path}) || is_float({path}) {{
  data, err = to_string({path})
  if err != null {{
    false
  }} else {{
    {bang}includes({list}, data)
  }}
}} else if {path} == null {{
  false
}} else {{
  {bang}includes({list}, {path})
}}"#
    )
}

fn matching(path: &str, patterns: &[String], negate: bool) -> String {
    let list = format!("[{}]", patterns.iter().map(|p| raw(p)).collect::<Vec<_>>().join(", "));
    let (bang, absent) = if negate { ("!", "true") } else { ("", "false") };
    format!(
        r#"if is_string({path}) {{
  matched, err = match_any({path}, {list})
  if err != null {{
    true
  }} else {{
    {bang}matched
  }}
}} else {{
  {absent}
}}"#
    )
}

/// Render the condition for one filter. `field` is taken as written; the
/// caller rewrites log-filter fields to `parsed_data.*` beforehand.
pub fn render_filter(filter: &Filter) -> Result<String, RenderError> {
    let path = render_path(&filter.field)?;
    let out = match filter.operator {
        FilterOperator::Exists => format!("exists({path})"),
        FilterOperator::DoesNotExist => format!("!exists({path})"),
        FilterOperator::In => membership(&path, &string_list(&filter.field, &filter.values)?, false),
        FilterOperator::NotIn => membership(&path, &string_list(&filter.field, &filter.values)?, true),
        FilterOperator::Regex | FilterOperator::NotRegex => {
            let patterns = filter
                .values
                .iter()
                .map(|v| scalar(&filter.field, v).map(|s| anchor(&s)))
                .collect::<Result<Vec<_>, _>>()?;
            matching(&path, &patterns, filter.operator == FilterOperator::NotRegex)
        }
    };
    Ok(out)
}

//! log-shipper VRL rule library.
//!
//! Every rule renders to a trimmed VRL (or Lua, for `dedot`) program that the
//! transform builders embed verbatim. Rules are stateless; only the ones taking
//! runtime parameters can fail.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

pub mod filter;
pub mod multiline;
pub mod path;

pub use filter::{anchor, render_filter};
pub use multiline::{Boundary, MultilineRule};
pub use path::{field_segment, quote, render_path};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("filter on {field:?}: value {value} is not a scalar")]
    NonScalarValue { field: String, value: String },
    #[error("invalid field path {0:?}")]
    InvalidPath(String),
}

/// Drops collector bookkeeping fields and lifts the node group out of `node_labels`.
pub const CLEAN_UP: &str = r#"if exists(.pod_labels."controller-revision-hash") {
  del(.pod_labels."controller-revision-hash")
}
if exists(.pod_labels."pod-template-hash") {
  del(.pod_labels."pod-template-hash")
}
if exists(.kubernetes) {
  del(.kubernetes)
}
if exists(.file) {
  del(.file)
}
if exists(.node_labels."node.deckhouse.io/group") {
  .node_group = (.node_labels."node.deckhouse.io/group")
}
del(.node_labels)"#;

pub const PARSE_JSON: &str = r#"structured, err = parse_json(.message)
if err == null {
  .parsed_data = structured
}"#;

/// Lua (hooks v2): replace `.` with `_` in `pod_labels` keys. Events are always re-emitted.
pub const DEDOT: &str = r#"function process(event, emit)
  if event.log.pod_labels ~= nil then
    dedot(event.log.pod_labels)
  end
  emit(event)
end

function dedot(map)
  local renamed = {}
  for k, v in pairs(map) do
    local dedotted = string.gsub(k, "%.", "_")
    if dedotted ~= k then
      renamed[k] = dedotted
    end
  end
  for from, to in pairs(renamed) do
    map[to] = map[from]
    map[from] = nil
  end
end"#;

pub const DATA_STREAM_TIMESTAMP: &str = r#"."@timestamp" = del(.timestamp)"#;

pub const DEL_PARSED_DATA: &str = r#"if exists(.parsed_data) {
  del(.parsed_data)
}"#;

/// `ReplicaSet/x-<hash>` -> `Deployment/x`, `Job/y-<8..11 digits>` -> `CronJob/y`.
pub const OWNER_REF: &str = r#"if exists(.pod_owner) {
  .pod_owner = string!(.pod_owner)
  if starts_with(.pod_owner, "ReplicaSet/") {
    hash = "-"
    if exists(.pod_labels."pod-template-hash") {
      hash = hash + string!(.pod_labels."pod-template-hash")
    }
    if hash != "-" && ends_with(.pod_owner, hash) {
      .pod_owner = replace(.pod_owner, "ReplicaSet/", "Deployment/")
      .pod_owner = replace(.pod_owner, hash, "")
    }
  }
  if starts_with(.pod_owner, "Job/") {
    if match(.pod_owner, r'-[0-9]{8,11}$') {
      .pod_owner = replace(.pod_owner, "Job/", "CronJob/")
      .pod_owner = replace(.pod_owner, r'-[0-9]{8,11}$', "")
    }
  }
}"#;

pub const LOCAL_TIMEZONE: &str = r#"if exists(.timestamp) {
  ts = parse_timestamp!(.timestamp, format: "%+")
  .timestamp = format_timestamp!(ts, format: "%+", timezone: "local")
}
if exists(.timestamp_end) {
  ts = parse_timestamp!(.timestamp_end, format: "%+")
  .timestamp_end = format_timestamp!(ts, format: "%+", timezone: "local")
}"#;

pub const DATETIME: &str = r#"if exists(.timestamp) {
  .datetime = format_timestamp(.timestamp, format: "%+") ?? to_string(.timestamp) ?? ""
}"#;

pub const HOST_IP: &str = r#".host_ip = "$VECTOR_HOST_IP""#;

/// Templates of the form `{{ path }}`.
static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\s*([^\s{}]+)\s*\}\}$").expect("static template regex"));

/// The path inside a `{{ path }}` label template, if `value` is one.
pub fn template_path(value: &str) -> Option<&str> {
    TEMPLATE.captures(value).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// `path` relative to `.parsed_data`; a leading `parsed_data` is accepted.
fn parsed_data_path(path: &str) -> Result<String, RenderError> {
    if path == "parsed_data" {
        return Ok(".parsed_data".to_string());
    }
    let rel = path.strip_prefix("parsed_data.").unwrap_or(path);
    render_path(&format!("parsed_data.{rel}"))
}

/// Assign every extra label onto the event, in key order. Templated values
/// copy from `parsed_data` when the referenced field exists.
pub fn extra_fields(labels: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let mut out = Vec::with_capacity(labels.len());
    for (key, value) in labels {
        let target = format!(".{}", field_segment(key));
        match template_path(value) {
            Some(p) => {
                let src = parsed_data_path(p)?;
                out.push(format!("if exists({src}) {{\n  {target} = {src}\n}}"));
            }
            None => out.push(format!("{target} = {}", quote(value))),
        }
    }
    Ok(out.join("\n"))
}

const SYSLOG_SD_ID: &str = "logship@32473";

/// `=` and spaces would split the param, so they are dropped; quotes are escaped.
fn sd_name(s: &str) -> String {
    let kept: String = s.chars().filter(|c| !matches!(c, '=' | ' ')).collect();
    sd_value(&kept)
}

fn sd_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// RFC 5424 framing into `.message`. Events without a usable timestamp are
/// logged and aborted (the transform drops aborted events).
pub fn syslog_encoding(labels: &BTreeMap<String, String>) -> String {
    let sd = if labels.is_empty() {
        "-".to_string()
    } else {
        let params = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", sd_name(k), sd_value(v)))
            .collect::<Vec<_>>()
            .join(" ");
        format!("[{SYSLOG_SD_ID} {params}]")
    };
    let tail = quote(&format!(" {sd} \u{feff}"));
    format!(
        r#"if !is_string(.message) {{
  .message = encode_json(.message)
}}
severity = "info"
if exists(.severity) {{
  severity = downcase(to_string(.severity) ?? "info")
}}
sev, err = to_syslog_severity(severity)
if err != null {{
  sev = 6
}}
ts, err = format_timestamp(.timestamp, format: "%+")
if err != null {{
  log("syslog framing: event has no usable timestamp", level: "error", rate_limit_secs: 10)
  abort
}}
host = to_string(.node) ?? "$VECTOR_SELF_NODE_NAME"
app = to_string(.container) ?? "-"
msgid = to_string(.namespace) ?? "-"
.message = "<" + to_string(8 + sev) + ">1 " + ts + " " + host + " " + app + " - " + msgid + {tail} + string!(.message)"#
    )
}

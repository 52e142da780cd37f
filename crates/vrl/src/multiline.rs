//! Boundary conditions for the multiline reducer.

use logship_core::apis::MultilineParserType;

use crate::filter::raw;

/// Which `reduce` option the condition goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    StartsWhen,
    EndsWhen,
}

impl Boundary {
    pub fn key(self) -> &'static str {
        match self {
            Boundary::StartsWhen => "starts_when",
            Boundary::EndsWhen => "ends_when",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultilineRule {
    pub boundary: Boundary,
    pub condition: String,
}

/// Line begins with something other than whitespace.
pub const GENERAL_START: &str = r"^[^\s\t]";
/// Line does not end with a backslash.
pub const BACKSLASH_END: &str = r"[^\\]$";
pub const JSON_START: &str = r"^\{";
/// ISO-8601 / RFC 3339, syslog (`Jan  2 15:04:05`), common log (`02/Jan/2006:15:04:05`)
/// and klog (`I0102 15:04:05`) prefixes, optionally bracketed.
pub const TIMESTAMP_START: &str = r"^\[?((\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2})|([A-Z][a-z]{2}\s+\d{1,2}\s\d{2}:\d{2}:\d{2})|(\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2})|([IWEF]\d{4}\s\d{2}:\d{2}:\d{2}))";

fn condition(pattern: &str, negate: bool) -> String {
    let bang = if negate { "!" } else { "" };
    format!(
        r#"matched, err = match(.message, {})
if err != null {{
  false
}} else {{
  {bang}matched
}}"#,
        raw(pattern)
    )
}

/// Rule for a built-in parser; `None` and `Custom` have no built-in rule.
pub fn builtin(kind: MultilineParserType) -> Option<MultilineRule> {
    let (boundary, pattern) = match kind {
        MultilineParserType::General => (Boundary::StartsWhen, GENERAL_START),
        MultilineParserType::LogWithTime => (Boundary::StartsWhen, TIMESTAMP_START),
        MultilineParserType::MultilineJson => (Boundary::StartsWhen, JSON_START),
        MultilineParserType::Backslash => (Boundary::EndsWhen, BACKSLASH_END),
        MultilineParserType::None | MultilineParserType::Custom => return None,
    };
    Some(MultilineRule { boundary, condition: condition(pattern, false) })
}

/// User supplied boundary: `negate` selects `notRegex` semantics.
pub fn custom(boundary: Boundary, pattern: &str, negate: bool) -> MultilineRule {
    MultilineRule { boundary, condition: condition(pattern, negate) }
}

//! Field path rendering.
//!
//! User-facing paths are dotted (`parsed_data.app.kubernetes\.io/name`,
//! `items[0].name`). VRL wants each segment either bare or quoted, with
//! array indices in brackets: `.parsed_data.app."kubernetes.io/name"`.

use crate::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(u64),
}

fn parse(path: &str) -> Result<Vec<Segment>, RenderError> {
    let bad = || RenderError::InvalidPath(path.to_string());
    let mut out = Vec::new();
    let mut cur = String::new();
    // true when the current field was already closed by an index (`a[0]`)
    let mut closed = false;
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                if closed { return Err(bad()); }
                cur.push('.');
            }
            '.' => {
                if !closed {
                    if cur.is_empty() { return Err(bad()); }
                    out.push(Segment::Field(std::mem::take(&mut cur)));
                }
                closed = false;
            }
            '[' => {
                if !closed {
                    if cur.is_empty() { return Err(bad()); }
                    out.push(Segment::Field(std::mem::take(&mut cur)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(bad()),
                    }
                }
                let idx = digits.parse::<u64>().map_err(|_| bad())?;
                out.push(Segment::Index(idx));
                closed = true;
            }
            other => {
                if closed { return Err(bad()); }
                cur.push(other);
            }
        }
    }
    if !closed {
        if cur.is_empty() { return Err(bad()); }
        out.push(Segment::Field(cur));
    }
    Ok(out)
}

/// Render a single field name, quoting it when VRL would not accept it bare.
pub fn field_segment(name: &str) -> String {
    let bare = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if bare {
        name.to_string()
    } else {
        quote(name)
    }
}

/// VRL double-quoted string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a dotted user path as a VRL event path (leading `.`).
pub fn render_path(path: &str) -> Result<String, RenderError> {
    let mut out = String::new();
    for seg in parse(path)? {
        match seg {
            Segment::Field(f) => {
                out.push('.');
                out.push_str(&field_segment(&f));
            }
            Segment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    Ok(out)
}

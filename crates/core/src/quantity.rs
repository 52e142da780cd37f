//! Parsers for the two string-encoded scalars the CRDs carry:
//! Kubernetes resource quantities and durations.

use std::time::Duration;

use crate::ParseError;

const BINARY: [(&str, u64); 6] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

const DECIMAL: [(&str, u64); 7] = [
    ("", 1),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Resolve a quantity such as `1Gi`, `100M` or `1.5Ki` into bytes (rounded up).
pub fn parse_quantity(raw: &str) -> Result<u64, ParseError> {
    let s = raw.trim();
    let err = || ParseError::Quantity(raw.to_string());
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if number.is_empty() {
        return Err(err());
    }
    let mult = BINARY
        .iter()
        .chain(DECIMAL.iter())
        .find(|(sfx, _)| *sfx == suffix)
        .map(|(_, m)| *m)
        .ok_or_else(err)?;

    if number.contains('.') {
        let f: f64 = number.parse().map_err(|_| err())?;
        let bytes = (f * mult as f64).ceil();
        if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
            return Err(err());
        }
        return Ok(bytes as u64);
    }
    let n: u64 = number.parse().map_err(|_| err())?;
    n.checked_mul(mult).ok_or_else(err)
}

/// Parse a duration such as `10s`, `1h30m` or `250ms`. A bare `0` is
/// accepted as Go does; fractional terms (`1.5h`) are not.
pub fn parse_duration(raw: &str) -> Result<Duration, ParseError> {
    match raw.trim() {
        "0" => Ok(Duration::ZERO),
        s => humantime::parse_duration(s).map_err(|_| ParseError::Duration(raw.to_string())),
    }
}

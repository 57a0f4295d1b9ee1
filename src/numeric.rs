//! Locale-tolerant amount parsing for values read off receipts.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericFormatError {
    #[error("value is not a finite number")]
    NonFinite,

    #[error("could not read a number from {0:?}")]
    Unparseable(String),
}

/// An amount as it arrives from model output: already numeric, or text to be cleaned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawAmount<'a> {
    Number(f64),
    Text(&'a str),
}

impl From<f64> for RawAmount<'_> {
    fn from(n: f64) -> Self {
        RawAmount::Number(n)
    }
}

impl<'a> From<&'a str> for RawAmount<'a> {
    fn from(s: &'a str) -> Self {
        RawAmount::Text(s)
    }
}

/// Parse an amount written in either European ("1.234,56") or US ("1,234.56") style.
///
/// When both separators appear, whichever comes last is the decimal point. A lone comma
/// is a decimal comma. Currency symbols and other noise are dropped.
pub fn normalize<'a>(input: impl Into<RawAmount<'a>>) -> Result<f64, NumericFormatError> {
    match input.into() {
        RawAmount::Number(n) => finite(n),
        RawAmount::Text(s) => normalize_text(s),
    }
}

fn finite(n: f64) -> Result<f64, NumericFormatError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(NumericFormatError::NonFinite)
    }
}

fn normalize_text(input: &str) -> Result<f64, NumericFormatError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();

    let with_decimal_point = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        _ => compact,
    };

    let cleaned: String = with_decimal_point
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let cleaned = keep_last_dot(&cleaned);

    let n: f64 = cleaned
        .parse()
        .map_err(|_| NumericFormatError::Unparseable(input.to_string()))?;
    finite(n)
}

/// Drop every '.' except the last one.
fn keep_last_dot(s: &str) -> String {
    match s.rfind('.') {
        Some(last) if s[..last].contains('.') => {
            let mut out: String = s[..last].chars().filter(|c| *c != '.').collect();
            out.push_str(&s[last..]);
            out
        }
        _ => s.to_string(),
    }
}

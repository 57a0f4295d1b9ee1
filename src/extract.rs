//! Recover the JSON object from a vision model's text response.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Model returned empty output")]
    EmptyOutput,

    #[error("Could not locate a JSON object in model output")]
    NoJsonObject,

    #[error("Model output contained malformed JSON: {0}")]
    InvalidJson(String),
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?i)```(?:json)?").expect("fence pattern is valid"))
}

/// Parse the model response as JSON, falling back to the outermost `{ ... }` once code
/// fences are stripped. The fallback never balances braces; serde_json decides whether
/// the slice is valid.
pub fn extract_json(text: &str) -> Result<Value, ExtractionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::EmptyOutput);
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = code_fence().replace_all(trimmed, "");
    let unfenced = unfenced.trim();

    let (first, last) = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(first), Some(last)) if last > first => (first, last),
        _ => return Err(ExtractionError::NoJsonObject),
    };
    tracing::debug!(start = first, end = last, "Falling back to sliced JSON candidate");

    serde_json::from_str(&unfenced[first..=last])
        .map_err(|e| ExtractionError::InvalidJson(e.to_string()))
}

/// Look up a dotted path such as `merchant.name` or `line_items[0].description` in an
/// unvalidated tree. Validated records use typed fields instead.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indices) = match segment.find('[') {
            Some(open) => (&segment[..open], &segment[open..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indices
            .split(|c| c == '[' || c == ']')
            .filter(|s| !s.is_empty())
        {
            current = current.get(index.parse::<usize>().ok()?)?;
        }
    }
    Some(current)
}

use once_cell::sync::Lazy;
use regex::Regex;

/// First fenced block opened with a Python tag: ```python, ```python3 or ```py
static PYTHON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*(?:python3?|py)\b[^\n]*\n?(.*?)```")
        .expect("fence pattern is valid")
});

/// Pull the executable snippet out of free-form model output.
///
/// Returns the trimmed body of the first Python-tagged fenced block, or the
/// whole input trimmed when there is none. Never fails.
pub fn extract_code(text: &str) -> String {
    match PYTHON_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

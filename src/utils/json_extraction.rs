//! JSON extraction for agent responses.
//!
//! Models rarely return a bare JSON object: they wrap it in markdown fences,
//! prefix it with reasoning, or run out of tokens halfway through. This module
//! finds the response object in free-form text and reports *why* it could not
//! when it can't, so the repair loop can tell the model what went wrong.
//!
//! Strategies, in order:
//! 1. A ```json fenced block (or any fenced block holding an object)
//! 2. The whole trimmed content, when it starts with `{`
//! 3. The largest balanced object anywhere, preferring later ones
//!
//! # Example
//!
//! ```
//! use hack_judge::utils::json_extraction::{extract_json_object, JsonExtraction};
//!
//! let raw = "Here is my review:\n```json\n{\"summary\": \"ok\"}\n```";
//! match extract_json_object(raw) {
//!     JsonExtraction::Object(value) => assert_eq!(value["summary"], "ok"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Outcome of looking for a JSON object in model output.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// A syntactically valid JSON object.
    Object(Map<String, Value>),
    /// Valid JSON was found but it is not an object (array, string, ...).
    NotAnObject(Value),
    /// An object was started but never closed.
    Truncated {
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    /// Something brace-shaped was found but it does not parse.
    Malformed(String),
    /// No JSON-like content at all.
    NotFound,
}

impl JsonExtraction {
    /// Human-readable reason for a failed extraction, suitable for a
    /// repair instruction. `None` for [`JsonExtraction::Object`].
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            JsonExtraction::Object(_) => None,
            JsonExtraction::NotAnObject(value) => Some(format!(
                "the response must be a single JSON object, got a JSON {}",
                json_kind(value)
            )),
            JsonExtraction::Truncated {
                unclosed_braces,
                unclosed_brackets,
            } => Some(format!(
                "the JSON object is truncated ({} unclosed braces, {} unclosed brackets); keep the response shorter",
                unclosed_braces, unclosed_brackets
            )),
            JsonExtraction::Malformed(err) => Some(format!("the JSON is not valid: {}", err)),
            JsonExtraction::NotFound => {
                Some("no JSON object was found in the response".to_string())
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extract the response object from raw model output.
pub fn extract_json_object(content: &str) -> JsonExtraction {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return JsonExtraction::NotFound;
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return classify(value);
        }
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => return classify(value),
            Err(err) => {
                if let Some(truncated) = truncation(trimmed) {
                    return truncated;
                }
                // Trailing chatter after a complete object is handled below.
                if find_matching_brace(trimmed).is_none() {
                    return JsonExtraction::Malformed(err.to_string());
                }
            }
        }
    }

    if let Some(object) = largest_object(trimmed) {
        return JsonExtraction::Object(object);
    }

    match trimmed.find('{') {
        Some(start) => truncation(&trimmed[start..]).unwrap_or_else(|| {
            let candidate = match find_matching_brace(&trimmed[start..]) {
                Some(end) => &trimmed[start..=start + end],
                None => &trimmed[start..],
            };
            let err = serde_json::from_str::<Value>(candidate)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unparseable object".to_string());
            JsonExtraction::Malformed(err)
        }),
        None => JsonExtraction::NotFound,
    }
}

fn classify(value: Value) -> JsonExtraction {
    match value {
        Value::Object(map) => JsonExtraction::Object(map),
        other => JsonExtraction::NotAnObject(other),
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("fence regex is valid")
    })
}

/// Body of the first fenced code block that looks like JSON.
fn fenced_block(content: &str) -> Option<&str> {
    fence_regex()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| body.starts_with('{') || body.starts_with('['))
}

/// Report truncation if `s` opens more braces/brackets than it closes.
fn truncation(s: &str) -> Option<JsonExtraction> {
    let mut braces: isize = 0;
    let mut brackets: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces -= 1,
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets -= 1,
            _ => {}
        }
    }

    if braces > 0 || brackets > 0 || in_string {
        Some(JsonExtraction::Truncated {
            unclosed_braces: braces.max(0) as usize,
            unclosed_brackets: brackets.max(0) as usize,
        })
    } else {
        None
    }
}

/// Index of the `}` closing the object that starts at `s[0]`.
///
/// Handles nesting, string literals and escape sequences.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Largest parseable object in `content`; later wins on equal size.
///
/// Reasoning models often quote small example objects before the real
/// answer, which is both larger and last.
fn largest_object(content: &str) -> Option<Map<String, Value>> {
    content
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&content[start..])?;
            let candidate = &content[start..=start + end];
            match serde_json::from_str::<Value>(candidate) {
                Ok(Value::Object(map)) => Some((start, candidate.len(), map)),
                _ => None,
            }
        })
        .max_by(|(pos_a, len_a, _), (pos_b, len_b, _)| len_a.cmp(len_b).then(pos_a.cmp(pos_b)))
        .map(|(_, _, map)| map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(content: &str) -> Map<String, Value> {
        match extract_json_object(content) {
            JsonExtraction::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_object() {
        let map = object(r#"{"summary": "fine", "scores": {}}"#);
        assert_eq!(map["summary"], "fine");
    }

    #[test]
    fn test_json_code_fence() {
        let map = object("Analysis done.\n\n```json\n{\"summary\": \"fenced\"}\n```\nThanks!");
        assert_eq!(map["summary"], "fenced");
    }

    #[test]
    fn test_generic_code_fence() {
        let map = object("```\n{\"summary\": \"generic\"}\n```");
        assert_eq!(map["summary"], "generic");
    }

    #[test]
    fn test_prefers_largest_object_after_reasoning() {
        let content = r#"I will answer in the form {"a": 1}. Final answer:
{"summary": "real answer", "scores": {"novelty": 80}}"#;
        let map = object(content);
        assert_eq!(map["summary"], "real answer");
    }

    #[test]
    fn test_trailing_text_after_object() {
        let map = object("{\"summary\": \"x\"}\nLet me know if you need more.");
        assert_eq!(map["summary"], "x");
    }

    #[test]
    fn test_braces_inside_strings() {
        let map = object(r#"{"summary": "uses {curly} braces and \"quotes\""}"#);
        assert_eq!(map["summary"], r#"uses {curly} braces and "quotes""#);
    }

    #[test]
    fn test_truncated_object() {
        let result = extract_json_object(r#"{"summary": "cut", "evidence": [{"file": "a.rs""#);
        match result {
            JsonExtraction::Truncated {
                unclosed_braces,
                unclosed_brackets,
            } => {
                assert_eq!(unclosed_braces, 2);
                assert_eq!(unclosed_brackets, 1);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_array_is_not_an_object() {
        let result = extract_json_object("[1, 2, 3]");
        assert!(matches!(result, JsonExtraction::NotAnObject(Value::Array(_))));
        assert!(result
            .failure_reason()
            .is_some_and(|r| r.contains("array")));
    }

    #[test]
    fn test_plain_prose_not_found() {
        let result = extract_json_object("I could not review this repository.");
        assert_eq!(result, JsonExtraction::NotFound);
        assert!(result.failure_reason().is_some());
    }

    #[test]
    fn test_malformed_object() {
        let result = extract_json_object("{summary: unquoted}");
        assert!(matches!(result, JsonExtraction::Malformed(_)));
    }

    #[test]
    fn test_find_matching_brace_nested() {
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}} tail"#), Some(14));
        assert_eq!(find_matching_brace(r#"{"a": 1"#), None);
    }
}

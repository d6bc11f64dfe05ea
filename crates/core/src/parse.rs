//! Lenient JSON extraction for LLM output.
//!
//! Every agent feeds raw model text through [`extract_json`] /
//! [`parse_lenient`] rather than `serde_json::from_str` directly, because a
//! model may wrap JSON in a fenced code block, prepend a reasoning preamble,
//! or emit a trailing comma. None of that should ever surface as an error to
//! the caller — a malformed response becomes a typed default instead.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn fence_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fence regex")
    })
}

/// Pulls a JSON object substring out of raw LLM text: first a fenced
/// ` ```json ` block, falling back to the span from the first `{` to the
/// last `}`. Returns `None` when neither shape is present.
pub fn extract_json(content: &str) -> Option<&str> {
    if let Some(caps) = fence_pattern().captures(content) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if start >= end {
        return None;
    }
    Some(&content[start..=end])
}

/// Removes trailing commas immediately before a closing `}` or `]`, the one
/// malformation models produce often enough to warrant a dedicated retry.
fn strip_trailing_commas(json: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("valid trailing-comma regex"));
    re.replace_all(json, "$1").into_owned()
}

/// Parses lenient LLM JSON output into `T`, falling back to `default()` on
/// any failure: no JSON object found, strict parse failure, and (after one
/// trailing-comma-stripping retry) final parse failure. Never panics, never
/// propagates an error — this is the one load-bearing contract every agent
/// depends on to stay exception-free in the face of bad model output.
pub fn parse_lenient<T, F>(content: &str, default: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let Some(candidate) = extract_json(content) else {
        return default();
    };
    if let Ok(value) = serde_json::from_str(candidate) {
        return value;
    }
    let repaired = strip_trailing_commas(candidate);
    serde_json::from_str(&repaired).unwrap_or_else(|_| default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Plan {
        #[serde(default)]
        queries: Vec<String>,
    }

    fn default_plan() -> Plan {
        Plan { queries: vec![] }
    }

    #[test]
    fn extracts_fenced_json_block() {
        let content = "Here you go:\n```json\n{\"queries\": [\"a\", \"b\"]}\n```\nThanks";
        let plan: Plan = parse_lenient(content, default_plan);
        assert_eq!(plan.queries, vec!["a", "b"]);
    }

    #[test]
    fn extracts_bare_braces_without_fence() {
        let content = "thinking... {\"queries\": [\"x\"]} trailing text";
        let plan: Plan = parse_lenient(content, default_plan);
        assert_eq!(plan.queries, vec!["x"]);
    }

    #[test]
    fn recovers_from_trailing_comma() {
        let content = "{\"queries\": [\"a\", \"b\",],}";
        let plan: Plan = parse_lenient(content, default_plan);
        assert_eq!(plan.queries, vec!["a", "b"]);
    }

    #[test]
    fn falls_back_to_default_with_no_json() {
        let plan: Plan = parse_lenient("no json here at all", default_plan);
        assert_eq!(plan, default_plan());
    }

    #[test]
    fn falls_back_to_default_on_unrecoverable_malformed_json() {
        let plan: Plan = parse_lenient("{\"queries\": [\"a\" \"b\"]}", default_plan);
        assert_eq!(plan, default_plan());
    }
}

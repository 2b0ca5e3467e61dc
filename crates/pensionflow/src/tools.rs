//! The tool seam and the input-coercion helpers every tool shares.
//!
//! Specialist reasoners emit tool arguments as free text: a JSON object, a
//! bare integer, or a stringified object with `user_id`/`query` fields.
//! Coercion is centralized here so individual tools stay dumb about the
//! shapes models actually produce.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::Result;

/// A callable unit exposed to specialist reasoners.
///
/// Tools are side-effect free with respect to the stores they read and
/// always return a JSON document as a string; errors a user should see live
/// under an `"error"` key rather than in `Err`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name, as referenced in `Action:` lines.
    fn name(&self) -> &str;

    /// One-paragraph description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn args_schema(&self) -> Value;

    /// Executes the tool. The returned string is a JSON document.
    async fn call(&self, input: ToolInput) -> Result<String>;
}

/// The union of argument shapes a model may produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    /// Raw text, e.g. `520` or `risk profile for user 202`.
    String(String),
    /// A parsed JSON object, e.g. `{"user_id": 520, "query": "..."}`.
    Structured(Value),
}

impl ToolInput {
    /// Interprets a raw `Action Input:` line: brace-delimited text that
    /// parses as JSON becomes [`ToolInput::Structured`], everything else
    /// stays [`ToolInput::String`].
    pub fn from_action_input(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return Self::Structured(value);
            }
        }
        Self::String(trimmed.to_string())
    }

    /// The effective user id, if one can be coerced out of the input.
    ///
    /// Structured inputs are checked for a `user_id` field (number or
    /// digit-bearing string); plain strings yield their first digit run.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::String(s) => extract_integer(s),
            Self::Structured(v) => match v.get("user_id") {
                Some(Value::Number(n)) => n.as_i64(),
                Some(Value::String(s)) => extract_integer(s),
                _ => None,
            },
        }
    }

    /// The effective query text, if any.
    ///
    /// A structured input's `query` field may itself be a stringified object
    /// (models double-wrap); that one extra layer is unwrapped here.
    pub fn query(&self) -> Option<String> {
        match self {
            Self::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(unwrap_embedded_query(s))
                }
            }
            Self::Structured(v) => match v.get("query") {
                Some(Value::String(s)) => Some(unwrap_embedded_query(s)),
                Some(other) if !other.is_null() => Some(other.to_string()),
                _ => None,
            },
        }
    }
}

fn digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("digits pattern is valid"))
}

/// First run of digits in `text`, as an integer.
pub fn extract_integer(text: &str) -> Option<i64> {
    digits_regex().find(text)?.as_str().parse().ok()
}

/// If `text` is a brace-delimited object carrying a `query` field, returns
/// that field; otherwise returns `text` unchanged.
fn unwrap_embedded_query(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(Value::String(query)) = map.get("query") {
                return query.clone();
            }
        }
    }
    trimmed.to_string()
}

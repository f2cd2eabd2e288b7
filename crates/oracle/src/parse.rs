//! Tolerant parsing of oracle replies.
//!
//! Model output arrives as bare JSON, JSON wrapped in a markdown code fence,
//! or JSON embedded in prose. Anything that does not yield an object with a
//! recognised `decision` word becomes an `ERROR` verdict.

use serde_json::Value;

use crate::{Decision, Verdict};

/// Parse a raw text reply.
pub fn parse_reply_text(text: &str) -> Verdict {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Verdict::error("empty oracle reply");
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return parse_reply_value(&value);
        }
    }

    match embedded_object(trimmed) {
        Some(value) => parse_reply_value(&value),
        None => Verdict::error("oracle reply holds no JSON object"),
    }
}

/// Parse a structured reply. A string value is treated as model text.
pub fn parse_reply_value(value: &Value) -> Verdict {
    match value {
        Value::Object(map) => {
            let Some(word) = map.get("decision").and_then(Value::as_str) else {
                return Verdict::error("oracle reply has no decision");
            };
            let Some(decision) = Decision::from_word(word) else {
                return Verdict::error(format!("unknown oracle decision {:?}", word));
            };
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
            Verdict { decision, reason }
        }
        Value::String(text) => parse_reply_text(text),
        _ => Verdict::error("oracle reply is not an object"),
    }
}

/// First `{` to last `}`; covers code fences and surrounding prose.
fn embedded_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_object() {
        let v = parse_reply_text(r#"{"decision": "APPROVE"}"#);
        assert_eq!(v, Verdict::approve());
    }

    #[test]
    fn test_code_fence() {
        let text = "```json\n{\"decision\": \"reject\", \"reason\": \"account too new\"}\n```";
        assert_eq!(parse_reply_text(text), Verdict::reject("account too new"));
    }

    #[test]
    fn test_embedded_in_prose() {
        let text = "Sure. Here is my answer: {\"decision\":\"Approve\"} Let me know.";
        assert_eq!(parse_reply_text(text).decision, Decision::Approve);
    }

    #[test]
    fn test_junk_is_error() {
        assert!(parse_reply_text("I think this is fine").is_error());
        assert!(parse_reply_text("").is_error());
        assert!(parse_reply_text("} nonsense {").is_error());
        assert!(parse_reply_text("[1, 2]").is_error());
    }

    #[test]
    fn test_schema_mismatch_is_error() {
        assert!(parse_reply_value(&json!({"verdict": "APPROVE"})).is_error());
        assert!(parse_reply_value(&json!({"decision": "ESCALATE"})).is_error());
        assert!(parse_reply_value(&json!({"decision": 1})).is_error());
        assert!(parse_reply_value(&json!(42)).is_error());
    }

    #[test]
    fn test_string_value_is_model_text() {
        let v = parse_reply_value(&json!("```\n{\"decision\":\"REJECT\"}\n```"));
        assert_eq!(v.decision, Decision::Reject);
        assert_eq!(v.reason, None);
    }

    #[test]
    fn test_blank_reason_dropped() {
        let v = parse_reply_value(&json!({"decision": "approve", "reason": "  "}));
        assert_eq!(v, Verdict::approve());
    }
}

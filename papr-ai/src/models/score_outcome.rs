//! Tagged result of one scoring call

use serde_json::Value;

/// What the scoring service returned
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// Reply parsed as JSON
    Parsed(Value),
    /// Reply received but not valid JSON
    Raw(String),
    /// No usable reply (transport failure, empty body)
    Failed(String),
}

impl ScoreOutcome {
    /// Classify a reply body
    pub fn from_reply(reply: Option<&str>) -> Self {
        match reply.map(str::trim) {
            None => ScoreOutcome::Failed("no reply".to_string()),
            Some("") => ScoreOutcome::Failed("empty reply".to_string()),
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => ScoreOutcome::Parsed(value),
                Err(_) => ScoreOutcome::Raw(text.to_string()),
            },
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ScoreOutcome::Parsed(_))
    }

    /// True only for a parsed object whose `field` is boolean true
    pub fn is_positive(&self, field: &str) -> bool {
        match self {
            ScoreOutcome::Parsed(value) => value.get(field).and_then(Value::as_bool).unwrap_or(false),
            _ => false,
        }
    }

    /// Short reason for a non-parsed outcome
    pub fn describe(&self) -> String {
        match self {
            ScoreOutcome::Parsed(_) => "parsed".to_string(),
            ScoreOutcome::Raw(text) => {
                let preview: String = text.chars().take(80).collect();
                format!("unparsable reply: {}", preview)
            }
            ScoreOutcome::Failed(reason) => reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_classification() {
        assert_eq!(ScoreOutcome::from_reply(None), ScoreOutcome::Failed("no reply".into()));
        assert!(matches!(ScoreOutcome::from_reply(Some("   ")), ScoreOutcome::Failed(_)));
        assert!(matches!(ScoreOutcome::from_reply(Some("not json")), ScoreOutcome::Raw(_)));
        assert_eq!(
            ScoreOutcome::from_reply(Some(" {\"pass_filter\": true} ")),
            ScoreOutcome::Parsed(json!({"pass_filter": true}))
        );
    }

    #[test]
    fn test_positive_field_requires_boolean_true() {
        assert!(ScoreOutcome::Parsed(json!({"pass_filter": true})).is_positive("pass_filter"));
        assert!(!ScoreOutcome::Parsed(json!({"pass_filter": "true"})).is_positive("pass_filter"));
        assert!(!ScoreOutcome::Parsed(json!({"score": 9})).is_positive("pass_filter"));
        assert!(!ScoreOutcome::Raw("{\"pass_filter\": true".into()).is_positive("pass_filter"));
    }
}

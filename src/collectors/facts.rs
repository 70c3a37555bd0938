use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FactGatheringError {
    #[error("collector `{collector}` timeout after {after:?}")]
    Timeout { collector: String, after: Duration },
    #[error("unknown collector kind `{0}`")]
    UnknownCollectorKind(String),
    #[error("invalid parameters for collector `{collector}`: {reason}")]
    InvalidParameters { collector: String, reason: String },
    #[error("collector `{collector}` failed: {reason}")]
    Failed { collector: String, reason: String },
    #[error("collector `{collector}` panicked: {reason}")]
    Panicked { collector: String, reason: String },
    #[error("collection cancelled before completion")]
    Cancelled,
}

/// The typed datum a collector observed. `Absent` is a legitimate
/// observation ("the file is not there"), not a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FactValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Lines(Vec<String>),
    Absent,
}

impl FactValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FactValue::Absent)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FactValue::Text(text) => json!(text),
            FactValue::Number(number) => json!(number),
            FactValue::Bool(flag) => json!(flag),
            FactValue::Lines(lines) => json!(lines),
            FactValue::Absent => serde_json::Value::Null,
        }
    }
}

/// What a collector hands back before the registry stamps provenance on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub value: FactValue,
    pub exit_code: Option<i32>,
    pub stderr: Option<String>,
}

impl From<FactValue> for Collected {
    fn from(value: FactValue) -> Self {
        Collected {
            value,
            exit_code: None,
            stderr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub collector: String,
    pub collected_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl Provenance {
    pub fn new(collector: &str, collected_at: DateTime<Utc>, duration: Duration) -> Provenance {
        Provenance {
            collector: collector.to_owned(),
            collected_at,
            duration_ms: duration.as_millis() as u64,
            exit_code: None,
            stderr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub rule_id: String,
    pub value: FactValue,
    pub error: Option<FactGatheringError>,
    pub provenance: Provenance,
}

impl Fact {
    pub fn new(rule_id: &str, collected: Collected, mut provenance: Provenance) -> Fact {
        provenance.exit_code = collected.exit_code;
        provenance.stderr = collected.stderr;

        Fact {
            rule_id: rule_id.to_owned(),
            value: collected.value,
            error: None,
            provenance,
        }
    }

    pub fn failed(rule_id: &str, error: FactGatheringError, provenance: Provenance) -> Fact {
        Fact {
            rule_id: rule_id.to_owned(),
            value: FactValue::Absent,
            error: Some(error),
            provenance,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_carries_collected_provenance() {
        let collected = Collected {
            value: FactValue::Text("ok\n".to_owned()),
            exit_code: Some(1),
            stderr: Some("warning".to_owned()),
        };
        let fact = Fact::new(
            "V-1",
            collected,
            Provenance::new("command_output", Utc::now(), Duration::from_millis(12)),
        );

        assert!(!fact.is_error());
        assert_eq!(fact.provenance.exit_code, Some(1));
        assert_eq!(fact.provenance.stderr.as_deref(), Some("warning"));
        assert_eq!(fact.provenance.duration_ms, 12);
    }

    #[test]
    fn test_timeout_error_mentions_timeout() {
        let error = FactGatheringError::Timeout {
            collector: "command_output".to_owned(),
            after: Duration::from_millis(50),
        };

        assert!(error.to_string().contains("timeout"));
    }

    #[test]
    fn test_fact_value_json() {
        assert_eq!(FactValue::Absent.to_json(), serde_json::Value::Null);
        assert_eq!(
            FactValue::Lines(vec!["a".to_owned()]).to_json(),
            json!(["a"])
        );
        assert!(FactValue::Absent.is_absent());
    }
}

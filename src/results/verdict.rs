use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Compliant,
    Finding,
    /// The rule does not apply to this target.
    NotApplicable,
    /// The rule applies but cannot be decided automatically.
    ManualReview,
    Error,
}

impl VerdictKind {
    pub const ALL: [VerdictKind; 5] = [
        VerdictKind::Compliant,
        VerdictKind::Finding,
        VerdictKind::NotApplicable,
        VerdictKind::ManualReview,
        VerdictKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::Finding => "finding",
            Self::NotApplicable => "not_applicable",
            Self::ManualReview => "manual_review",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one rule in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub rule_id: String,
    pub kind: VerdictKind,
    pub finding_details: String,
    pub evidence: serde_json::Value,
}

impl Verdict {
    pub fn new(
        rule_id: &str,
        kind: VerdictKind,
        finding_details: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Verdict {
        Verdict {
            rule_id: rule_id.to_owned(),
            kind,
            finding_details: finding_details.into(),
            evidence,
        }
    }

    pub fn error(rule_id: &str, finding_details: impl Into<String>) -> Verdict {
        Verdict::new(
            rule_id,
            VerdictKind::Error,
            finding_details,
            serde_json::Value::Null,
        )
    }

    pub fn is(&self, kind: VerdictKind) -> bool {
        self.kind == kind
    }
}

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// What a collected fact has to look like for a rule to be compliant.
#[derive(Debug, Clone)]
pub enum Expectation {
    Equals(serde_json::Value),
    RegexPresent(Regex),
    RegexAbsent(Regex),
    NumericThreshold {
        operator: ThresholdOperator,
        bound: f64,
    },
    SetMembership {
        mode: MembershipMode,
        values: BTreeSet<String>,
    },
    VersionAtLeast(String),
}

impl Expectation {
    pub fn comparator(&self) -> &'static str {
        match self {
            Self::Equals(_) => "equals",
            Self::RegexPresent(_) => "regex_present",
            Self::RegexAbsent(_) => "regex_absent",
            Self::NumericThreshold { .. } => "numeric_threshold",
            Self::SetMembership { .. } => "set_membership",
            Self::VersionAtLeast(_) => "version_at_least",
        }
    }

    /// The expected side of the comparison, as recorded in verdict evidence.
    pub fn expected(&self) -> serde_json::Value {
        match self {
            Self::Equals(value) => value.clone(),
            Self::RegexPresent(pattern) | Self::RegexAbsent(pattern) => json!(pattern.as_str()),
            Self::NumericThreshold { operator, bound } => {
                json!({ "operator": operator.as_str(), "bound": bound })
            }
            Self::SetMembership { mode, values } => json!({ "mode": mode, "values": values }),
            Self::VersionAtLeast(version) => json!(version),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    #[serde(rename = "<=")]
    AtMost,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "==")]
    EqualTo,
}

impl ThresholdOperator {
    pub fn holds(&self, value: f64, bound: f64) -> bool {
        match self {
            Self::AtMost => value <= bound,
            Self::LessThan => value < bound,
            Self::AtLeast => value >= bound,
            Self::GreaterThan => value > bound,
            Self::EqualTo => value == bound,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtMost => "<=",
            Self::LessThan => "<",
            Self::AtLeast => ">=",
            Self::GreaterThan => ">",
            Self::EqualTo => "==",
        }
    }
}

impl fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Allow` requires every observed value to be listed, `Deny` requires none to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipMode {
    #[default]
    Allow,
    Deny,
}

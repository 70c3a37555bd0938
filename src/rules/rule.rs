use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Applicability, Expectation};

/// Rule severity, mapped onto the STIG CAT levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub fn to_cat(&self) -> &'static str {
        match self {
            Self::High => "CAT I",
            Self::Medium => "CAT II",
            Self::Low => "CAT III",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Points a rule at the collector that produces its fact.
///
/// `collector` is either a bare kind (`file_text`) or a pinned
/// `kind@version`; every other key is handed to the collector as a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReference {
    pub collector: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ResourceReference {
    pub fn new(collector: &str) -> ResourceReference {
        ResourceReference {
            collector: collector.to_owned(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// The collector kind without any `@version` suffix.
    pub fn kind(&self) -> &str {
        self.collector
            .split_once('@')
            .map(|(kind, _)| kind)
            .unwrap_or(&self.collector)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|value| value.as_str())
    }

    /// A list parameter; scalars are accepted as a single element.
    pub fn param_strings(&self, key: &str) -> Option<Vec<String>> {
        match self.params.get(key)? {
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            serde_json::Value::String(s) => Some(vec![s.clone()]),
            serde_json::Value::Null => None,
            other => Some(vec![other.to_string()]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub remediation_text: String,
    pub applicability: Applicability,
    pub resource: Option<ResourceReference>,
    /// `None` marks an informational rule that can only be reviewed by hand.
    pub expectation: Option<Expectation>,
    pub absence_is_compliant: bool,
    pub timeout: Option<Duration>,
}

impl Rule {
    pub fn new(id: &str, title: &str) -> Rule {
        Rule {
            id: id.to_owned(),
            title: title.to_owned(),
            severity: Severity::default(),
            description: String::new(),
            remediation_text: String::new(),
            applicability: Applicability::Always,
            resource: None,
            expectation: None,
            absence_is_compliant: false,
            timeout: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_resource(mut self, resource: ResourceReference) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectation = Some(expectation);
        self
    }

    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    pub fn with_absence_is_compliant(mut self, absence_is_compliant: bool) -> Self {
        self.absence_is_compliant = absence_is_compliant;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_manual(&self) -> bool {
        self.expectation.is_none()
    }

    pub fn collector_kind(&self) -> Option<&str> {
        self.resource.as_ref().map(|resource| resource.kind())
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rules::{
    Applicability, Expectation, MembershipMode, ResourceReference, Rule, Severity,
    ThresholdOperator,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub defaults: RuleDefaults,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefaults {
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// Optional fields so a missing one is reported against the rule id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remediation_text: Option<String>,
    #[serde(default)]
    pub applicability: Option<serde_json::Value>,
    #[serde(default)]
    pub resource: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub expectation: Option<serde_json::Value>,
    #[serde(default)]
    pub absence_is_compliant: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "comparator", rename_all = "snake_case")]
pub enum ExpectationDefinition {
    Equals {
        value: serde_json::Value,
    },
    RegexPresent {
        value: String,
    },
    RegexAbsent {
        value: String,
    },
    NumericThreshold {
        operator: ThresholdOperator,
        value: f64,
    },
    SetMembership {
        value: Vec<String>,
        #[serde(default)]
        mode: MembershipMode,
    },
    VersionAtLeast {
        value: String,
    },
}

impl ExpectationDefinition {
    pub fn compile(self) -> Result<Expectation, String> {
        let compile_regex = |pattern: &str| {
            Regex::new(pattern).map_err(|err| format!("invalid pattern `{}`: {}", pattern, err))
        };

        match self {
            Self::Equals { value } => match value {
                serde_json::Value::Null | serde_json::Value::Object(_) => {
                    Err("`equals` needs a string, number, boolean or list value".to_owned())
                }
                value => Ok(Expectation::Equals(value)),
            },
            Self::RegexPresent { value } => Ok(Expectation::RegexPresent(compile_regex(&value)?)),
            Self::RegexAbsent { value } => Ok(Expectation::RegexAbsent(compile_regex(&value)?)),
            Self::NumericThreshold { operator, value } if value.is_finite() => {
                Ok(Expectation::NumericThreshold {
                    operator,
                    bound: value,
                })
            }
            Self::NumericThreshold { .. } => Err("threshold bound must be finite".to_owned()),
            Self::SetMembership { value, mode } => Ok(Expectation::SetMembership {
                mode,
                values: value.into_iter().collect(),
            }),
            Self::VersionAtLeast { value } if crate::evaluator::is_version_like(&value) => {
                Ok(Expectation::VersionAtLeast(value.trim().to_owned()))
            }
            Self::VersionAtLeast { value } => Err(format!("`{}` is not a version", value)),
        }
    }
}

impl RuleDefinition {
    /// Validates the definition into a [`Rule`], naming the first problem found.
    pub fn into_rule(self, defaults: &RuleDefaults) -> Result<Rule, (String, String)> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_owned(),
            _ => return Err(("<unnamed>".to_owned(), "missing required field `id`".to_owned())),
        };
        let fail = |reason: String| (id.clone(), reason);

        let title = self
            .title
            .filter(|title| !title.trim().is_empty())
            .ok_or_else(|| fail("missing required field `title`".to_owned()))?;

        let severity = self
            .severity
            .or(defaults.severity)
            .ok_or_else(|| fail("missing required field `severity`".to_owned()))?;

        let applicability = match self.applicability {
            Some(raw) => serde_json::from_value::<Applicability>(raw)
                .map_err(|err| fail(format!("invalid applicability: {}", err)))?,
            None => Applicability::Always,
        };

        let resource = match self.resource {
            Some(mut raw) => {
                let collector = match raw.remove("collector") {
                    Some(serde_json::Value::String(collector)) if !collector.is_empty() => {
                        collector
                    }
                    _ => return Err(fail("resource is missing `collector`".to_owned())),
                };
                Some(ResourceReference {
                    collector,
                    params: raw,
                })
            }
            None => None,
        };

        let expectation = match self.expectation {
            Some(raw) => {
                let definition = serde_json::from_value::<ExpectationDefinition>(raw)
                    .map_err(|err| fail(format!("invalid expectation: {}", err)))?;
                Some(definition.compile().map_err(fail)?)
            }
            None => None,
        };

        if expectation.is_some() && resource.is_none() {
            return Err(fail(
                "an automated expectation needs a `resource` to collect from".to_owned(),
            ));
        }

        let timeout = match self.timeout_secs.or(defaults.timeout_secs) {
            Some(0) => return Err(fail("timeout_secs must be greater than zero".to_owned())),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(Rule {
            id: id.clone(),
            title,
            severity,
            description: self.description.unwrap_or_default(),
            remediation_text: self.remediation_text.unwrap_or_default(),
            applicability,
            resource,
            expectation,
            absence_is_compliant: self.absence_is_compliant,
            timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(value: serde_json::Value) -> RuleDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_full_definition_into_rule() {
        let rule = definition(json!({
            "id": "V-230296",
            "title": "SSH root login must be disabled",
            "severity": "high",
            "remediation_text": "Set PermitRootLogin no",
            "applicability": {"op": "platform_in", "values": ["rhel9"]},
            "resource": {"collector": "file_text", "path": "/etc/ssh/sshd_config"},
            "expectation": {"comparator": "regex_present", "value": "^PermitRootLogin\\s+no"},
            "timeout_secs": 5
        }))
        .into_rule(&RuleDefaults::default())
        .unwrap();

        assert_eq!(rule.id, "V-230296");
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.collector_kind(), Some("file_text"));
        assert_eq!(
            rule.resource.as_ref().unwrap().param_str("path"),
            Some("/etc/ssh/sshd_config")
        );
        assert!(matches!(rule.expectation, Some(Expectation::RegexPresent(_))));
        assert_eq!(rule.timeout, Some(Duration::from_secs(5)));
        assert!(!rule.absence_is_compliant);
    }

    #[test]
    fn test_defaults_fill_severity_and_timeout() {
        let defaults = RuleDefaults {
            severity: Some(Severity::Low),
            timeout_secs: Some(12),
        };

        let rule = definition(json!({"id": "V-1", "title": "manual check"}))
            .into_rule(&defaults)
            .unwrap();

        assert_eq!(rule.severity, Severity::Low);
        assert_eq!(rule.timeout, Some(Duration::from_secs(12)));
        assert!(rule.is_manual());
    }

    #[test]
    fn test_missing_required_fields() {
        let no_id = definition(json!({"title": "x", "severity": "low"}))
            .into_rule(&RuleDefaults::default())
            .unwrap_err();
        let no_title = definition(json!({"id": "V-2", "severity": "low"}))
            .into_rule(&RuleDefaults::default())
            .unwrap_err();
        let no_severity = definition(json!({"id": "V-3", "title": "x"}))
            .into_rule(&RuleDefaults::default())
            .unwrap_err();

        assert_eq!(no_id.1, "missing required field `id`");
        assert_eq!(no_title, ("V-2".to_owned(), "missing required field `title`".to_owned()));
        assert_eq!(no_severity.1, "missing required field `severity`");
    }

    #[test]
    fn test_expectation_without_resource_is_rejected() {
        let error = definition(json!({
            "id": "V-4",
            "title": "x",
            "severity": "low",
            "expectation": {"comparator": "equals", "value": "yes"}
        }))
        .into_rule(&RuleDefaults::default())
        .unwrap_err();

        assert!(error.1.contains("needs a `resource`"));
    }

    #[test]
    fn test_invalid_expectations() {
        let bad_regex = ExpectationDefinition::RegexPresent {
            value: "(unclosed".to_owned(),
        };
        let bad_version = ExpectationDefinition::VersionAtLeast {
            value: "latest".to_owned(),
        };
        let bad_equals = ExpectationDefinition::Equals {
            value: serde_json::Value::Null,
        };

        assert!(bad_regex.compile().unwrap_err().contains("invalid pattern"));
        assert!(bad_version.compile().is_err());
        assert!(bad_equals.compile().is_err());
    }

    #[test]
    fn test_set_membership_defaults_to_allow() {
        let definition: ExpectationDefinition = serde_yaml::from_str(
            "comparator: set_membership\nvalue: [aes256-ctr, aes128-ctr]\n",
        )
        .unwrap();

        match definition.compile().unwrap() {
            Expectation::SetMembership { mode, values } => {
                assert_eq!(mode, MembershipMode::Allow);
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected expectation {:?}", other),
        }
    }

    #[test]
    fn test_numeric_threshold_definition() {
        let definition: ExpectationDefinition = serde_json::from_value(json!({
            "comparator": "numeric_threshold",
            "operator": "<=",
            "value": 10
        }))
        .unwrap();

        assert!(matches!(
            definition.compile().unwrap(),
            Expectation::NumericThreshold {
                operator: ThresholdOperator::AtMost,
                ..
            }
        ));
    }
}

mod version;

pub use version::{compare_versions, is_version_like};

use std::cmp::Ordering;
use std::collections::BTreeSet;

use regex::Regex;
use serde_json::json;
use thiserror::Error;

use crate::collectors::{Fact, FactValue};
use crate::results::{Verdict, VerdictKind};
use crate::rules::{Expectation, MembershipMode, Rule, ThresholdOperator};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("type mismatch: `{comparator}` expects {expected}, got {actual}")]
    TypeMismatch {
        comparator: &'static str,
        expected: &'static str,
        actual: String,
    },
}

struct Decision {
    compliant: bool,
    details: String,
    evidence: serde_json::Value,
}

pub fn evaluate(rule: &Rule, fact: &Fact) -> Verdict {
    if let Some(error) = &fact.error {
        return Verdict::new(
            &rule.id,
            VerdictKind::Error,
            error.to_string(),
            json!({ "collector": fact.provenance.collector }),
        );
    }

    let Some(expectation) = &rule.expectation else {
        return manual_review(rule);
    };

    if fact.value.is_absent() {
        let kind = if rule.absence_is_compliant {
            VerdictKind::Compliant
        } else {
            VerdictKind::Finding
        };
        return Verdict::new(
            &rule.id,
            kind,
            format!("{} reported the resource as absent", fact.provenance.collector),
            json!({ "actual": null, "absence_is_compliant": rule.absence_is_compliant }),
        );
    }

    let decision = match expectation {
        Expectation::Equals(expected) => equals(expected, &fact.value),
        Expectation::RegexPresent(pattern) => regex_search(pattern, &fact.value, true),
        Expectation::RegexAbsent(pattern) => regex_search(pattern, &fact.value, false),
        Expectation::NumericThreshold { operator, bound } => {
            numeric_threshold(*operator, *bound, &fact.value)
        }
        Expectation::SetMembership { mode, values } => set_membership(*mode, values, &fact.value),
        Expectation::VersionAtLeast(minimum) => version_at_least(minimum, &fact.value),
    };

    match decision {
        Ok(decision) => {
            let kind = if decision.compliant {
                VerdictKind::Compliant
            } else {
                VerdictKind::Finding
            };
            Verdict::new(&rule.id, kind, decision.details, decision.evidence)
        }
        Err(error) => Verdict::new(
            &rule.id,
            VerdictKind::Error,
            error.to_string(),
            json!({ "actual": fact.value.to_json(), "expected": expectation.expected() }),
        ),
    }
}

/// Verdict for a rule without an expectation; no fact is needed.
pub fn manual_review(rule: &Rule) -> Verdict {
    Verdict::new(
        &rule.id,
        VerdictKind::ManualReview,
        "rule has no automated expectation and requires manual review",
        serde_json::Value::Null,
    )
}

fn equals(expected: &serde_json::Value, actual: &FactValue) -> Result<Decision, EvaluationError> {
    let compliant = match (expected, actual) {
        (serde_json::Value::Number(number), _) => {
            let expected = number.as_f64().unwrap_or(f64::NAN);
            as_number(actual, "equals")? == expected
        }
        (serde_json::Value::Bool(flag), FactValue::Bool(value)) => flag == value,
        (serde_json::Value::Bool(flag), FactValue::Text(text)) => match text.trim() {
            "true" => *flag,
            "false" => !*flag,
            _ => return Err(mismatch("equals", "a boolean", actual)),
        },
        (serde_json::Value::String(expected), FactValue::Text(text)) => {
            expected == text.trim_end_matches(['\r', '\n'])
        }
        (serde_json::Value::Array(expected), FactValue::Lines(lines)) => {
            expected.len() == lines.len()
                && expected
                    .iter()
                    .zip(lines)
                    .all(|(e, line)| e.as_str() == Some(line.as_str()))
        }
        (serde_json::Value::String(_), _) => return Err(mismatch("equals", "text", actual)),
        (serde_json::Value::Bool(_), _) => return Err(mismatch("equals", "a boolean", actual)),
        (serde_json::Value::Array(_), _) => {
            return Err(mismatch("equals", "a sequence of strings", actual))
        }
        (_, _) => return Err(mismatch("equals", "a scalar expectation", actual)),
    };

    Ok(Decision {
        compliant,
        details: if compliant {
            format!("value matches expected {}", expected)
        } else {
            format!("expected {}, found {}", expected, actual.to_json())
        },
        evidence: json!({ "actual": actual.to_json(), "expected": expected }),
    })
}

fn regex_search(
    pattern: &Regex,
    actual: &FactValue,
    must_match: bool,
) -> Result<Decision, EvaluationError> {
    let comparator = if must_match {
        "regex_present"
    } else {
        "regex_absent"
    };
    let lines: Vec<&str> = match actual {
        FactValue::Text(text) => text.lines().collect(),
        FactValue::Lines(lines) => lines.iter().flat_map(|line| line.lines()).collect(),
        other => return Err(mismatch(comparator, "text", other)),
    };

    let matched: Vec<&str> = lines
        .into_iter()
        .filter(|line| pattern.is_match(line))
        .collect();
    let compliant = matched.is_empty() != must_match;

    let details = match (must_match, matched.is_empty()) {
        (true, false) => format!("pattern `{}` found", pattern.as_str()),
        (true, true) => format!("pattern `{}` not found", pattern.as_str()),
        (false, true) => format!("pattern `{}` absent as required", pattern.as_str()),
        (false, false) => format!(
            "pattern `{}` must be absent but matched {} line(s)",
            pattern.as_str(),
            matched.len()
        ),
    };

    Ok(Decision {
        compliant,
        details,
        evidence: json!({ "pattern": pattern.as_str(), "matched_lines": matched }),
    })
}

fn numeric_threshold(
    operator: ThresholdOperator,
    bound: f64,
    actual: &FactValue,
) -> Result<Decision, EvaluationError> {
    let value = as_number(actual, "numeric_threshold")?;
    let compliant = operator.holds(value, bound);

    Ok(Decision {
        compliant,
        details: format!(
            "{} {} {} {}",
            value,
            if compliant { "satisfies" } else { "violates" },
            operator,
            bound
        ),
        evidence: json!({ "actual": value, "operator": operator.as_str(), "bound": bound }),
    })
}

fn set_membership(
    mode: MembershipMode,
    values: &BTreeSet<String>,
    actual: &FactValue,
) -> Result<Decision, EvaluationError> {
    let observed: Vec<String> = match actual {
        FactValue::Text(text) => vec![text.trim().to_owned()],
        FactValue::Lines(lines) => lines.iter().map(|line| line.trim().to_owned()).collect(),
        FactValue::Number(number) => vec![number.to_string()],
        FactValue::Bool(flag) => vec![flag.to_string()],
        FactValue::Absent => vec![],
    };

    let offending: Vec<&String> = observed
        .iter()
        .filter(|value| match mode {
            MembershipMode::Allow => !values.contains(*value),
            MembershipMode::Deny => values.contains(*value),
        })
        .collect();
    let compliant = offending.is_empty();

    let details = match (mode, compliant) {
        (MembershipMode::Allow, true) => "all observed values are allowed".to_owned(),
        (MembershipMode::Deny, true) => "no observed value is forbidden".to_owned(),
        (MembershipMode::Allow, false) => format!("values not in the allowed set: {:?}", offending),
        (MembershipMode::Deny, false) => format!("forbidden values present: {:?}", offending),
    };

    Ok(Decision {
        compliant,
        details,
        evidence: json!({ "observed": observed, "offending": offending, "mode": mode }),
    })
}

fn version_at_least(minimum: &str, actual: &FactValue) -> Result<Decision, EvaluationError> {
    let version = match actual {
        FactValue::Text(text) if is_version_like(text) => text.trim().to_owned(),
        FactValue::Number(number) => number.to_string(),
        other => return Err(mismatch("version_at_least", "a dotted version", other)),
    };

    let compliant = compare_versions(&version, minimum) != Ordering::Less;

    Ok(Decision {
        compliant,
        details: format!(
            "version {} {} minimum {}",
            version,
            if compliant { "meets" } else { "is below" },
            minimum
        ),
        evidence: json!({ "actual": version, "minimum": minimum }),
    })
}

fn as_number(actual: &FactValue, comparator: &'static str) -> Result<f64, EvaluationError> {
    match actual {
        FactValue::Number(number) => Ok(*number),
        FactValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| mismatch(comparator, "a number", actual)),
        other => Err(mismatch(comparator, "a number", other)),
    }
}

fn mismatch(comparator: &'static str, expected: &'static str, actual: &FactValue) -> EvaluationError {
    EvaluationError::TypeMismatch {
        comparator,
        expected,
        actual: actual.to_json().to_string(),
    }
}

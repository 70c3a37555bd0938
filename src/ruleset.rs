mod document;
mod loader;

pub use document::{ExpectationDefinition, RuleDefaults, RuleDefinition, RuleSetDocument};
pub use loader::{DocumentFormat, RuleSetLoader};

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::rules::Rule;

#[derive(Error, Debug)]
pub enum RuleSetError {
    #[error("malformed rule-set, rule `{rule}`: {reason}")]
    MalformedRuleSet { rule: String, reason: String },
    #[error("overlay for rule `{rule}` changes its collector kind from `{base}` to `{overlay}`")]
    ConflictingOverride {
        rule: String,
        base: String,
        overlay: String,
    },
    #[error("rule `{0}` is not part of the rule-set")]
    UnknownRule(String),
    #[error("reading rule-set {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rule-set: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub name: String,
    rules: Vec<Arc<Rule>>,
}

impl RuleSet {
    /// Builds a rule-set, rejecting duplicate ids.
    pub fn new(name: &str, rules: Vec<Rule>) -> Result<RuleSet, RuleSetError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleSetError::MalformedRuleSet {
                    rule: rule.id.clone(),
                    reason: "duplicate rule id".to_owned(),
                });
            }
        }

        Ok(RuleSet {
            name: name.to_owned(),
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.id.as_str()).collect()
    }

    /// Keeps only the named rules, in declaration order.
    pub fn select(&self, ids: &[String]) -> Result<RuleSet, RuleSetError> {
        if let Some(unknown) = ids.iter().find(|id| self.get(id).is_none()) {
            return Err(RuleSetError::UnknownRule(unknown.clone()));
        }

        Ok(RuleSet {
            name: self.name.clone(),
            rules: self
                .rules
                .iter()
                .filter(|rule| ids.contains(&rule.id))
                .cloned()
                .collect(),
        })
    }

    /// Combines a baseline with a platform overlay by rule id.
    ///
    /// Overlay rules replace baseline rules in place and new overlay rules
    /// are appended in overlay order. An overlay may not change the collector
    /// kind a rule measures; that takes a new rule.
    pub fn merge(base: &RuleSet, overlay: &RuleSet) -> Result<RuleSet, RuleSetError> {
        let mut rules = base.rules.clone();

        for replacement in &overlay.rules {
            match rules.iter_mut().find(|rule| rule.id == replacement.id) {
                Some(existing) => {
                    if existing.collector_kind() != replacement.collector_kind() {
                        return Err(RuleSetError::ConflictingOverride {
                            rule: replacement.id.clone(),
                            base: existing.collector_kind().unwrap_or("none").to_owned(),
                            overlay: replacement.collector_kind().unwrap_or("none").to_owned(),
                        });
                    }
                    *existing = replacement.clone();
                }
                None => rules.push(replacement.clone()),
            }
        }

        debug!(
            "merged overlay {} ({} rules) into {}",
            overlay.name,
            overlay.len(),
            base.name
        );

        Ok(RuleSet {
            name: base.name.clone(),
            rules,
        })
    }
}

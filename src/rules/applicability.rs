use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity of the host being assessed, plus free-form attributes that
/// applicability predicates can test (`role`, `os_version`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContext {
    pub hostname: String,
    pub platform: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl TargetContext {
    pub fn new(hostname: &str, platform: &str) -> TargetContext {
        TargetContext {
            hostname: hostname.to_owned(),
            platform: platform.to_owned(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "hostname" => Some(self.hostname.as_str()),
            "platform" => Some(self.platform.as_str()),
            _ => self.attributes.get(key).map(|value| value.as_str()),
        }
    }

    /// `hostname/platform`, used as the `target` of a result document.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.hostname, self.platform)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Applicability {
    #[default]
    Always,
    Equals {
        key: String,
        value: String,
    },
    OneOf {
        key: String,
        values: Vec<String>,
    },
    Exists {
        key: String,
    },
    PlatformIn {
        values: Vec<String>,
    },
    All {
        of: Vec<Applicability>,
    },
    Any {
        of: Vec<Applicability>,
    },
    Not {
        predicate: Box<Applicability>,
    },
}

impl Applicability {
    pub fn is_satisfied_by(&self, context: &TargetContext) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { key, value } => context.lookup(key) == Some(value.as_str()),
            Self::OneOf { key, values } => context
                .lookup(key)
                .map(|actual| values.iter().any(|candidate| candidate == actual))
                .unwrap_or(false),
            Self::Exists { key } => context.lookup(key).is_some(),
            Self::PlatformIn { values } => values
                .iter()
                .any(|platform| platform.eq_ignore_ascii_case(&context.platform)),
            Self::All { of } => of.iter().all(|inner| inner.is_satisfied_by(context)),
            Self::Any { of } => of.iter().any(|inner| inner.is_satisfied_by(context)),
            Self::Not { predicate } => !predicate.is_satisfied_by(context),
        }
    }
}

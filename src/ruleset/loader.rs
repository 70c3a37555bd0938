use std::path::Path;

use super::{RuleSet, RuleSetDocument, RuleSetError};
use crate::collectors::CollectorsRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.json` files are JSON, everything else is read as YAML.
    pub fn from_path(path: &Path) -> DocumentFormat {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

pub struct RuleSetLoader<'a> {
    registry: &'a CollectorsRegistry,
}

impl<'a> RuleSetLoader<'a> {
    pub fn new(registry: &'a CollectorsRegistry) -> RuleSetLoader<'a> {
        RuleSetLoader { registry }
    }

    pub fn load(&self, source: &str, format: DocumentFormat) -> Result<RuleSet, RuleSetError> {
        let document: RuleSetDocument = match format {
            DocumentFormat::Json => {
                serde_json::from_str(source).map_err(|e| RuleSetError::Parse(e.to_string()))?
            }
            DocumentFormat::Yaml => {
                serde_yaml::from_str(source).map_err(|e| RuleSetError::Parse(e.to_string()))?
            }
        };

        self.build_rule_set(document)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RuleSet, RuleSetError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut rule_set = self.load(&source, DocumentFormat::from_path(path))?;
        if rule_set.name.is_empty() {
            rule_set.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        info!(
            "loaded rule-set {} with {} rules from {}",
            rule_set.name,
            rule_set.len(),
            path.display()
        );
        Ok(rule_set)
    }

    /// Loads a baseline and folds each overlay over it, in order.
    pub fn load_with_overlays(
        &self,
        base: impl AsRef<Path>,
        overlays: &[impl AsRef<Path>],
    ) -> Result<RuleSet, RuleSetError> {
        let mut rule_set = self.load_file(base)?;
        for overlay in overlays {
            let overlay = self.load_file(overlay)?;
            rule_set = RuleSet::merge(&rule_set, &overlay)?;
        }
        Ok(rule_set)
    }

    pub fn build_rule_set(&self, document: RuleSetDocument) -> Result<RuleSet, RuleSetError> {
        let defaults = document.defaults;
        let mut rules = Vec::with_capacity(document.rules.len());

        for definition in document.rules {
            let rule = definition
                .into_rule(&defaults)
                .map_err(|(rule, reason)| RuleSetError::MalformedRuleSet { rule, reason })?;

            if let Some(resource) = &rule.resource {
                if let Err(err) = self.registry.get_collector(&resource.collector) {
                    return Err(RuleSetError::MalformedRuleSet {
                        rule: rule.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            rules.push(rule);
        }

        RuleSet::new(&document.name.unwrap_or_default(), rules)
    }
}

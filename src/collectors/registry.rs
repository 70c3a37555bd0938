use super::{
    Collector, CommandOutputCollector, Fact, FactGatheringError, FileTextCollector, Provenance,
    StructuredLookupCollector, COMMAND_OUTPUT, FILE_TEXT, STRUCTURED_LOOKUP,
};
use crate::evaluator::compare_versions;
use crate::rules::ResourceReference;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

pub const DEFAULT_COLLECTOR_VERSION: &str = "v1";

#[derive(Error, Debug, PartialEq)]
pub enum RegistryErrors {
    #[error("collector `{0}` not found")]
    CollectorNotFoundError(String),
    #[error("could not extract the collector version from {0}, version should follow <collectorName>@<version> syntax")]
    CollectorNameAndVersionError(String),
}

/// Read-only map of collector kind -> version -> collector, shared by every
/// worker of a run.
pub struct CollectorsRegistry {
    collectors: HashMap<String, HashMap<String, Arc<dyn Collector>>>,
}

impl CollectorsRegistry {
    pub fn get_collector(&self, name: &str) -> Result<Arc<dyn Collector>, RegistryErrors> {
        let (collector_name, version) = extract_version_and_collector_name(name)?;

        let version = match version {
            Some(version) => version,
            None => self.get_latest_version_for_collector(&collector_name)?,
        };

        match self
            .collectors
            .get(&collector_name)
            .and_then(|versioned_collectors| versioned_collectors.get(&version))
        {
            Some(collector) => Ok(collector.clone()),
            None => Err(RegistryErrors::CollectorNotFoundError(name.to_owned())),
        }
    }

    pub fn inspect_collectors(&self) -> Vec<String> {
        let mut collectors_list: Vec<String> = self
            .collectors
            .iter()
            .map(|(collector_name, versions)| {
                format!(
                    "{} - {}",
                    collector_name,
                    sorted_versions(versions.keys()).join("/")
                )
            })
            .collect();
        collectors_list.sort();

        collectors_list
    }

    /// Gathers the fact for one rule. Never fails: unknown kinds, collector
    /// errors, panics and timeouts all come back as an error-carrying fact.
    pub async fn collect(
        &self,
        rule_id: &str,
        resource: &ResourceReference,
        timeout: Duration,
    ) -> Fact {
        let collected_at = Utc::now();
        let started = Instant::now();

        let collector = match self.get_collector(&resource.collector) {
            Ok(collector) => collector,
            Err(err) => {
                warn!("rule {}: {}", rule_id, err);
                return Fact::failed(
                    rule_id,
                    FactGatheringError::UnknownCollectorKind(resource.collector.clone()),
                    Provenance::new(&resource.collector, collected_at, started.elapsed()),
                );
            }
        };

        let gathering = AssertUnwindSafe(async { collector.collect(resource).await }).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, gathering).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(FactGatheringError::Panicked {
                collector: resource.collector.clone(),
                reason: panic_message(panic.as_ref()),
            }),
            Err(_) => Err(FactGatheringError::Timeout {
                collector: resource.collector.clone(),
                after: timeout,
            }),
        };

        let provenance = Provenance::new(&resource.collector, collected_at, started.elapsed());
        match outcome {
            Ok(collected) => {
                debug!(
                    "rule {}: collected with {} in {}ms",
                    rule_id, resource.collector, provenance.duration_ms
                );
                Fact::new(rule_id, collected, provenance)
            }
            Err(err) => {
                warn!("rule {}: {}", rule_id, err);
                Fact::failed(rule_id, err, provenance)
            }
        }
    }

    fn get_latest_version_for_collector(&self, name: &str) -> Result<String, RegistryErrors> {
        self.collectors
            .get(name)
            .and_then(|versioned_collectors| {
                sorted_versions(versioned_collectors.keys()).pop()
            })
            .ok_or_else(|| RegistryErrors::CollectorNotFoundError(name.to_owned()))
    }
}

fn sorted_versions<'a>(versions: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut sorted: Vec<String> = versions.cloned().collect();
    sorted.sort_by(|a, b| {
        compare_versions(a.trim_start_matches('v'), b.trim_start_matches('v'))
    });
    sorted
}

fn extract_version_and_collector_name(
    collector_name: &str,
) -> Result<(String, Option<String>), RegistryErrors> {
    let parts: Vec<&str> = collector_name.split('@').collect();

    if parts.len() == 1 {
        return Ok((parts[0].to_owned(), None));
    }
    if parts.len() != 2 || parts[1].is_empty() {
        return Err(RegistryErrors::CollectorNameAndVersionError(
            collector_name.to_owned(),
        ));
    }
    Ok((parts[0].to_owned(), Some(parts[1].to_owned())))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[derive(Default)]
pub struct CollectorsRegistryBuilder {
    collectors: Vec<(String, String, Arc<dyn Collector>)>,
}

impl CollectorsRegistryBuilder {
    pub fn new() -> CollectorsRegistryBuilder {
        CollectorsRegistryBuilder {
            collectors: Vec::new(),
        }
    }

    /// Builder preloaded with `file_text`, `command_output` and `structured_lookup`.
    pub fn with_builtin_collectors() -> CollectorsRegistryBuilder {
        let mut builder = CollectorsRegistryBuilder::new();
        builder
            .register(FILE_TEXT, FileTextCollector)
            .register(COMMAND_OUTPUT, CommandOutputCollector)
            .register(STRUCTURED_LOOKUP, StructuredLookupCollector);
        builder
    }

    pub fn add_collector(
        &mut self,
        name: &str,
        version: &str,
        collector: impl Collector + 'static,
    ) -> &mut CollectorsRegistryBuilder {
        self.collectors
            .push((name.to_owned(), version.to_owned(), Arc::new(collector)));

        self
    }

    /// Registers `collector` as the default version of `kind`.
    pub fn register(
        &mut self,
        kind: &str,
        collector: impl Collector + 'static,
    ) -> &mut CollectorsRegistryBuilder {
        self.add_collector(kind, DEFAULT_COLLECTOR_VERSION, collector)
    }

    pub fn build_registry(self) -> CollectorsRegistry {
        let mut collectors_map: HashMap<String, HashMap<String, Arc<dyn Collector>>> =
            HashMap::new();

        for (name, version, collector) in self.collectors {
            collectors_map
                .entry(name)
                .or_default()
                .insert(version, collector);
        }

        info!(
            "collectors registry built with {} kinds",
            collectors_map.len()
        );

        CollectorsRegistry {
            collectors: collectors_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{Collected, FactValue, MockCollector};

    fn plugin(output: &'static str) -> MockCollector {
        let mut collector = MockCollector::new();
        collector.expect_name().returning(move || output.to_owned());
        collector
    }

    #[test]
    fn test_inspect_lists_builtins_and_plugin_versions() {
        let mut builder = CollectorsRegistryBuilder::with_builtin_collectors();
        builder
            .add_collector("package_version", "v1", MockCollector::new())
            .add_collector("package_version", "v2", MockCollector::new());

        let registry = builder.build_registry();

        assert_eq!(
            registry.inspect_collectors(),
            vec![
                "command_output - v1".to_owned(),
                "file_text - v1".to_owned(),
                "package_version - v1/v2".to_owned(),
                "structured_lookup - v1".to_owned(),
            ]
        );
    }

    #[test]
    fn test_registry_builtin_collectors() {
        let registry = CollectorsRegistryBuilder::with_builtin_collectors().build_registry();

        assert!(registry.get_collector(FILE_TEXT).is_ok());
        assert!(registry.get_collector(COMMAND_OUTPUT).is_ok());
        assert!(registry.get_collector("structured_lookup@v1").is_ok());
    }

    #[test]
    fn test_malformed_collector_references() {
        let registry = CollectorsRegistryBuilder::with_builtin_collectors().build_registry();

        for reference in ["file_text@v1@v2", "file_text@"] {
            assert_eq!(
                registry.get_collector(reference).err(),
                Some(RegistryErrors::CollectorNameAndVersionError(
                    reference.to_owned()
                ))
            );
        }
    }

    #[test]
    fn test_unregistered_kind_and_version() {
        let registry = CollectorsRegistryBuilder::with_builtin_collectors().build_registry();

        assert_eq!(
            registry.get_collector("registry_value").err(),
            Some(RegistryErrors::CollectorNotFoundError(
                "registry_value".to_owned()
            ))
        );
        assert_eq!(
            registry.get_collector("file_text@v3").err(),
            Some(RegistryErrors::CollectorNotFoundError(
                "file_text@v3".to_owned()
            ))
        );
    }

    #[test]
    fn test_pinned_version_wins_over_latest() {
        let mut builder = CollectorsRegistryBuilder::new();
        builder
            .add_collector("package_version", "v1", plugin("rpm -q"))
            .add_collector("package_version", "v2", plugin("dnf info"));
        let registry = builder.build_registry();

        assert_eq!(
            registry.get_collector("package_version@v1").unwrap().name(),
            "rpm -q"
        );
        assert_eq!(
            registry.get_collector("package_version").unwrap().name(),
            "dnf info"
        );
    }

    #[test]
    fn test_latest_version_is_numeric_not_lexical() {
        let mut builder = CollectorsRegistryBuilder::new();
        builder
            .add_collector("package_version", "v2", plugin("rpm -q"))
            .add_collector("package_version", "v10", plugin("dnf info"));
        let registry = builder.build_registry();

        assert_eq!(
            registry.get_collector("package_version").unwrap().name(),
            "dnf info"
        );
    }

    #[tokio::test]
    async fn test_collect_unknown_kind_yields_error_fact() {
        let registry = CollectorsRegistryBuilder::new().build_registry();
        let resource = ResourceReference::new("registry_value");

        let fact = registry
            .collect("V-1", &resource, Duration::from_secs(1))
            .await;

        assert_eq!(
            fact.error,
            Some(FactGatheringError::UnknownCollectorKind(
                "registry_value".to_owned()
            ))
        );
    }

    #[tokio::test]
    async fn test_collect_stamps_provenance() {
        let mut mockcollector = MockCollector::new();
        mockcollector.expect_collect().times(1).returning(|_| {
            Ok(Collected {
                value: FactValue::Number(3.0),
                exit_code: Some(0),
                stderr: None,
            })
        });

        let mut builder = CollectorsRegistryBuilder::new();
        builder.register("sysctl", mockcollector);
        let registry = builder.build_registry();

        let fact = registry
            .collect("V-2", &ResourceReference::new("sysctl"), Duration::from_secs(1))
            .await;

        assert_eq!(fact.rule_id, "V-2");
        assert_eq!(fact.value, FactValue::Number(3.0));
        assert_eq!(fact.provenance.collector, "sysctl");
        assert_eq!(fact.provenance.exit_code, Some(0));
        assert!(fact.error.is_none());
    }

    struct SlowCollector;

    #[async_trait::async_trait]
    impl Collector for SlowCollector {
        async fn collect(
            &self,
            _resource: &ResourceReference,
        ) -> Result<Collected, FactGatheringError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FactValue::Bool(true).into())
        }

        fn name(&self) -> String {
            "slow".to_owned()
        }
    }

    #[tokio::test]
    async fn test_collect_timeout_yields_error_fact() {
        let mut builder = CollectorsRegistryBuilder::new();
        builder.register("slow", SlowCollector);
        let registry = builder.build_registry();

        let fact = registry
            .collect(
                "V-3",
                &ResourceReference::new("slow"),
                Duration::from_millis(20),
            )
            .await;

        assert!(matches!(
            fact.error,
            Some(FactGatheringError::Timeout { .. })
        ));
        assert!(fact.value.is_absent());
    }

    #[tokio::test]
    async fn test_collect_catches_panicking_collector() {
        let mut mockcollector = MockCollector::new();
        mockcollector
            .expect_collect()
            .returning(|_| panic!("registry hive unavailable"));

        let mut builder = CollectorsRegistryBuilder::new();
        builder.register("registry_value", mockcollector);
        let registry = builder.build_registry();

        let fact = registry
            .collect(
                "V-4",
                &ResourceReference::new("registry_value"),
                Duration::from_secs(1),
            )
            .await;

        assert_eq!(
            fact.error,
            Some(FactGatheringError::Panicked {
                collector: "registry_value".to_owned(),
                reason: "registry hive unavailable".to_owned()
            })
        );
    }
}

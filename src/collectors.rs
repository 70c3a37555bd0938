#[cfg(test)]
use mockall::automock;

mod command_output;
mod facts;
mod file_text;
mod registry;
mod structured_lookup;

pub use command_output::CommandOutputCollector;
pub use facts::*;
pub use file_text::FileTextCollector;
pub use registry::{CollectorsRegistry, CollectorsRegistryBuilder, RegistryErrors};
pub use structured_lookup::StructuredLookupCollector;

use crate::rules::ResourceReference;

pub const FILE_TEXT: &str = "file_text";
pub const COMMAND_OUTPUT: &str = "command_output";
pub const STRUCTURED_LOOKUP: &str = "structured_lookup";

/// Produces a raw fact for a resource reference.
///
/// Built-in collectors cover files, commands and structured documents; OS
/// specific ones (registry access, package managers, device sessions) are
/// registered by the embedding program.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Collector: Sync + Send {
    async fn collect(&self, resource: &ResourceReference)
        -> Result<Collected, FactGatheringError>;
    fn name(&self) -> String;
}

/// Adapts a plain function into a [`Collector`].
pub struct FnCollector<F> {
    name: String,
    collect_fn: F,
}

impl<F> FnCollector<F>
where
    F: Fn(&ResourceReference) -> Result<Collected, FactGatheringError> + Send + Sync,
{
    pub fn new(name: &str, collect_fn: F) -> FnCollector<F> {
        FnCollector {
            name: name.to_owned(),
            collect_fn,
        }
    }
}

#[async_trait::async_trait]
impl<F> Collector for FnCollector<F>
where
    F: Fn(&ResourceReference) -> Result<Collected, FactGatheringError> + Send + Sync,
{
    async fn collect(
        &self,
        resource: &ResourceReference,
    ) -> Result<Collected, FactGatheringError> {
        (self.collect_fn)(resource)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

fn required_param<'a>(
    resource: &'a ResourceReference,
    collector: &str,
    key: &str,
) -> Result<&'a str, FactGatheringError> {
    resource
        .param_str(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FactGatheringError::InvalidParameters {
            collector: collector.to_owned(),
            reason: format!("missing string parameter `{}`", key),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_collector_delegates() {
        let collector = FnCollector::new("package_installed", |resource: &ResourceReference| {
            let installed = resource.param_str("package") == Some("openssh-server");
            Ok(FactValue::Bool(installed).into())
        });

        let resource =
            ResourceReference::new("package_installed").with_param("package", "openssh-server");
        let collected = collector.collect(&resource).await.unwrap();

        assert_eq!(collected.value, FactValue::Bool(true));
        assert_eq!(collector.name(), "package_installed");
    }

    #[test]
    fn test_required_param_rejects_missing_and_empty() {
        let resource = ResourceReference::new(FILE_TEXT).with_param("path", "");

        let error = required_param(&resource, FILE_TEXT, "path").unwrap_err();

        assert_eq!(
            error,
            FactGatheringError::InvalidParameters {
                collector: FILE_TEXT.to_owned(),
                reason: "missing string parameter `path`".to_owned()
            }
        );
    }
}

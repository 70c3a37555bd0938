use std::io::ErrorKind;

use super::{required_param, Collected, Collector, FactGatheringError, FactValue, FILE_TEXT};
use crate::rules::ResourceReference;

/// Reads a whole file as text. A missing file is an `Absent` fact.
pub struct FileTextCollector;

#[async_trait::async_trait]
impl Collector for FileTextCollector {
    async fn collect(
        &self,
        resource: &ResourceReference,
    ) -> Result<Collected, FactGatheringError> {
        let path = required_param(resource, FILE_TEXT, "path")?;

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(FactValue::Text(String::from_utf8_lossy(&bytes).into_owned()).into()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} not found, reporting it as absent", path);
                Ok(FactValue::Absent.into())
            }
            Err(err) => Err(FactGatheringError::Failed {
                collector: FILE_TEXT.to_owned(),
                reason: format!("reading {}: {}", path, err),
            }),
        }
    }

    fn name(&self) -> String {
        FILE_TEXT.to_owned()
    }
}

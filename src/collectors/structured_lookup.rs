use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};

use super::{
    required_param, Collected, Collector, FactGatheringError, FactValue, STRUCTURED_LOOKUP,
};
use crate::rules::ResourceReference;

/// Looks up a dotted `key` inside a JSON, YAML, TOML or INI document at `path`.
///
/// Numeric key segments index into arrays. A missing document or key is an
/// `Absent` fact.
pub struct StructuredLookupCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Yaml,
    Toml,
    Ini,
}

impl DocumentFormat {
    fn from_param(name: &str) -> Option<DocumentFormat> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "ini" | "conf" | "cfg" => Some(Self::Ini),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl Collector for StructuredLookupCollector {
    async fn collect(
        &self,
        resource: &ResourceReference,
    ) -> Result<Collected, FactGatheringError> {
        let path = required_param(resource, STRUCTURED_LOOKUP, "path")?;
        let key = required_param(resource, STRUCTURED_LOOKUP, "key")?;

        let format_name = match resource.param_str("format") {
            Some(format) => format,
            None => Path::new(path)
                .extension()
                .and_then(|extension| extension.to_str())
                .unwrap_or_default(),
        };
        let format = DocumentFormat::from_param(format_name).ok_or_else(|| {
            FactGatheringError::InvalidParameters {
                collector: STRUCTURED_LOOKUP.to_owned(),
                reason: format!("cannot tell the document format of {}", path),
            }
        })?;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FactValue::Absent.into()),
            Err(err) => {
                return Err(failed(format!("reading {}: {}", path, err)));
            }
        };

        let document = parse_document(&content, format)
            .map_err(|reason| failed(format!("parsing {}: {}", path, reason)))?;

        Ok(lookup(&document, key)
            .map(to_fact_value)
            .unwrap_or(FactValue::Absent)
            .into())
    }

    fn name(&self) -> String {
        STRUCTURED_LOOKUP.to_owned()
    }
}

fn failed(reason: String) -> FactGatheringError {
    FactGatheringError::Failed {
        collector: STRUCTURED_LOOKUP.to_owned(),
        reason,
    }
}

fn parse_document(content: &str, format: DocumentFormat) -> Result<Value, String> {
    match format {
        DocumentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        DocumentFormat::Ini => Ok(parse_ini(content)),
    }
}

/// Sections become nested objects; keys before the first section live at the root.
fn parse_ini(content: &str) -> Value {
    let mut root = Map::new();
    let mut section: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let name = name.trim().to_owned();
            root.entry(name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            section = Some(name);
            continue;
        }

        let Some((key, value)) = line.split_once(|c| c == '=' || c == ':') else {
            continue;
        };
        let entry = (
            key.trim().to_owned(),
            Value::String(value.trim().trim_matches('"').to_owned()),
        );

        match section
            .as_ref()
            .and_then(|name| root.get_mut(name))
            .and_then(Value::as_object_mut)
        {
            Some(table) => {
                table.insert(entry.0, entry.1);
            }
            None => {
                root.insert(entry.0, entry.1);
            }
        }
    }

    Value::Object(root)
}

fn lookup<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(document, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    })
}

fn to_fact_value(value: &Value) -> FactValue {
    match value {
        Value::Null => FactValue::Absent,
        Value::Bool(flag) => FactValue::Bool(*flag),
        Value::Number(number) => number
            .as_f64()
            .map(FactValue::Number)
            .unwrap_or_else(|| FactValue::Text(number.to_string())),
        Value::String(text) => FactValue::Text(text.clone()),
        Value::Array(items) => FactValue::Lines(
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        Value::Object(_) => FactValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_resource(path: &Path, key: &str) -> ResourceReference {
        ResourceReference::new(STRUCTURED_LOOKUP)
            .with_param("path", path.to_string_lossy().to_string())
            .with_param("key", key)
    }

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_json_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "daemon.json",
            r#"{"log": {"max_size": 10, "drivers": ["json-file", "journald"]}, "icc": false}"#,
        );

        let collector = StructuredLookupCollector;

        let size = collector
            .collect(&lookup_resource(&path, "log.max_size"))
            .await
            .unwrap();
        let driver = collector
            .collect(&lookup_resource(&path, "log.drivers.1"))
            .await
            .unwrap();
        let drivers = collector
            .collect(&lookup_resource(&path, "log.drivers"))
            .await
            .unwrap();
        let icc = collector
            .collect(&lookup_resource(&path, "icc"))
            .await
            .unwrap();

        assert_eq!(size.value, FactValue::Number(10.0));
        assert_eq!(driver.value, FactValue::Text("journald".to_owned()));
        assert_eq!(
            drivers.value,
            FactValue::Lines(vec!["json-file".to_owned(), "journald".to_owned()])
        );
        assert_eq!(icc.value, FactValue::Bool(false));
    }

    #[tokio::test]
    async fn test_ini_lookup_with_explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "sssd",
            "; managed\nglobal = 1\n[sssd]\nservices = nss, pam\n[domain/example]\noffline_credentials_expiration = 1\n",
        );

        let resource = lookup_resource(&path, "sssd.services").with_param("format", "ini");
        let collected = StructuredLookupCollector.collect(&resource).await.unwrap();

        assert_eq!(collected.value, FactValue::Text("nss, pam".to_owned()));
    }

    #[tokio::test]
    async fn test_missing_key_and_missing_document_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "settings.yaml", "audit:\n  enabled: true\n");

        let missing_key = StructuredLookupCollector
            .collect(&lookup_resource(&path, "audit.retention"))
            .await
            .unwrap();
        let missing_doc = StructuredLookupCollector
            .collect(&lookup_resource(&dir.path().join("gone.yaml"), "audit"))
            .await
            .unwrap();

        assert_eq!(missing_key.value, FactValue::Absent);
        assert_eq!(missing_doc.value, FactValue::Absent);
    }

    #[tokio::test]
    async fn test_unparseable_document_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "broken.json", "{ not json");

        let error = StructuredLookupCollector
            .collect(&lookup_resource(&path, "a"))
            .await
            .unwrap_err();

        assert!(matches!(error, FactGatheringError::Failed { .. }));
    }

    #[test]
    fn test_parse_ini_sections() {
        let document = parse_ini("top = a\n[main]\nkey: \"quoted\"\n# comment\n");

        assert_eq!(lookup(&document, "top"), Some(&Value::String("a".to_owned())));
        assert_eq!(
            lookup(&document, "main.key"),
            Some(&Value::String("quoted".to_owned()))
        );
    }
}

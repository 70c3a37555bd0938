use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;

use crate::rules::TargetContext;
use crate::runner::RunnerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub runner: RunnerSection,
    pub target: TargetSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub workers: Option<usize>,
    pub default_timeout_secs: Option<u64>,
}

/// Overrides for what is detected from the local host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub hostname: Option<String>,
    pub platform: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Config {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Zero workers or a zero timeout fall back to the defaults.
    pub fn runner_config(&self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            workers: self
                .runner
                .workers
                .filter(|workers| *workers > 0)
                .unwrap_or(defaults.workers),
            default_timeout: self
                .runner
                .default_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
        }
    }

    pub fn target_context(&self) -> TargetContext {
        let hostname = self
            .target
            .hostname
            .clone()
            .or_else(System::host_name)
            .unwrap_or_else(|| "localhost".to_owned());
        let platform = self
            .target
            .platform
            .clone()
            .unwrap_or_else(detected_platform);

        let mut context = TargetContext::new(&hostname, &platform);
        if let Some(os_version) = System::os_version() {
            context = context.with_attribute("os_version", &os_version);
        }
        if let Some(kernel_version) = System::kernel_version() {
            context = context.with_attribute("kernel_version", &kernel_version);
        }
        for (key, value) in &self.target.attributes {
            context = context.with_attribute(key, value);
        }
        context
    }
}

/// `rhel9` style identifier: distribution id plus the major OS version.
fn detected_platform() -> String {
    let distribution = System::distribution_id();
    match System::os_version()
        .as_deref()
        .and_then(|version| version.split('.').next())
    {
        Some(major) if !major.is_empty() => format!("{}{}", distribution, major),
        _ => distribution,
    }
}

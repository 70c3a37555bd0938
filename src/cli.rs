use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use caserta::collectors::{CollectorsRegistry, CollectorsRegistryBuilder};
use caserta::config::Config;
use caserta::reporter::Reporter;
use caserta::ruleset::{RuleSet, RuleSetLoader};
use caserta::runner::Runner;

/// Exit code for anything that stops the run before a rule executes.
pub const EXIT_FATAL: u8 = 3;

/// caserta - declarative compliance rule engine
#[derive(Parser, Debug)]
#[command(name = "caserta")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a caserta.toml configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a rule-set against this host
    Run {
        /// Baseline rule-set (YAML or JSON)
        ruleset: PathBuf,

        /// Platform overlays, applied in order
        #[arg(long = "overlay")]
        overlays: Vec<PathBuf>,

        /// Number of rules evaluated concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Default per-rule collection timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(short, long, value_enum, default_value_t = Format::Pretty)]
        format: Format,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only evaluate these rule ids
        #[arg(long = "rule")]
        rules: Vec<String>,
    },

    /// Load and validate a rule-set without running it
    Validate {
        ruleset: PathBuf,

        #[arg(long = "overlay")]
        overlays: Vec<PathBuf>,
    },

    /// List the registered collectors and their versions
    Collectors,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Pretty,
}

impl Cli {
    /// `--log-level` first, then the config file. Either one replaces the
    /// level taken from `RUST_LOG`.
    pub fn log_level_override(&self, config: Option<&Config>) -> Option<String> {
        self.log_level
            .clone()
            .or_else(|| config.and_then(|config| config.log_level.clone()))
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::load_from(path)?),
        None => Ok(Config::default()),
    }
}

/// Runs the selected command, returning the process exit code.
pub async fn execute(cli: Cli, config: Config) -> anyhow::Result<u8> {
    let registry = CollectorsRegistryBuilder::with_builtin_collectors().build_registry();

    match cli.command {
        Commands::Run {
            ruleset,
            overlays,
            workers,
            timeout,
            format,
            output,
            rules,
        } => {
            let rule_set = load_rule_set(&registry, &ruleset, &overlays)?;
            let rule_set = if rules.is_empty() {
                rule_set
            } else {
                rule_set.select(&rules)?
            };

            let mut runner_config = config.runner_config();
            if let Some(workers) = workers.filter(|workers| *workers > 0) {
                runner_config.workers = workers;
            }
            if let Some(secs) = timeout.filter(|secs| *secs > 0) {
                runner_config.default_timeout = Duration::from_secs(secs);
            }

            let target = config.target_context();
            let runner = Runner::new(Arc::new(registry), runner_config);
            let result = runner.run_until(&rule_set, &target, interrupted()).await;

            let sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path)
                        .with_context(|| format!("creating report {}", path.display()))?,
                )),
                None => Box::new(std::io::stdout().lock()),
            };
            match format {
                Format::Json => Reporter::emit(&result, sink)?,
                Format::Pretty => Reporter::emit_text(&result, sink)?,
            }

            Ok(result.exit_code())
        }
        Commands::Validate { ruleset, overlays } => {
            let rule_set = load_rule_set(&registry, &ruleset, &overlays)?;
            let manual = rule_set.rules().iter().filter(|rule| rule.is_manual()).count();
            println!(
                "{}: {} rules ({} automated, {} manual review)",
                rule_set.name,
                rule_set.len(),
                rule_set.len() - manual,
                manual
            );
            Ok(0)
        }
        Commands::Collectors => {
            for collector in registry.inspect_collectors() {
                println!("{}", collector);
            }
            Ok(0)
        }
    }
}

fn load_rule_set(
    registry: &CollectorsRegistry,
    ruleset: &Path,
    overlays: &[PathBuf],
) -> anyhow::Result<RuleSet> {
    RuleSetLoader::new(registry)
        .load_with_overlays(ruleset, overlays)
        .with_context(|| format!("loading rule-set {}", ruleset.display()))
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run is simply
/// never interrupted.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("interrupt received, cancelling the run"),
        Err(err) => {
            warn!("unable to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "caserta",
            "run",
            "rhel9.yaml",
            "--overlay",
            "fips.yaml",
            "--overlay",
            "site.json",
            "--format",
            "json",
            "--rule",
            "V-230296",
            "-w",
            "4",
        ]);

        match cli.command {
            Commands::Run {
                ruleset,
                overlays,
                workers,
                format,
                rules,
                ..
            } => {
                assert_eq!(ruleset, PathBuf::from("rhel9.yaml"));
                assert_eq!(overlays.len(), 2);
                assert_eq!(workers, Some(4));
                assert_eq!(format, Format::Json);
                assert_eq!(rules, vec!["V-230296".to_owned()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_level_precedence() {
        let config = Config::parse("log_level = \"warn\"").unwrap();
        let with_flag = Cli::parse_from(["caserta", "--log-level", "debug", "collectors"]);
        let without_flag = Cli::parse_from(["caserta", "collectors"]);

        assert_eq!(
            with_flag.log_level_override(Some(&config)).as_deref(),
            Some("debug")
        );
        assert_eq!(
            without_flag.log_level_override(Some(&config)).as_deref(),
            Some("warn")
        );
        assert_eq!(without_flag.log_level_override(None), None);
        assert_eq!(
            without_flag.log_level_override(Some(&Config::default())),
            None
        );
    }

    #[tokio::test]
    async fn test_run_writes_json_report_and_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let checked = dir.path().join("sshd_config");
        std::fs::write(&checked, "PermitRootLogin yes\n").unwrap();

        let ruleset = dir.path().join("rules.yaml");
        std::fs::write(
            &ruleset,
            format!(
                r#"
name: local
rules:
  - id: R1
    title: root login disabled
    severity: high
    resource: {{ collector: file_text, path: "{}" }}
    expectation: {{ comparator: regex_present, value: '^PermitRootLogin\s+no' }}
"#,
                checked.display()
            ),
        )
        .unwrap();
        let report = dir.path().join("report.json");

        let cli = Cli::parse_from([
            "caserta",
            "run",
            ruleset.to_str().unwrap(),
            "--format",
            "json",
            "--output",
            report.to_str().unwrap(),
        ]);
        let code = execute(cli, Config::default()).await.unwrap();

        assert_eq!(code, 1);
        let parsed = Reporter::parse(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(parsed.summary.finding, 1);
        assert_eq!(parsed.results[0].id, "R1");
    }

    #[tokio::test]
    async fn test_unknown_rule_selection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ruleset = dir.path().join("rules.yaml");
        std::fs::write(
            &ruleset,
            "rules:\n  - { id: R1, title: manual, severity: low }\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "caserta",
            "run",
            ruleset.to_str().unwrap(),
            "--rule",
            "R9",
        ]);

        assert!(execute(cli, Config::default()).await.is_err());
    }
}

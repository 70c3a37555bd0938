use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::Command;

use super::{required_param, Collected, Collector, FactGatheringError, FactValue, COMMAND_OUTPUT};
use crate::rules::ResourceReference;

/// A non-zero exit is recorded, not treated as a failure. The child is
/// killed when the collection future is dropped.
pub struct CommandOutputCollector;

#[async_trait::async_trait]
impl Collector for CommandOutputCollector {
    async fn collect(
        &self,
        resource: &ResourceReference,
    ) -> Result<Collected, FactGatheringError> {
        let command = required_param(resource, COMMAND_OUTPUT, "command")?;
        let args = resource.param_strings("args").unwrap_or_default();
        let shape = resource.param_str("stdout_as").unwrap_or("text");

        let output = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| FactGatheringError::Failed {
                collector: COMMAND_OUTPUT.to_owned(),
                reason: match err.kind() {
                    ErrorKind::NotFound => format!("command `{}` not found", command),
                    _ => format!("spawning `{}`: {}", command, err),
                },
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let exit_code = output.status.code();

        if !output.status.success() {
            debug!("`{}` exited with {:?}", command, exit_code);
        }

        Ok(Collected {
            value: shape_stdout(stdout, shape)?,
            exit_code,
            stderr: (!stderr.is_empty()).then_some(stderr),
        })
    }

    fn name(&self) -> String {
        COMMAND_OUTPUT.to_owned()
    }
}

fn shape_stdout(stdout: String, shape: &str) -> Result<FactValue, FactGatheringError> {
    match shape {
        "text" => Ok(FactValue::Text(stdout)),
        "lines" => Ok(FactValue::Lines(
            stdout
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        )),
        "number" => stdout
            .trim()
            .parse::<f64>()
            .map(FactValue::Number)
            .map_err(|_| FactGatheringError::Failed {
                collector: COMMAND_OUTPUT.to_owned(),
                reason: format!("stdout `{}` is not a number", stdout.trim()),
            }),
        other => Err(FactGatheringError::InvalidParameters {
            collector: COMMAND_OUTPUT.to_owned(),
            reason: format!("unsupported stdout_as `{}`", other),
        }),
    }
}

//! Simulation collaborator that drives the model through shell scripts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use hc_optimizer::{SimulationRequest, SimulationRunner};
use hc_types::{CalibError, CalibResult};

/// Shell commands for one trial. Arguments are appended to each command.
///
/// An empty command skips its step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellCommands {
    /// Called as `<apply> <name> <type> <value>` per variable before the run.
    pub apply: String,
    pub run: String,
    /// Called as `<reset> <name> <type> <value>` per variable after the run.
    pub reset: String,
    /// Called as `<collect> sim_<tag>` once the run finished.
    pub collect: String,
    /// Upper bound on any single command, in seconds.
    pub timeout_seconds: Option<f64>,
}

impl Default for ShellCommands {
    fn default() -> Self {
        Self {
            apply: "./update_soil_properties.sh".to_string(),
            run: "./run_WH.sh".to_string(),
            reset: "./reset_soil_properties.sh".to_string(),
            collect: "./output_dir.sh".to_string(),
            timeout_seconds: None,
        }
    }
}

impl ShellCommands {
    pub fn validate(&self) -> CalibResult<()> {
        if self.run.trim().is_empty() {
            return Err(CalibError::invalid_parameter(
                "commands.run",
                "the model run command must not be empty",
            ));
        }
        if let Some(secs) = self.timeout_seconds {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(CalibError::invalid_parameter(
                    "commands.timeout_seconds",
                    format!("{secs} is not a positive duration"),
                ));
            }
        }
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs_f64)
    }
}

/// Runs each trial as apply, run, reset, collect in the model directory.
#[derive(Debug, Clone)]
pub struct ShellSimulation {
    working_dir: PathBuf,
    commands: ShellCommands,
}

impl ShellSimulation {
    pub fn new<P: AsRef<Path>>(working_dir: P, commands: ShellCommands) -> CalibResult<Self> {
        commands.validate()?;
        Ok(Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            commands,
        })
    }

    async fn invoke(&self, iteration: usize, command: &str, args: &[String]) -> CalibResult<()> {
        if command.trim().is_empty() {
            return Ok(());
        }
        let line = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("Iteration {}: $ {}", iteration, line);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match self.commands.timeout() {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| {
                CalibError::SimulationFailure {
                    iteration,
                    message: format!("`{line}` timed out after {limit:?}"),
                }
            })?,
            None => child.await,
        }
        .map_err(|e| CalibError::SimulationFailure {
            iteration,
            message: format!("failed to spawn `{line}`: {e}"),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CalibError::SimulationFailure {
                iteration,
                message: format!("`{line}` exited with {}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SimulationRunner for ShellSimulation {
    async fn run(&mut self, request: &SimulationRequest) -> CalibResult<()> {
        let iteration = request.tag.iteration;
        let trial = self.apply_and_run(request).await;

        // The model inputs are restored even when the trial failed, so a
        // later baseline never sees perturbed values.
        if !request.baseline {
            let reset = self.reset(request).await;
            match (&trial, reset) {
                (Ok(()), Err(e)) => return Err(e),
                (Err(_), Err(e)) => warn!("Iteration {}: reset after failure: {}", iteration, e),
                _ => {}
            }
        }
        trial?;

        self.invoke(iteration, &self.commands.collect, &[request.tag.sim_dir()])
            .await
    }
}

impl ShellSimulation {
    async fn apply_and_run(&self, request: &SimulationRequest) -> CalibResult<()> {
        let iteration = request.tag.iteration;
        if !request.baseline {
            for a in &request.assignments {
                let args = [a.name.clone(), a.kind.tag().to_string(), a.value.to_string()];
                self.invoke(iteration, &self.commands.apply, &args).await?;
            }
        }

        info!("Iteration {}: running model", request.tag);
        self.invoke(iteration, &self.commands.run, &[]).await
    }

    async fn reset(&self, request: &SimulationRequest) -> CalibResult<()> {
        let iteration = request.tag.iteration;
        for a in &request.assignments {
            let args = [
                a.name.clone(),
                a.kind.tag().to_string(),
                a.reset_value.to_string(),
            ];
            self.invoke(iteration, &self.commands.reset, &args).await?;
        }
        Ok(())
    }
}

//! Shared fixture for driving the steprun binary against a scratch tree.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

pub struct RunnerFixture {
    pub dir: TempDir,
    pub steps_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl RunnerFixture {
    /// Write `steps` (a full step-table document) into a scratch directory.
    pub fn new(steps: &Value) -> Result<Self> {
        let dir = TempDir::new().context("create fixture dir")?;
        let steps_path = dir.path().join("build_steps.json");
        std::fs::write(&steps_path, serde_json::to_string_pretty(steps)?)
            .context("write step table")?;
        let logs_dir = dir.path().join("logs");
        Ok(RunnerFixture {
            dir,
            steps_path,
            logs_dir,
        })
    }

    /// Write a tool config document next to the step table.
    pub fn write_config(&self, config: &Value) -> Result<PathBuf> {
        let path = self.dir.path().join("tool_config.json");
        std::fs::write(&path, serde_json::to_string_pretty(config)?)
            .context("write tool config")?;
        Ok(path)
    }

    /// Invoke the built binary with `args` appended after the subcommand's
    /// fixed `--steps`/`--logs` wiring.
    pub fn run(&self, subcommand: &str, extra: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_steprun"));
        cmd.arg(subcommand)
            .arg("--steps")
            .arg(&self.steps_path);
        if subcommand == "run" {
            cmd.arg("--logs").arg(&self.logs_dir);
        }
        cmd.args(extra);
        cmd.output().context("run steprun")
    }

    /// Names of the per-step log files written so far.
    pub fn log_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.logs_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

pub fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

//! Step execution: resolve, prepare, run, report, diagnose.
//!
//! One [`RunContext`] owns everything a run needs (logs directory, variable
//! map, output mode, diagnostics wiring) plus the run's mutable tallies.
//! Steps execute strictly one at a time; the executor returns each step's
//! raw exit code and leaves the continue-or-stop decision to the caller.

use crate::color::{Color, Line};
use crate::config::AssistConfig;
use crate::diagnose::{self, AdviceProvider};
use crate::steps::{ResolvedStep, StepTable};
use crate::text;
use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Total printable width of the status-line prefix, filler included.
pub const DEFAULT_STATUS_WIDTH: usize = 70;

/// Exit code reported when the child died without one (signal) or could not
/// be spawned at all; 127 matches the shell's command-not-found convention.
const SPAWN_FAILURE_CODE: i32 = 127;
const SIGNAL_DEATH_CODE: i32 = 128;

/// Per-run state for the step executor. Replaces the process-wide globals
/// of a script-style runner: nothing in here outlives the run.
pub struct RunContext {
    logs_dir: PathBuf,
    vars: BTreeMap<String, String>,
    verbose: bool,
    status_width: usize,
    assist: AssistConfig,
    provider: Box<dyn AdviceProvider>,
    last_log_path: Option<PathBuf>,
    warning_total: usize,
}

/// What one step execution produced. Ephemeral; the interesting parts are
/// folded into the context's tallies.
struct ExecutionRecord {
    log_path: PathBuf,
    exit_code: i32,
    /// `None` when output was streamed to the console: the count is
    /// unavailable in that mode, not zero.
    warning_count: Option<usize>,
}

impl RunContext {
    pub fn new(
        logs_dir: PathBuf,
        vars: BTreeMap<String, String>,
        verbose: bool,
        assist: AssistConfig,
        provider: Box<dyn AdviceProvider>,
    ) -> Self {
        RunContext {
            logs_dir,
            vars,
            verbose,
            status_width: DEFAULT_STATUS_WIDTH,
            assist,
            provider,
            last_log_path: None,
            warning_total: 0,
        }
    }

    pub fn with_status_width(mut self, width: usize) -> Self {
        self.status_width = width;
        self
    }

    /// Log file of the most recent execution, for the caller's failure
    /// excerpt.
    pub fn last_log_path(&self) -> Option<&PathBuf> {
        self.last_log_path.as_ref()
    }

    /// Warnings accumulated across all quiet-mode steps so far.
    pub fn warning_total(&self) -> usize {
        self.warning_total
    }

    /// Execute one step by index and return its raw exit code.
    ///
    /// A missing index is reported and treated as a no-op success. Table
    /// defects (failed expansion, inaccessible work directory) are fatal
    /// errors, distinct from the step's command failing.
    pub fn run_step(&mut self, table: &StepTable, index: u32) -> Result<i32> {
        // Resolve
        let Some(descriptor) = table.get(index) else {
            Line::new()
                .pushf(Color::Yellow, "No step with index %d, nothing to execute", [
                    index.to_string(),
                ])
                .print();
            return Ok(0);
        };
        let resolved = StepTable::expand(descriptor, &self.vars)?;

        // Prepare
        let timestamp = Local::now().format("%d%m%Y_%H%M%S").to_string();
        fs::create_dir_all(&self.logs_dir)
            .with_context(|| format!("create logs directory {}", self.logs_dir.display()))?;
        let log_path = self.logs_dir.join(format!(
            "{}_{}_{}.log",
            resolved.index, resolved.file_token, timestamp
        ));
        resolved.verify_work_path()?;

        // Run
        let started = Instant::now();
        let record = self.run_command(&resolved, log_path)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            step = resolved.index,
            exit_code = record.exit_code,
            elapsed_ms,
            warnings = record.warning_count,
            "step finished"
        );

        if let Some(count) = record.warning_count {
            self.warning_total += count;
        }
        self.last_log_path = Some(record.log_path.clone());

        // Report
        self.report(&resolved, &timestamp, &record);

        // Diagnose: only a breaking failure reaches the pipeline, and the
        // pipeline never changes the code the caller observes.
        let mut exit_code = record.exit_code;
        if exit_code != 0 && resolved.break_on_error {
            exit_code = diagnose::run(
                &record.log_path,
                exit_code,
                &self.assist,
                self.provider.as_ref(),
            );
        }
        Ok(exit_code)
    }

    /// Execute every step in table order.
    ///
    /// A failing step with `break_on_error` stops the run and becomes the
    /// overall exit code; other failures are reported and tolerated.
    pub fn run_sequence(&mut self, table: &StepTable) -> Result<i32> {
        self.run_sequence_from(table, 0)
    }

    /// Execute the steps whose index is at least `from`, in table order.
    ///
    /// This is the partial-rebuild path: earlier steps are skipped, not
    /// re-verified. A `from` past every index runs nothing and succeeds.
    pub fn run_sequence_from(&mut self, table: &StepTable, from: u32) -> Result<i32> {
        for index in table.indices() {
            if index < from {
                continue;
            }
            let exit_code = self.run_step(table, index)?;
            if exit_code != 0 {
                let breaks = table.get(index).is_some_and(|step| step.break_on_error);
                if breaks {
                    return Ok(exit_code);
                }
            }
        }
        Ok(0)
    }

    fn run_command(&self, resolved: &ResolvedStep, log_path: PathBuf) -> Result<ExecutionRecord> {
        let argv = shell_words::split(&resolved.command_line())
            .with_context(|| format!("parse command for step {}", resolved.index))?;
        let program = argv
            .first()
            .ok_or_else(|| anyhow!("step {} command is empty", resolved.index))?;

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        if let Some(dir) = &resolved.work_dir {
            cmd.current_dir(dir);
        }

        let stream = self.verbose || resolved.force_verbose;
        if !stream {
            let log_file = fs::File::create(&log_path)
                .with_context(|| format!("create step log {}", log_path.display()))?;
            let stderr_file = log_file
                .try_clone()
                .with_context(|| format!("share step log {}", log_path.display()))?;
            cmd.stdout(Stdio::from(log_file));
            cmd.stderr(Stdio::from(stderr_file));
        }

        let exit_code = match cmd.status() {
            Ok(status) => status.code().unwrap_or(SIGNAL_DEATH_CODE),
            Err(err) => {
                tracing::warn!(step = resolved.index, error = %err, "failed to spawn step command");
                SPAWN_FAILURE_CODE
            }
        };

        let warning_count = if stream {
            None
        } else {
            let content = fs::read_to_string(&log_path).unwrap_or_default();
            Some(text::count_occurrences(&content, "warning:"))
        };

        Ok(ExecutionRecord {
            log_path,
            exit_code,
            warning_count,
        })
    }

    fn report(&self, resolved: &ResolvedStep, timestamp: &str, record: &ExecutionRecord) {
        let prefix = format!(
            "{}_{} {} ",
            resolved.index, timestamp, resolved.description
        );
        let padded = text::pad_to_width(&prefix, self.status_width);
        let mut line = Line::new().push(Color::Reset, padded);
        if record.exit_code == 0 {
            line = line.push(Color::Green, "OK");
            if let Some(count) = record.warning_count.filter(|count| *count > 0) {
                line = line.pushf(Color::Yellow, " warnings: %d", [count.to_string()]);
            }
        } else {
            line = line.pushf(Color::Red, "Error (%d)", [record.exit_code.to_string()]);
        }
        line.print();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepDescriptor;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingAdvice {
        calls: Arc<AtomicUsize>,
    }

    impl AdviceProvider for CountingAdvice {
        fn query(&self, _d: &str, _s: &str, _t: Duration) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("stubbed out"))
        }
    }

    fn step(index: u32, description: &str, command: &str, break_on_error: bool) -> StepDescriptor {
        StepDescriptor {
            index,
            description: description.to_string(),
            work_path: None,
            execute_command: command.to_string(),
            execute_args: None,
            break_on_error,
            force_verbose: false,
        }
    }

    fn context(logs_dir: PathBuf, assist: AssistConfig, calls: Arc<AtomicUsize>) -> RunContext {
        RunContext::new(
            logs_dir,
            BTreeMap::new(),
            false,
            assist,
            Box::new(CountingAdvice { calls }),
        )
    }

    fn assist_enabled() -> AssistConfig {
        AssistConfig {
            enabled: true,
            timeout: Duration::from_secs(1),
            command: None,
        }
    }

    #[test]
    fn success_never_reaches_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), assist_enabled(), calls.clone());
        let table =
            StepTable::from_steps(vec![step(0, "Touch base", "true", true)]).unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_code_survives_disabled_assist() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls.clone());
        let table =
            StepTable::from_steps(vec![step(0, "Fail fast", "sh -c 'exit 2'", true)]).unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn breaking_failure_reaches_diagnostics_but_keeps_code() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), assist_enabled(), calls.clone());
        let table =
            StepTable::from_steps(vec![step(0, "Fail fast", "sh -c 'exit 2'", true)]).unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_index_is_a_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![step(0, "Only step", "true", false)]).unwrap();
        assert_eq!(ctx.run_step(&table, 42).unwrap(), 0);
        assert!(ctx.last_log_path().is_none());
    }

    #[test]
    fn quiet_mode_captures_output_and_counts_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![step(
            1,
            "Emit warnings",
            "sh -c 'echo warning: one; echo warning: two 1>&2'",
            false,
        )])
        .unwrap();
        assert_eq!(ctx.run_step(&table, 1).unwrap(), 0);
        assert_eq!(ctx.warning_total(), 2);
        let log_path = ctx.last_log_path().unwrap();
        let name = log_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("1_emit_warnings_"));
        assert!(name.ends_with(".log"));
        let content = fs::read_to_string(log_path).unwrap();
        assert_eq!(text::count_occurrences(&content, "warning:"), 2);
    }

    #[test]
    fn missing_work_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let mut descriptor = step(0, "Bad dir", "true", false);
        descriptor.work_path = Some("/definitely/not/a/real/dir".to_string());
        let table = StepTable::from_steps(vec![descriptor]).unwrap();
        assert!(ctx.run_step(&table, 0).is_err());
    }

    #[test]
    fn work_path_applies_to_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let mut descriptor = step(0, "Touch marker", "sh -c 'touch marker'", false);
        descriptor.work_path = Some(work.display().to_string());
        let table = StepTable::from_steps(vec![descriptor]).unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 0);
        assert!(work.join("marker").is_file());
    }

    #[test]
    fn sequence_stops_at_breaking_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("step3_ran");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![
            step(1, "First", "true", false),
            step(2, "Second", "sh -c 'exit 1'", true),
            step(
                3,
                "Third",
                &format!("sh -c 'touch {}'", marker.display()),
                false,
            ),
        ])
        .unwrap();
        assert_eq!(ctx.run_sequence(&table).unwrap(), 1);
        assert!(!marker.exists());
        let name = ctx
            .last_log_path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with("2_second_"));
    }

    #[test]
    fn sequence_from_skips_earlier_indices() {
        let dir = tempfile::tempdir().unwrap();
        let early = dir.path().join("step1_ran");
        let late = dir.path().join("step2_ran");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![
            step(
                1,
                "Early",
                &format!("sh -c 'touch {}'", early.display()),
                false,
            ),
            step(
                2,
                "Late",
                &format!("sh -c 'touch {}'", late.display()),
                false,
            ),
        ])
        .unwrap();
        assert_eq!(ctx.run_sequence_from(&table, 2).unwrap(), 0);
        assert!(!early.exists(), "resumed run must not revisit step 1");
        assert!(late.exists());
    }

    #[test]
    fn sequence_from_past_the_table_is_a_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![step(1, "Only step", "true", false)]).unwrap();
        assert_eq!(ctx.run_sequence_from(&table, 9).unwrap(), 0);
        assert!(ctx.last_log_path().is_none());
    }

    #[test]
    fn force_verbose_step_skips_capture_in_quiet_mode() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let mut descriptor = step(0, "Loud step", "sh -c 'echo warning: live'", false);
        descriptor.force_verbose = true;
        let table = StepTable::from_steps(vec![descriptor]).unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 0);
        // Streamed output is never counted...
        assert_eq!(ctx.warning_total(), 0);
        // ...and no log file is written for the step.
        let log_path = ctx.last_log_path().unwrap();
        assert!(!log_path.exists());
    }

    #[test]
    fn tolerated_failure_keeps_the_sequence_going() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("step2_ran");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![
            step(1, "Soft fail", "sh -c 'exit 5'", false),
            step(
                2,
                "After",
                &format!("sh -c 'touch {}'", marker.display()),
                false,
            ),
        ])
        .unwrap();
        assert_eq!(ctx.run_sequence(&table).unwrap(), 0);
        assert!(marker.exists());
    }

    #[test]
    fn unspawnable_command_reports_shell_convention_code() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = context(dir.path().join("logs"), AssistConfig::disabled(), calls);
        let table = StepTable::from_steps(vec![step(
            0,
            "Ghost tool",
            "definitely-not-a-real-binary-xyz",
            false,
        )])
        .unwrap();
        assert_eq!(ctx.run_step(&table, 0).unwrap(), 127);
    }
}

//! Best-effort failure diagnostics.
//!
//! When a step fails, this pipeline reads the step's log, finds the source
//! file implicated by the toolchain diagnostic, and forwards both to an
//! external advisory process for a human-readable hint. Every failure mode
//! in here degrades to "no insight available": the pipeline only ever adds
//! information and always returns the step's original exit code.

use crate::color::{Color, Line};
use crate::config::AssistConfig;
use crate::text;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Source extensions the extractor recognizes as diagnosable.
const SOURCE_EXTENSIONS: &[&str] = &["c", "h", "s", "S", "cc", "cpp", "cxx", "hpp"];

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// External advisory capability. The pipeline depends only on this
/// interface, so tests can substitute a stub.
pub trait AdviceProvider {
    /// Turn a diagnostic plus the offending source text into free-form
    /// guidance, within `timeout`.
    fn query(&self, diagnostic: &str, source: &str, timeout: Duration) -> Result<String>;
}

/// Advisory provider backed by an external command.
///
/// The command is invoked with three arguments: the diagnostic text, the
/// source file content, and the timeout in seconds. Whatever it writes to
/// stdout is the advice.
pub struct CommandAdvice {
    command: Option<String>,
}

impl CommandAdvice {
    pub fn new(command: Option<String>) -> Self {
        CommandAdvice { command }
    }
}

impl AdviceProvider for CommandAdvice {
    fn query(&self, diagnostic: &str, source: &str, timeout: Duration) -> Result<String> {
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("no advisory command configured"))?;
        let argv = shell_words::split(command)
            .with_context(|| format!("parse advisory command: {command}"))?;
        let program = argv
            .first()
            .ok_or_else(|| anyhow!("advisory command is empty"))?;

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(&argv[1..])
            .arg(diagnostic)
            .arg(source)
            .arg(timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn advisory command: {program}"))?;

        // Drain stdout on a helper thread so a chatty advisor cannot fill
        // the pipe and stall while we poll for the deadline.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("advisory stdout unavailable"))?;
        let reader = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = stdout.read_to_end(&mut bytes);
            bytes
        });

        let status = loop {
            if let Some(status) = child.try_wait().context("poll advisory process")? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                let _ = reader.join();
                return Err(anyhow!(
                    "advisory process timed out after {}s",
                    timeout.as_secs()
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let bytes = reader
            .join()
            .map_err(|_| anyhow!("advisory output reader panicked"))?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = bytes.len(),
            "advisory call complete"
        );
        if !status.success() {
            return Err(anyhow!("advisory process failed with status {status}"));
        }
        String::from_utf8(bytes).context("decode advisory stdout as UTF-8")
    }
}

/// Find the source file implicated by the first `<path>:<line>:<col>: error:`
/// diagnostic in ANSI-cleaned toolchain output.
///
/// Only the first match is considered; its path must carry a recognized
/// source extension and exist on disk, otherwise there is no extraction.
pub fn extract_source_file(cleaned: &str) -> Option<PathBuf> {
    let re = Regex::new(r"(?m)([^\s:]+):(\d+):(\d+):\s+error:")
        .expect("regex for compiler diagnostics");
    let captures = re.captures(cleaned)?;
    let path = PathBuf::from(captures.get(1)?.as_str());
    let extension = path.extension()?.to_str()?;
    if !SOURCE_EXTENSIONS.contains(&extension) {
        return None;
    }
    if !path.is_file() {
        return None;
    }
    Some(path)
}

/// Run the diagnostics pipeline for a failed step.
///
/// Always returns `exit_code` unchanged; internal failures are logged at
/// debug level and otherwise swallowed.
pub fn run(
    log_path: &Path,
    exit_code: i32,
    assist: &AssistConfig,
    provider: &dyn AdviceProvider,
) -> i32 {
    if !assist.enabled {
        return exit_code;
    }
    if let Err(err) = advise(log_path, assist, provider) {
        tracing::debug!(error = %err, log = %log_path.display(), "no diagnostic insight available");
    }
    exit_code
}

fn advise(log_path: &Path, assist: &AssistConfig, provider: &dyn AdviceProvider) -> Result<()> {
    let raw = fs::read_to_string(log_path)
        .with_context(|| format!("read step log {}", log_path.display()))?;
    if raw.trim().is_empty() {
        return Err(anyhow!("step log {} is empty", log_path.display()));
    }
    let diagnostic = text::strip_ansi(&raw);
    let source_path = extract_source_file(&diagnostic)
        .ok_or_else(|| anyhow!("no source file found in diagnostics"))?;
    let source = text::strip_ansi(
        &fs::read_to_string(&source_path)
            .with_context(|| format!("read source file {}", source_path.display()))?,
    );

    Line::new()
        .pushf(
            Color::Cyan,
            "Compilation error found in %s, requesting assistance...",
            [source_path.display().to_string()],
        )
        .print();

    let advice = provider.query(&diagnostic, &source, assist.timeout)?;
    println!("{advice}");
    Ok(())
}

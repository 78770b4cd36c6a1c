//! Step table model: ordered build-step descriptors with variable expansion.
//!
//! Tables come from a JSON document rooted at `"build_steps"` or are built
//! in-process; both forms behave identically after [`StepTable::expand`].
//! Table defects (duplicate indices, empty fields, unresolvable
//! placeholders) are configuration errors that abort the whole run, as
//! opposed to a step's command failing at execution time.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One row of the step table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepDescriptor {
    /// Stable ordinal; also part of the log file name.
    pub index: u32,
    pub description: String,
    /// Working directory for the step; current directory when absent.
    #[serde(default)]
    pub work_path: Option<String>,
    pub execute_command: String,
    /// Extra arguments appended to the command after expansion.
    #[serde(default)]
    pub execute_args: Option<String>,
    /// A non-zero exit triggers diagnostics and signals the caller to stop.
    #[serde(default)]
    pub break_on_error: bool,
    /// Stream this step's output even when the run is in quiet mode.
    #[serde(default)]
    pub force_verbose: bool,
}

#[derive(Debug, Deserialize)]
struct StepsFile {
    build_steps: Vec<StepDescriptor>,
}

/// The ordered sequence of steps for one run. Read-only once built.
#[derive(Debug, Clone)]
pub struct StepTable {
    steps: Vec<StepDescriptor>,
}

impl StepTable {
    /// Load and validate a step table document.
    pub fn load(path: &Path) -> Result<StepTable> {
        let bytes =
            fs::read(path).with_context(|| format!("read step table {}", path.display()))?;
        let file: StepsFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse step table {}", path.display()))?;
        StepTable::from_steps(file.build_steps)
    }

    /// Build a table from in-process descriptors, applying the same
    /// validation as the document loader.
    pub fn from_steps(steps: Vec<StepDescriptor>) -> Result<StepTable> {
        let mut seen = std::collections::BTreeSet::new();
        for step in &steps {
            if step.description.trim().is_empty() {
                return Err(anyhow!("step {} has an empty description", step.index));
            }
            if step.execute_command.trim().is_empty() {
                return Err(anyhow!("step {} has an empty execute_command", step.index));
            }
            if !seen.insert(step.index) {
                return Err(anyhow!("duplicate step index {}", step.index));
            }
        }
        Ok(StepTable { steps })
    }

    /// Look up a descriptor by index. A missing index is the caller's
    /// decision, not a fatal error.
    pub fn get(&self, index: u32) -> Option<&StepDescriptor> {
        self.steps.iter().find(|step| step.index == index)
    }

    /// Step indices in table (execution) order.
    pub fn indices(&self) -> Vec<u32> {
        self.steps.iter().map(|step| step.index).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Expand a descriptor's placeholder variables against `vars`.
    ///
    /// An unresolvable placeholder or an empty post-expansion command is a
    /// corrupt step table, never a per-step runtime failure.
    pub fn expand(step: &StepDescriptor, vars: &BTreeMap<String, String>) -> Result<ResolvedStep> {
        let command = expand_placeholders(&step.execute_command, vars)
            .with_context(|| format!("expand command for step {}", step.index))?;
        let args = step
            .execute_args
            .as_deref()
            .map(|args| expand_placeholders(args, vars))
            .transpose()
            .with_context(|| format!("expand arguments for step {}", step.index))?;
        let work_dir = step
            .work_path
            .as_deref()
            .map(|path| expand_placeholders(path, vars))
            .transpose()
            .with_context(|| format!("expand work path for step {}", step.index))?
            .map(PathBuf::from);

        let file_token = file_name_token(&step.description);
        if command.trim().is_empty() {
            return Err(anyhow!("step {} command is empty after expansion", step.index));
        }
        if file_token.is_empty() {
            return Err(anyhow!(
                "step {} description {:?} yields an empty file token",
                step.index,
                step.description
            ));
        }

        Ok(ResolvedStep {
            index: step.index,
            description: step.description.clone(),
            command,
            args,
            work_dir,
            file_token,
            break_on_error: step.break_on_error,
            force_verbose: step.force_verbose,
        })
    }
}

/// A descriptor after variable expansion, ready to execute.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    pub index: u32,
    pub description: String,
    pub command: String,
    pub args: Option<String>,
    pub work_dir: Option<PathBuf>,
    /// Filesystem-safe token derived from the description.
    pub file_token: String,
    pub break_on_error: bool,
    pub force_verbose: bool,
}

impl ResolvedStep {
    /// Full command line: command plus appended arguments.
    pub fn command_line(&self) -> String {
        match self.args.as_deref() {
            Some(args) if !args.trim().is_empty() => format!("{} {}", self.command, args),
            _ => self.command.clone(),
        }
    }

    /// Check that the work directory, when specified, is an accessible
    /// directory.
    pub fn verify_work_path(&self) -> Result<()> {
        if let Some(dir) = &self.work_dir {
            if !dir.is_dir() {
                return Err(anyhow!(
                    "step {} work path {} is not an accessible directory",
                    self.index,
                    dir.display()
                ));
            }
        }
        Ok(())
    }

    /// Check that the step's program resolves on PATH or as a file path.
    pub fn verify_command(&self) -> Result<()> {
        let argv = shell_words::split(&self.command)
            .with_context(|| format!("parse command for step {}", self.index))?;
        let program = argv
            .first()
            .ok_or_else(|| anyhow!("step {} command is empty", self.index))?;
        which::which(program)
            .map(|_| ())
            .map_err(|err| anyhow!("step {} command {program:?}: {err}", self.index))
    }
}

/// Substitute `${NAME}` placeholders from an explicit variable map.
///
/// The result is never re-evaluated by a shell; expansion is a pure string
/// substitution so it stays testable and injection-free.
fn expand_placeholders(text: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated placeholder in {text:?}"))?;
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| anyhow!("variable {name:?} is not set"))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Derive the log-file token from a description: lower-cased, spaces to
/// underscores, everything outside `[a-z0-9_]` removed.
fn file_name_token(description: &str) -> String {
    description
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '_')
        .collect()
}

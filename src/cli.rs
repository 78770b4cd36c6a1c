//! CLI argument parsing for the step runner.
//!
//! The CLI is intentionally thin: subcommands wire files and flags into the
//! executor without embedding policy, so the same core logic can be driven
//! from tests or other tooling.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::executor::DEFAULT_STATUS_WIDTH;

/// Root CLI entrypoint for the build-step runner.
#[derive(Parser, Debug)]
#[command(
    name = "steprun",
    version,
    about = "Sequential build-step runner with log capture and failure diagnostics",
    after_help = "Commands:\n  run --steps <file>       Execute the step table in index order\n  list --steps <file>      Print the step table\n  validate --steps <file>  Check table structure, work paths, and commands\n\nExamples:\n  steprun run --steps build_steps.json --logs out/logs\n  steprun run --steps build_steps.json --index 4 --verbose\n  steprun run --steps build_steps.json --config tool_config.json --var ROOT=/src\n  steprun validate --steps build_steps.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    List(ListArgs),
    Validate(ValidateArgs),
}

/// Run command inputs.
#[derive(Parser, Debug)]
#[command(about = "Execute build steps from a step table")]
pub struct RunArgs {
    /// Step table JSON document (rooted at "build_steps")
    #[arg(long, value_name = "FILE")]
    pub steps: PathBuf,

    /// Directory receiving one log file per executed step
    #[arg(long, value_name = "DIR", default_value = "logs")]
    pub logs: PathBuf,

    /// Tool config JSON (AI-assist flag, timeout, advisory command)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run only the step with this index
    #[arg(long, value_name = "N", conflicts_with = "from")]
    pub index: Option<u32>,

    /// Resume the sequence at the first step with index >= N
    #[arg(long, value_name = "N")]
    pub from: Option<u32>,

    /// Stream step output to the console instead of capturing to logs
    #[arg(long)]
    pub verbose: bool,

    /// Total printable width of the status-line prefix
    #[arg(long, value_name = "COLS", default_value_t = DEFAULT_STATUS_WIDTH)]
    pub width: usize,

    /// Extra expansion variables as NAME=VALUE (override the environment)
    #[arg(long, value_name = "KV")]
    pub var: Vec<String>,
}

/// List command inputs.
#[derive(Parser, Debug)]
#[command(about = "Print the step table")]
pub struct ListArgs {
    /// Step table JSON document (rooted at "build_steps")
    #[arg(long, value_name = "FILE")]
    pub steps: PathBuf,
}

/// Validate command inputs.
#[derive(Parser, Debug)]
#[command(about = "Validate step table structure, work paths, and commands")]
pub struct ValidateArgs {
    /// Step table JSON document (rooted at "build_steps")
    #[arg(long, value_name = "FILE")]
    pub steps: PathBuf,

    /// Tool config JSON to validate alongside the table
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra expansion variables as NAME=VALUE (override the environment)
    #[arg(long, value_name = "KV")]
    pub var: Vec<String>,
}

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod color;
mod config;
mod diagnose;
mod executor;
mod steps;
mod text;

use cli::{Command, ListArgs, RootArgs, RunArgs, ValidateArgs};
use color::{parse_tokens, Color, Line};
use config::AssistConfig;
use diagnose::CommandAdvice;
use executor::RunContext;
use steps::StepTable;

const EXCERPT_LINES: usize = 12;
const EXCERPT_WIDTH: usize = 80;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    let outcome = match args.command {
        Command::Run(args) => cmd_run(args),
        Command::List(args) => cmd_list(args),
        Command::Validate(args) => cmd_validate(args),
    };
    match outcome {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let table = StepTable::load(&args.steps)?;
    let assist = load_assist(args.config.as_deref())?;
    let vars = expansion_vars(&args.var)?;
    let provider = CommandAdvice::new(assist.command.clone());
    let mut ctx = RunContext::new(
        args.logs.clone(),
        vars,
        args.verbose,
        assist,
        Box::new(provider),
    )
    .with_status_width(args.width);

    let exit_code = match (args.index, args.from) {
        (Some(index), _) => ctx.run_step(&table, index)?,
        (None, Some(from)) => ctx.run_sequence_from(&table, from)?,
        (None, None) => ctx.run_sequence(&table)?,
    };

    if !args.verbose && ctx.warning_total() > 0 {
        Line::new()
            .pushf(Color::Yellow, "Total warnings: %d", [
                ctx.warning_total().to_string(),
            ])
            .print();
    }
    if exit_code != 0 {
        if let Some(log_path) = ctx.last_log_path() {
            print_failure_excerpt(log_path);
        }
    }
    Ok(exit_code)
}

fn cmd_list(args: ListArgs) -> Result<i32> {
    let table = StepTable::load(&args.steps)?;
    for step in table.iter() {
        let flags = match (step.break_on_error, step.force_verbose) {
            (true, true) => " [break, verbose]",
            (true, false) => " [break]",
            (false, true) => " [verbose]",
            (false, false) => "",
        };
        println!(
            "{:>3}  {:<30} {}{}",
            step.index,
            step.description,
            step.execute_command,
            flags
        );
    }
    println!("{} steps", table.len());
    Ok(0)
}

fn cmd_validate(args: ValidateArgs) -> Result<i32> {
    let table = StepTable::load(&args.steps)?;
    if let Some(config_path) = args.config.as_deref() {
        let doc = config::load_document(config_path)?;
        AssistConfig::from_document(&doc)
            .with_context(|| format!("validate config {}", config_path.display()))?;
    }
    let vars = expansion_vars(&args.var)?;

    let mut problems = 0usize;
    for step in table.iter() {
        let checked = StepTable::expand(step, &vars)
            .and_then(|resolved| {
                resolved.verify_work_path()?;
                resolved.verify_command()?;
                Ok(())
            });
        let index = step.index.to_string();
        match checked {
            Ok(()) => {
                parse_tokens([
                    "@reset",
                    "step %d %s: ",
                    index.as_str(),
                    step.description.as_str(),
                    "@green",
                    "OK",
                ])?
                .print();
            }
            Err(err) => {
                problems += 1;
                let message = format!("{err:#}");
                parse_tokens([
                    "@reset",
                    "step %d %s: ",
                    index.as_str(),
                    step.description.as_str(),
                    "@red",
                    "%s",
                    message.as_str(),
                ])?
                .print();
            }
        }
    }
    Ok(i32::from(problems > 0))
}

/// Build the expansion variable map: process environment first, `--var`
/// overrides on top.
fn expansion_vars(overrides: &[String]) -> Result<BTreeMap<String, String>> {
    let mut vars: BTreeMap<String, String> = std::env::vars().collect();
    for entry in overrides {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("--var must be NAME=VALUE (got {entry:?})"))?;
        if name.is_empty() {
            return Err(anyhow!("--var has an empty name (got {entry:?})"));
        }
        vars.insert(name.to_string(), value.to_string());
    }
    Ok(vars)
}

fn load_assist(config_path: Option<&Path>) -> Result<AssistConfig> {
    match config_path {
        Some(path) => {
            let doc = config::load_document(path)?;
            AssistConfig::from_document(&doc)
        }
        None => Ok(AssistConfig::disabled()),
    }
}

/// Show the tail of the last step log between separator rules after a run
/// aborts.
fn print_failure_excerpt(log_path: &Path) {
    let Ok(content) = fs::read_to_string(log_path) else {
        return;
    };
    if content.trim().is_empty() {
        return;
    }
    let rule = "=".repeat(EXCERPT_WIDTH);
    println!("{rule}");
    println!("Last lines of {}:", log_path.display());
    let tail = text::tail_lines(&content, EXCERPT_LINES).join("\n");
    for line in text::wrap_by_width(&tail, EXCERPT_WIDTH) {
        println!("{line}");
    }
    println!("{rule}");
}

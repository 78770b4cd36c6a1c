//! Tool configuration helpers.
//!
//! The runner consumes a small JSON key/value document. Everything it needs
//! goes through one primitive: extract a named field and resolve it against
//! an enumerated option set. Booleans are just two-element option lists.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;

const ASSIST_ENABLED_KEY: &str = "ai_insights_enabled";
const ASSIST_TIMEOUT_KEY: &str = "ai_insights_timeout_seconds";
const ASSIST_COMMAND_KEY: &str = "ai_insights_command";

const DEFAULT_ASSIST_TIMEOUT_SECONDS: u64 = 60;

/// Load a JSON config document. Unreadable or malformed input is a
/// configuration defect.
pub fn load_document(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
}

/// Resolve `field` in `doc` against `options`, case-insensitively.
///
/// Returns the zero-based index of the matching option. An absent or null
/// field, a non-scalar value, or a value matching no option is a
/// configuration defect.
pub fn extract_enumerated_field(doc: &Value, field: &str, options: &[&str]) -> Result<usize> {
    let value = doc
        .get(field)
        .filter(|value| !value.is_null())
        .ok_or_else(|| anyhow!("config field {field:?} is missing or null"))?;
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => {
            return Err(anyhow!(
                "config field {field:?} must be a scalar (got {other})"
            ))
        }
    };
    options
        .iter()
        .position(|option| option.eq_ignore_ascii_case(&text))
        .ok_or_else(|| {
            anyhow!(
                "config field {field:?} value {text:?} matches none of [{}]",
                options.join(", ")
            )
        })
}

/// AI-assist settings consumed by the diagnostics pipeline.
#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub enabled: bool,
    pub timeout: Duration,
    /// External advisory command line; split with shell-words at spawn time.
    pub command: Option<String>,
}

impl AssistConfig {
    /// Settings used when no config document was supplied.
    pub fn disabled() -> Self {
        AssistConfig {
            enabled: false,
            timeout: Duration::from_secs(DEFAULT_ASSIST_TIMEOUT_SECONDS),
            command: None,
        }
    }

    /// Read assist settings from a config document.
    ///
    /// The enable flag goes through [`extract_enumerated_field`] with a
    /// `["true", "false"]` option list, same as any other enumerated field.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let enabled = extract_enumerated_field(doc, ASSIST_ENABLED_KEY, &["true", "false"])? == 0;
        let timeout_seconds = match doc.get(ASSIST_TIMEOUT_KEY) {
            None | Some(Value::Null) => DEFAULT_ASSIST_TIMEOUT_SECONDS,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| anyhow!("config field {ASSIST_TIMEOUT_KEY:?} must be a number"))?,
        };
        let command = match doc.get(ASSIST_COMMAND_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| {
                        anyhow!("config field {ASSIST_COMMAND_KEY:?} must be a string")
                    })?
                    .to_string(),
            ),
        };
        Ok(AssistConfig {
            enabled,
            timeout: Duration::from_secs(timeout_seconds),
            command,
        })
    }
}

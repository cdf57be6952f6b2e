//! Process invoker configuration parsed from environment variables.

use std::time::Duration;

use crate::config::{Lookup, parse_or};

pub const DEFAULT_COMMAND: &str = "claude";
pub const DEFAULT_ARGS: &str = "-p --output-format text";
pub const DEFAULT_PROBE_ARGS: &str = "--version";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerConfig {
    /// Executable to spawn, resolved through `PATH`.
    pub command: String,
    /// Arguments for an analysis run. The prompt goes over stdin.
    pub args: Vec<String>,
    /// Arguments for the availability probe.
    pub probe_args: Vec<String>,
    /// Hard deadline for one analysis run.
    pub timeout: Duration,
    /// Deadline for the availability probe.
    pub probe_timeout: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            args: split_args(DEFAULT_ARGS),
            probe_args: split_args(DEFAULT_PROBE_ARGS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

impl InvokerConfig {
    /// Build typed invoker config from a key lookup.
    ///
    /// Optional:
    /// - `ANALYSIS_COMMAND`: default `claude`
    /// - `ANALYSIS_ARGS`: whitespace-separated, default `-p --output-format text`
    /// - `ANALYSIS_PROBE_ARGS`: default `--version`
    /// - `ANALYSIS_TIMEOUT_SECS`: default 120
    /// - `ANALYSIS_PROBE_TIMEOUT_SECS`: default 10
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let command = lookup("ANALYSIS_COMMAND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND.to_string());
        let args = split_args(&lookup("ANALYSIS_ARGS").unwrap_or_else(|| DEFAULT_ARGS.to_string()));
        let probe_args = split_args(&lookup("ANALYSIS_PROBE_ARGS").unwrap_or_else(|| DEFAULT_PROBE_ARGS.to_string()));

        Self {
            command,
            args,
            probe_args,
            timeout: Duration::from_secs(parse_or(lookup, "ANALYSIS_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)),
            probe_timeout: Duration::from_secs(parse_or(lookup, "ANALYSIS_PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS)),
        }
    }

    /// Command plus its run arguments, for logs.
    #[must_use]
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

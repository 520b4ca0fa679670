// Copyright 2024-2026 Speculate Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for speculate commands.
//!
//! ## Usage
//!
//! ```bash
//! speculate-cli generate --prompt "Alan Turing was a"
//! speculate-cli compare --prompt "Alan Turing was a" --json
//! speculate-cli check-tokenizers
//! speculate-cli config show
//! ```

pub mod config_cmd;
pub mod generate_cmd;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::InferenceError;

pub use generate_cmd::{run_check_tokenizers, run_compare, run_generate, ComparisonReport, GenerateArgs};

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingValue(_) | Self::UnknownArgument(_) | Self::InvalidValue { .. } => 2,
            Self::Config(_) => 2,
            Self::Inference(e) if e.is_fatal_precondition() => 2,
            Self::Inference(_) => 1,
        }
    }
}

/// Value following `flag` at `args[i]`.
pub(crate) fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| CliError::MissingValue(flag.to_string()))
}

/// Parse the value following `flag`.
pub(crate) fn parse_flag<T: std::str::FromStr>(
    args: &[String],
    i: usize,
    flag: &str,
) -> Result<T, CliError> {
    let raw = flag_value(args, i, flag)?;
    raw.parse::<T>().map_err(|_| CliError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flag_value_missing() {
        let a = args(&["--prompt"]);
        assert!(matches!(
            flag_value(&a, 0, "--prompt"),
            Err(CliError::MissingValue(_))
        ));
    }

    #[test]
    fn test_parse_flag_invalid() {
        let a = args(&["--draft-tokens", "four"]);
        let err = parse_flag::<usize>(&a, 0, "--draft-tokens").unwrap_err();
        assert!(matches!(err, CliError::InvalidValue { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_parse_flag_ok() {
        let a = args(&["--max-length", "64"]);
        assert_eq!(parse_flag::<usize>(&a, 0, "--max-length").unwrap(), 64);
    }
}

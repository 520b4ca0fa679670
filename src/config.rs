//! Configuration loading from a TOML file and environment variables.
//!
//! Values are resolved in three layers: built-in defaults, then the TOML
//! file named by `SPECULATE_CONFIG` (if any), then `SPECULATE_*` environment
//! variables. Invalid environment values fall back to the layer below
//! without crashing. Semantic checks happen in [`EnvConfig::validate`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `SPECULATE_CONFIG` | unset | Path to a TOML config file |
//! | `SPECULATE_DRAFT_TOKENS` | 4 | Draft tokens per iteration (K) |
//! | `SPECULATE_MAX_LENGTH` | 128 | Sequence budget, prompt included (N) |
//! | `SPECULATE_ENABLED` | true | Use the draft model at all |
//! | `SPECULATE_STOP_AT_EOS` | true | Stop after the first generated EOS |
//! | `SPECULATE_CANARY` | "Alan Turing was a" | Tokenizer compatibility canary |
//! | `SPECULATE_TIME_BUDGET_MS` | unset | Wall-clock budget per generation |
//! | `SPECULATE_TARGET_SEED` | 7 | Synthetic target model seed |
//! | `SPECULATE_DRAFT_SEED` | 8 | Synthetic draft perturbation seed |
//! | `SPECULATE_DRAFT_PERTURBATION` | 0.1 | Fraction of draft output rows redrawn |
//! | `SPECULATE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `SPECULATE_LOG_LEVEL` | info | `EnvFilter` directive string |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::SpeculativeConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Synthetic model settings used by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEnvConfig {
    pub target_seed: u64,
    pub draft_seed: u64,
    /// Fraction of the draft's output rows redrawn relative to the target.
    pub draft_perturbation: f64,
}

impl Default for ModelEnvConfig {
    fn default() -> Self {
        Self {
            target_seed: 7,
            draft_seed: 8,
            draft_perturbation: 0.1,
        }
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingFileConfig {
    pub format: String,
    pub level: String,
}

impl Default for LoggingFileConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default().as_str().to_string(),
            level: "info".to_string(),
        }
    }
}

/// On-disk TOML layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub speculative: SpeculativeConfig,
    pub models: ModelEnvConfig,
    pub logging: LoggingFileConfig,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

/// All configuration after defaults, file and environment are applied.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub speculative: SpeculativeConfig,
    pub models: ModelEnvConfig,
    pub log: LogConfig,
    /// Config file that was applied, if any.
    pub source: Option<PathBuf>,
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub draft_tokens: usize,
    pub max_length: usize,
    pub enabled: bool,
    pub stop_at_eos: bool,
    pub canary: String,
    pub time_budget_ms: Option<u64>,
    pub target_seed: u64,
    pub draft_seed: u64,
    pub draft_perturbation: f64,
    pub log_format: String,
    pub log_level: String,
    pub config_file: Option<String>,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<f64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a boolean env var (`true/false`, `1/0`, `yes/no`, `on/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_opt_u64(key: &str, default: Option<u64>) -> Option<u64> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().ok().or(default),
        Err(_) => default,
    }
}

/// Apply environment overrides to speculative settings.
fn load_speculative_config(base: SpeculativeConfig) -> SpeculativeConfig {
    // K is not floored here; zero must reach validation and be rejected there.
    let draft_tokens = parse_usize("SPECULATE_DRAFT_TOKENS", base.draft_tokens);
    let max_length = parse_usize("SPECULATE_MAX_LENGTH", base.max_length);
    let enabled = parse_bool("SPECULATE_ENABLED", base.enabled);
    let stop_at_eos = parse_bool("SPECULATE_STOP_AT_EOS", base.stop_at_eos);
    let canary = std::env::var("SPECULATE_CANARY").unwrap_or(base.canary);
    let time_budget_ms = parse_opt_u64("SPECULATE_TIME_BUDGET_MS", base.time_budget_ms);
    SpeculativeConfig {
        draft_tokens,
        max_length,
        enabled,
        stop_at_eos,
        canary,
        time_budget_ms,
    }
}

fn load_model_config(base: ModelEnvConfig) -> ModelEnvConfig {
    let target_seed = parse_u64("SPECULATE_TARGET_SEED", base.target_seed);
    let draft_seed = parse_u64("SPECULATE_DRAFT_SEED", base.draft_seed);
    let draft_perturbation = parse_f64("SPECULATE_DRAFT_PERTURBATION", base.draft_perturbation);
    ModelEnvConfig {
        target_seed,
        draft_seed,
        draft_perturbation,
    }
}

fn load_log_config(base: &LoggingFileConfig) -> LogConfig {
    let file_format = base.format.parse::<LogFormat>().unwrap_or_default();
    let format = match std::env::var("SPECULATE_LOG_FORMAT") {
        Ok(val) => val.parse::<LogFormat>().unwrap_or(file_format),
        Err(_) => file_format,
    };
    let level = std::env::var("SPECULATE_LOG_LEVEL").unwrap_or_else(|_| base.level.clone());
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load configuration from `SPECULATE_CONFIG` (if set) and the environment.
///
/// Fails only if the named config file cannot be read or parsed.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let source = std::env::var_os("SPECULATE_CONFIG").map(PathBuf::from);
    let file = match &source {
        Some(path) => FileConfig::from_path(path)?,
        None => FileConfig::default(),
    };
    Ok(load_with(file, source))
}

/// Apply environment overrides on top of an already parsed file config.
pub fn load_with(file: FileConfig, source: Option<PathBuf>) -> EnvConfig {
    EnvConfig {
        log: load_log_config(&file.logging),
        speculative: load_speculative_config(file.speculative),
        models: load_model_config(file.models),
        source,
    }
}

impl EnvConfig {
    /// Check values that have no safe fallback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.speculative
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !(0.0..=1.0).contains(&self.models.draft_perturbation) {
            return Err(ConfigError::Invalid(format!(
                "draft_perturbation {} outside [0, 1]",
                self.models.draft_perturbation
            )));
        }
        Ok(())
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            draft_tokens: self.speculative.draft_tokens,
            max_length: self.speculative.max_length,
            enabled: self.speculative.enabled,
            stop_at_eos: self.speculative.stop_at_eos,
            canary: self.speculative.canary.clone(),
            time_budget_ms: self.speculative.time_budget_ms,
            target_seed: self.models.target_seed,
            draft_seed: self.models.draft_seed,
            draft_perturbation: self.models.draft_perturbation,
            log_format: self.log.format.as_str().to_string(),
            log_level: self.log.level.clone(),
            config_file: self.source.as_ref().map(|p| p.display().to_string()),
        }
    }
}

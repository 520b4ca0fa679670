// Copyright 2024-2026 Speculate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration from `SPECULATE_CONFIG` and the
//! environment without building any model.

use crate::config::{self, EffectiveConfig, EnvConfig, FileConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show() -> i32 {
    match config::load() {
        Ok(env) => {
            print_config(&env.effective_config());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

/// Print default config values (no file, no env overrides) to stdout.
pub fn run_defaults() {
    let defaults = FileConfig::default();
    let env = EnvConfig {
        speculative: defaults.speculative,
        models: defaults.models,
        log: Default::default(),
        source: None,
    };
    print_config(&env.effective_config());
}

/// Validate configuration.
///
/// Returns 0 if valid, 1 if invalid, 2 if the config file cannot be loaded.
pub fn run_validate() -> i32 {
    let env = match config::load() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    validate(&env)
}

fn validate(env: &EnvConfig) -> i32 {
    if let Err(e) = env.validate() {
        eprintln!("ERROR: {}", e);
        return 1;
    }
    let cfg = env.effective_config();
    if !cfg.enabled {
        eprintln!("WARNING: SPECULATE_ENABLED is false; only the target model will run");
    }
    if cfg.draft_tokens > 16 {
        eprintln!(
            "WARNING: SPECULATE_DRAFT_TOKENS={} is large; most drafts will be discarded",
            cfg.draft_tokens
        );
    }
    println!("Configuration is valid.");
    0
}

fn print_config(cfg: &EffectiveConfig) {
    println!("SPECULATE_DRAFT_TOKENS={}", cfg.draft_tokens);
    println!("SPECULATE_MAX_LENGTH={}", cfg.max_length);
    println!("SPECULATE_ENABLED={}", cfg.enabled);
    println!("SPECULATE_STOP_AT_EOS={}", cfg.stop_at_eos);
    println!("SPECULATE_CANARY={}", cfg.canary);
    match cfg.time_budget_ms {
        Some(ms) => println!("SPECULATE_TIME_BUDGET_MS={}", ms),
        None => println!("SPECULATE_TIME_BUDGET_MS="),
    }
    println!("SPECULATE_TARGET_SEED={}", cfg.target_seed);
    println!("SPECULATE_DRAFT_SEED={}", cfg.draft_seed);
    println!("SPECULATE_DRAFT_PERTURBATION={}", cfg.draft_perturbation);
    println!("SPECULATE_LOG_FORMAT={}", cfg.log_format);
    println!("SPECULATE_LOG_LEVEL={}", cfg.log_level);
    println!(
        "SPECULATE_CONFIG={}",
        cfg.config_file.as_deref().unwrap_or_default()
    );
}

// Copyright 2024-2026 Speculate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Generation CLI subcommands: generate, compare, check-tokenizers.
//!
//! Runs against deterministic synthetic draft/target models built from the
//! loaded configuration, so every command works without model files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use super::{flag_value, parse_flag, CliError};
use crate::config::{ConfigError, EnvConfig};
use crate::engine::{
    ensure_compatible, ByteTokenizer, FinishReason, GenerationResult,
    SpeculativePipeline, SyntheticConfig, SyntheticModel, DEFAULT_CANARY,
};

type SyntheticPipeline = SpeculativePipeline<SyntheticModel, SyntheticModel, ByteTokenizer, ByteTokenizer>;

/// Arguments shared by `generate` and `compare`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateArgs {
    pub prompt: String,
    pub draft_tokens: Option<usize>,
    pub max_length: Option<usize>,
    pub naive: bool,
    pub json: bool,
}

impl Default for GenerateArgs {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_CANARY.to_string(),
            draft_tokens: None,
            max_length: None,
            naive: false,
            json: false,
        }
    }
}

impl GenerateArgs {
    /// Parse `args`, which start after the subcommand name.
    pub fn parse(args: &[String]) -> Result<Self, CliError> {
        let mut parsed = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--prompt" | "-p" => {
                    parsed.prompt = flag_value(args, i, "--prompt")?.to_string();
                    i += 2;
                }
                "--draft-tokens" | "-k" => {
                    parsed.draft_tokens = Some(parse_flag(args, i, "--draft-tokens")?);
                    i += 2;
                }
                "--max-length" | "-n" => {
                    parsed.max_length = Some(parse_flag(args, i, "--max-length")?);
                    i += 2;
                }
                "--naive" => {
                    parsed.naive = true;
                    i += 1;
                }
                "--json" => {
                    parsed.json = true;
                    i += 1;
                }
                other => return Err(CliError::UnknownArgument(other.to_string())),
            }
        }
        Ok(parsed)
    }

    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, env: &EnvConfig) -> EnvConfig {
        let mut env = env.clone();
        if let Some(k) = self.draft_tokens {
            env.speculative.draft_tokens = k;
        }
        if let Some(n) = self.max_length {
            env.speculative.max_length = n;
        }
        env
    }
}

/// Naive vs speculative run over the same prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub prompt: String,
    pub draft_tokens: usize,
    pub max_length: usize,
    pub identical: bool,
    pub naive_tokens: u32,
    pub speculative_tokens: u32,
    pub naive_target_passes: u64,
    pub speculative_target_passes: u64,
    pub iterations: u64,
    pub acceptance_rate: f64,
    pub estimated_speedup: f64,
    pub naive_ms: f64,
    pub speculative_ms: f64,
    pub finish_reason: FinishReason,
}

/// Build the synthetic draft/target pair described by `env`.
///
/// Fails with a config error when `max_length` exceeds the models' context window.
pub fn build_pipeline(env: &EnvConfig) -> Result<SyntheticPipeline, CliError> {
    let target_config = SyntheticConfig {
        eos_token: Some(ByteTokenizer::EOS),
        ..SyntheticConfig::default()
    }
    .with_seed(env.models.target_seed);
    if env.speculative.max_length > target_config.max_position {
        return Err(CliError::Config(ConfigError::Invalid(format!(
            "max_length {} exceeds the synthetic model context of {} positions",
            env.speculative.max_length, target_config.max_position
        ))));
    }
    let target = SyntheticModel::new("synthetic-target", target_config)?;
    let draft = SyntheticModel::perturbed(
        &target,
        "synthetic-draft",
        env.models.draft_seed,
        env.models.draft_perturbation,
    )?;
    Ok(SpeculativePipeline::new(
        draft,
        target,
        ByteTokenizer::with_eos(),
        ByteTokenizer::with_eos(),
        env.speculative.clone(),
    )?)
}

fn report_error(e: &CliError) -> i32 {
    eprintln!("Error: {}", e);
    e.exit_code()
}

/// Run `generate`. Setting `cancel` stops generation at the next iteration.
pub fn run_generate(env: &EnvConfig, args: &[String], cancel: &AtomicBool) -> i32 {
    match generate(env, args, cancel) {
        Ok(()) => 0,
        Err(e) => report_error(&e),
    }
}

fn generate(env: &EnvConfig, args: &[String], cancel: &AtomicBool) -> Result<(), CliError> {
    let args = GenerateArgs::parse(args)?;
    let env = args.apply(env);
    env.validate()?;
    let pipeline = build_pipeline(&env)?;

    let is_cancelled = || cancel.load(Ordering::SeqCst);
    let result = if args.naive {
        pipeline.generate_naive(&args.prompt)?
    } else {
        pipeline.generate_cancellable(&args.prompt, Some(&is_cancelled))?
    };

    if args.json {
        print_json(&result);
    } else {
        print_result(&args.prompt, &result);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

fn print_result(prompt: &str, result: &GenerationResult) {
    println!("{}{}", prompt, result.text);
    eprintln!(
        "tokens={} finish_reason={:?} iterations={} acceptance_rate={:.3} target_passes={}",
        result.tokens_generated,
        result.finish_reason,
        result.stats.iterations,
        result.stats.acceptance_rate(),
        result.stats.target_forward_passes,
    );
}

/// Run `compare`: naive and speculative generation, checked for equality.
///
/// Returns 1 if the two outputs differ.
pub fn run_compare(env: &EnvConfig, args: &[String]) -> i32 {
    match compare(env, args) {
        Ok(report) => {
            if report.identical {
                0
            } else {
                1
            }
        }
        Err(e) => report_error(&e),
    }
}

fn compare(env: &EnvConfig, args: &[String]) -> Result<ComparisonReport, CliError> {
    let args = GenerateArgs::parse(args)?;
    let env = args.apply(env);
    env.validate()?;
    let pipeline = build_pipeline(&env)?;

    let start = Instant::now();
    let naive = pipeline.generate_naive(&args.prompt)?;
    let naive_ms = start.elapsed().as_secs_f64() * 1000.0;

    let start = Instant::now();
    let fast = pipeline.generate(&args.prompt)?;
    let speculative_ms = start.elapsed().as_secs_f64() * 1000.0;

    let report = ComparisonReport {
        prompt: args.prompt.clone(),
        draft_tokens: env.speculative.draft_tokens,
        max_length: env.speculative.max_length,
        identical: naive.text == fast.text && naive.tokens_generated == fast.tokens_generated,
        naive_tokens: naive.tokens_generated,
        speculative_tokens: fast.tokens_generated,
        naive_target_passes: naive.stats.target_forward_passes,
        speculative_target_passes: fast.stats.target_forward_passes,
        iterations: fast.stats.iterations,
        acceptance_rate: fast.stats.acceptance_rate(),
        estimated_speedup: fast.stats.estimated_speedup(),
        naive_ms,
        speculative_ms,
        finish_reason: fast.finish_reason,
    };

    if args.json {
        print_json(&report);
    } else {
        println!("prompt:             {:?}", report.prompt);
        println!("K / N:              {} / {}", report.draft_tokens, report.max_length);
        println!("identical output:   {}", report.identical);
        println!("tokens generated:   {}", report.speculative_tokens);
        println!(
            "target passes:      {} naive, {} speculative",
            report.naive_target_passes, report.speculative_target_passes
        );
        println!("iterations:         {}", report.iterations);
        println!("acceptance rate:    {:.3}", report.acceptance_rate);
        println!("tokens per pass:    {:.2}", report.estimated_speedup);
        println!(
            "wall time:          {:.2} ms naive, {:.2} ms speculative",
            report.naive_ms, report.speculative_ms
        );
    }
    if !report.identical {
        eprintln!("ERROR: speculative output differs from naive greedy output");
    }
    Ok(report)
}

/// Run `check-tokenizers`: confirm the draft and target tokenizers agree on the canary.
pub fn run_check_tokenizers(env: &EnvConfig, args: &[String]) -> i32 {
    match check_tokenizers(env, args) {
        Ok(fp) => {
            println!("Tokenizers compatible (fingerprint {}).", fp);
            0
        }
        Err(e) => report_error(&e),
    }
}

#[cfg(not(feature = "hf-tokenizers"))]
fn check_tokenizers(env: &EnvConfig, args: &[String]) -> Result<String, CliError> {
    let canary = canary_arg(env, args)?;
    let tokenizer = ByteTokenizer::with_eos();
    Ok(ensure_compatible(&tokenizer, &tokenizer, &canary)?)
}

/// With `hf-tokenizers`, `--draft PATH --target PATH [--eos TOKEN]` compare two
/// `tokenizer.json` files; otherwise the built-in byte tokenizers are checked.
#[cfg(feature = "hf-tokenizers")]
fn check_tokenizers(env: &EnvConfig, args: &[String]) -> Result<String, CliError> {
    use crate::engine::{HfTokenizer, InferenceError, TokenizerError};

    let canary = canary_arg(env, args)?;
    let draft = path_arg(args, "--draft")?;
    let target = path_arg(args, "--target")?;
    let eos = match args.iter().position(|a| a == "--eos") {
        Some(i) => Some(flag_value(args, i, "--eos")?.to_string()),
        None => None,
    };

    match (draft, target) {
        (Some(draft), Some(target)) => {
            let draft = HfTokenizer::from_file(&draft, eos.as_deref()).map_err(InferenceError::from)?;
            let target = HfTokenizer::from_file(&target, eos.as_deref()).map_err(InferenceError::from)?;
            Ok(ensure_compatible(&draft, &target, &canary)?)
        }
        (None, None) => {
            let tokenizer = ByteTokenizer::with_eos();
            Ok(ensure_compatible(&tokenizer, &tokenizer, &canary)?)
        }
        _ => Err(CliError::Inference(InferenceError::Tokenizer(
            TokenizerError::Load("both --draft and --target are required".into()),
        ))),
    }
}

#[cfg(feature = "hf-tokenizers")]
fn path_arg(args: &[String], flag: &str) -> Result<Option<std::path::PathBuf>, CliError> {
    match args.iter().position(|a| a == flag) {
        Some(i) => Ok(Some(std::path::PathBuf::from(flag_value(args, i, flag)?))),
        None => Ok(None),
    }
}

fn canary_arg(env: &EnvConfig, args: &[String]) -> Result<String, CliError> {
    match args.iter().position(|a| a == "--canary") {
        Some(i) => Ok(flag_value(args, i, "--canary")?.to_string()),
        None => Ok(env.speculative.canary.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_with, FileConfig};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn env() -> EnvConfig {
        let mut env = load_with(FileConfig::default(), None);
        env.speculative = crate::engine::SpeculativeConfig::default();
        env.models = crate::config::ModelEnvConfig::default();
        env
    }

    #[test]
    fn test_parse_generate_args() {
        let parsed = GenerateArgs::parse(&args(&["-p", "hi", "-k", "5", "--max-length", "40", "--json"])).unwrap();
        assert_eq!(parsed.prompt, "hi");
        assert_eq!(parsed.draft_tokens, Some(5));
        assert_eq!(parsed.max_length, Some(40));
        assert!(parsed.json);
        assert!(!parsed.naive);
    }

    #[test]
    fn test_parse_unknown_argument() {
        assert!(matches!(
            GenerateArgs::parse(&args(&["--temperature", "0.7"])),
            Err(CliError::UnknownArgument(_))
        ));
    }

    #[test]
    fn test_compare_outputs_identical() {
        let report = compare(&env(), &args(&["-k", "3", "-n", "48"])).unwrap();
        assert!(report.identical);
        assert!(report.speculative_target_passes <= report.naive_target_passes);
    }

    #[test]
    fn test_zero_draft_tokens_is_config_error() {
        let err = compare(&env(), &args(&["-k", "0"])).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_max_length_beyond_context_is_config_error() {
        let context = SyntheticConfig::default().max_position;
        let too_long = (context + 1).to_string();
        let err = compare(&env(), &args(&["-n", &too_long])).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::Invalid(_))));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(run_compare(&env(), &args(&["-n", &too_long])), 2);
    }

    #[test]
    fn test_compare_at_full_context() {
        let context = SyntheticConfig::default().max_position.to_string();
        let prompt = "x".repeat(SyntheticConfig::default().max_position - 12);
        let report = compare(&env(), &args(&["-p", &prompt, "-k", "5", "-n", &context])).unwrap();
        assert!(report.identical);
    }

    #[test]
    fn test_generate_cancelled_before_start_still_succeeds() {
        let cancel = AtomicBool::new(true);
        assert_eq!(run_generate(&env(), &args(&["-n", "64"]), &cancel), 0);
    }

    #[test]
    fn test_check_tokenizers_default() {
        assert_eq!(run_check_tokenizers(&env(), &[]), 0);
    }
}

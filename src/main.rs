//! speculate-cli entry point.
//!
//! ## CLI Subcommands
//!
//! - `speculate-cli generate` - Generate text with speculative decoding
//! - `speculate-cli compare` - Compare naive and speculative output
//! - `speculate-cli check-tokenizers` - Check draft/target tokenizer agreement
//! - `speculate-cli config` - Show or validate configuration

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use speculate_core::cli::{config_cmd, run_check_tokenizers, run_compare, run_generate};
use speculate_core::config::{self as speculate_config, EnvConfig};
use speculate_core::telemetry::{init_logging, LogError};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest: Vec<String> = args.iter().skip(2).cloned().collect();

    match command {
        "generate" | "compare" | "check-tokenizers" => {
            let env = match load_env() {
                Ok(env) => env,
                Err(code) => return code,
            };
            let code = match command {
                "generate" => generate(env, rest).await,
                "compare" => run_blocking(move || run_compare(&env, &rest)).await,
                _ => run_check_tokenizers(&env, &rest),
            };
            exit_code(code)
        }
        "config" => {
            let subcommand = rest.first().map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => exit_code(config_cmd::run_show()),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = rest.first() {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("speculate-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Load configuration and initialize logging.
fn load_env() -> Result<EnvConfig, ExitCode> {
    let env = speculate_config::load().map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(2u8)
    })?;
    match init_logging(&env.log) {
        Ok(()) | Err(LogError::AlreadyInitialized) => Ok(env),
        Err(e) => {
            eprintln!("Error: {}", e);
            Err(ExitCode::from(2u8))
        }
    }
}

async fn run_blocking<F>(f: F) -> i32
where
    F: FnOnce() -> i32 + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: generation task failed: {}", e);
            1
        }
    }
}

/// Run `generate` off the async runtime; Ctrl-C cancels at the next iteration.
async fn generate(env: EnvConfig, args: Vec<String>) -> i32 {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping after the current iteration...");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let code = run_blocking(move || run_generate(&env, &args, &cancel)).await;
    watcher.abort();
    code
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "speculate-cli - Greedy speculative decoding v{}

USAGE:
    speculate-cli [COMMAND] [OPTIONS]

COMMANDS:
    generate           Generate text with speculative decoding
    compare            Run naive and speculative decoding and check they match
    check-tokenizers   Check that draft and target tokenizers agree
    config             Manage configuration (show, defaults, validate)
    version            Show version information
    help               Show this help message

EXAMPLES:
    speculate-cli generate --prompt \"Alan Turing was a\" -k 5 -n 100
    speculate-cli compare --prompt \"Alan Turing was a\" --json
    speculate-cli config validate

ENVIRONMENT:
    SPECULATE_CONFIG         TOML config file applied before env overrides
    SPECULATE_DRAFT_TOKENS   Draft tokens per iteration (K, default 4)
    SPECULATE_MAX_LENGTH     Sequence budget incl. prompt (N, default 128)
    SPECULATE_LOG_LEVEL      Log filter (default info)
    SPECULATE_LOG_FORMAT     json or pretty (default json)

EXIT CODES:
    0  Success
    1  Failure / outputs differ
    2  Configuration or input error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "generate" | "compare" => {
            eprintln!(
                "speculate-cli {} - Generate text

USAGE:
    speculate-cli {} [OPTIONS]

OPTIONS:
    -p, --prompt <TEXT>        Prompt text (default: \"Alan Turing was a\")
    -k, --draft-tokens <K>     Draft tokens per iteration
    -n, --max-length <N>       Sequence budget, prompt included
    --naive                    Target model only (generate)
    --json                     Output in JSON format

DESCRIPTION:
    Runs deterministic synthetic draft/target models. `compare` runs both
    naive and speculative decoding and exits 1 if their outputs differ.
    Ctrl-C stops `generate` at the next iteration boundary.
",
                command, command
            );
        }
        "check-tokenizers" => {
            eprintln!(
                "speculate-cli check-tokenizers - Check tokenizer agreement

USAGE:
    speculate-cli check-tokenizers [--canary TEXT] [--draft PATH --target PATH [--eos TOKEN]]

DESCRIPTION:
    Encodes the canary with both tokenizers and fails if the token ids or
    end-of-sequence tokens differ. Loading tokenizer.json files requires
    the hf-tokenizers feature.
"
            );
        }
        "config" => {
            eprintln!(
                "speculate-cli config - Manage configuration

USAGE:
    speculate-cli config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show default configuration
    validate       Validate configuration
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'speculate-cli help' for general usage.",
                command
            );
        }
    }
}

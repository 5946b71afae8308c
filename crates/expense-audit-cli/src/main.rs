//! Expense Audit CLI
//!
//! # Usage
//!
//! ```bash
//! # Compile every rule in a rule file
//! expense-audit check --rules demos/rules.yaml
//!
//! # Evaluate rules against a claim, with earlier claims for frequency checks
//! expense-audit evaluate --rules demos/rules.yaml --claim demos/claim.json --history demos/history.json
//!
//! # Full audit against the configured model endpoints
//! expense-audit --config demos/config.toml audit --rules demos/rules.yaml \
//!     --claim demos/claim.json --policies demos/policies --format json
//!
//! # Ask the policy corpus a question
//! expense-audit ask "What is the hotel cap for tier-1 cities?" --policies demos/policies
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Claim rejected, or invalid rules found
//! - 2: Audit failed
//! - 3: Invalid input or arguments
//! - 4: File not found or inaccessible
//! - 5: Audit cancelled
//! - 10: Internal error

mod cli;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{AuditCli, ExitCode, LogFormat};

fn init_tracing(cli: &AuditCli) {
    let level = if cli.quiet {
        tracing::Level::ERROR
    } else {
        match cli.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = AuditCli::parse();
    init_tracing(&cli);

    let exit_code = match cli::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from_error(&err)
        }
    };
    std::process::exit(exit_code.into());
}

//! CLI module for the expense audit engine
//!
//! Commands for checking rule files, evaluating rules against claims, running
//! full audits, and asking questions about the policy corpus.

pub mod commands;
pub mod loader;
pub mod output;

pub use commands::{AuditCli, AuditCommands, LogFormat};

use expense_audit_core::config::ConfigError;
use expense_audit_core::rules::RuleError;
use expense_audit_core::AuditError;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Command succeeded; the claim passed or every rule compiled
    Success = 0,
    /// The claim was rejected or a rule file has invalid rules
    Rejected = 1,
    /// The audit run ended in the Failed state
    AuditFailed = 2,
    /// Invalid input or arguments
    InvalidInput = 3,
    /// File not found or inaccessible
    FileError = 4,
    /// The audit was cancelled
    Cancelled = 5,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Classify an error that escaped a command
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<std::io::Error>().is_some() {
                return ExitCode::FileError;
            }
            if let Some(audit) = cause.downcast_ref::<AuditError>() {
                return if audit.is_user_error() {
                    ExitCode::InvalidInput
                } else {
                    ExitCode::InternalError
                };
            }
            if let Some(rule) = cause.downcast_ref::<RuleError>() {
                return match rule {
                    RuleError::Compile(_) | RuleError::DuplicateCode(_) => ExitCode::InvalidInput,
                    _ => ExitCode::InternalError,
                };
            }
            if cause.downcast_ref::<ConfigError>().is_some()
                || cause.downcast_ref::<serde_json::Error>().is_some()
                || cause.downcast_ref::<serde_yaml::Error>().is_some()
            {
                return ExitCode::InvalidInput;
            }
        }
        ExitCode::InternalError
    }
}

/// Load configuration and dispatch the selected command
pub async fn run(cli: AuditCli) -> anyhow::Result<ExitCode> {
    let config = loader::load_config(cli.config.as_deref())?;

    match cli.command {
        AuditCommands::Check { rules, format } => commands::execute_check(&rules, format),
        AuditCommands::Evaluate {
            rules,
            claim,
            history,
            format,
        } => commands::execute_evaluate(&config, &rules, &claim, history.as_deref(), format).await,
        AuditCommands::TestRule { expr, claim } => commands::execute_test_rule(&config, &expr, &claim).await,
        AuditCommands::Audit {
            rules,
            claim,
            policies,
            history,
            ann,
            metrics,
            format,
        } => {
            commands::execute_audit(
                &config,
                &rules,
                &claim,
                &policies,
                history.as_deref(),
                ann,
                metrics,
                format,
            )
            .await
        }
        AuditCommands::Ask {
            question,
            policies,
            top_k,
            format,
        } => commands::execute_ask(&config, &question, &policies, top_k, format).await,
        AuditCommands::Config { format } => commands::execute_config(&config, format),
    }
}

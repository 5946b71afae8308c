//! CLI command definitions for the expense audit engine
//!
//! Offline commands (`check`, `evaluate`, `test-rule`, `config`) only touch
//! the rule engine. `audit` and `ask` index the given policy documents into an
//! in-memory vector store and call the configured model endpoints.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use expense_audit_core::audit::CANCELLED_REASON;
use expense_audit_core::rag::{embedder_from_config, FixedConfidence, HttpChatClient, JudgmentClient};
use expense_audit_core::repository::{InMemoryAuditRepository, InMemoryClaimRepository, InMemoryRuleRepository};
use expense_audit_core::rules::{
    ContextBuilder, ExprRuleEngine, RuleEngine, RuleError, RuleExecutor, RuleService, ViolationAggregator,
};
use expense_audit_core::telemetry::AuditMetricsRegistry;
use expense_audit_core::vector::InMemoryVectorBackend;
use expense_audit_core::{
    AuditConfig, AuditOrchestrator, AuditStatus, Claim, DocumentIndexer, RagService, Rule, VectorStore,
};

use super::loader;
use super::output::{EvaluationOutput, MetricsOutput, OutputFormat, Render, RuleCheckEntry, RuleCheckOutput};
use super::ExitCode;

/// Expense audit CLI
///
/// Check audit rules, evaluate them against claims, and run full audits that
/// combine rule validation with policy retrieval and model judgment.
#[derive(Parser, Debug)]
#[command(name = "expense-audit")]
#[command(about = "Expense Audit - Rule validation and policy-grounded claim audits", long_about = None)]
#[command(version)]
pub struct AuditCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Configuration file (TOML or YAML)
    #[arg(short, long, global = true, env = "EXPENSE_AUDIT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: AuditCommands,
}

/// Log output formats
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    /// Compile every rule in a rule file and report errors with positions
    Check {
        /// Rule file (YAML or JSON)
        #[arg(short, long)]
        rules: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: Option<OutputFormat>,
    },

    /// Evaluate rules against a claim without semantic analysis
    Evaluate {
        /// Rule file (YAML or JSON)
        #[arg(short, long)]
        rules: PathBuf,

        /// Claim file (JSON or YAML)
        #[arg(long)]
        claim: PathBuf,

        /// Earlier claims used for duplicate-invoice and frequency checks
        #[arg(long)]
        history: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: Option<OutputFormat>,
    },

    /// Evaluate a single predicate against a claim
    TestRule {
        /// Predicate source, e.g. "amount <= 2000"
        #[arg(short, long)]
        expr: String,

        /// Claim file (JSON or YAML)
        #[arg(long)]
        claim: PathBuf,
    },

    /// Run a full audit: rule validation, policy retrieval and judgment
    Audit {
        /// Rule file (YAML or JSON)
        #[arg(short, long)]
        rules: PathBuf,

        /// Claim file (JSON or YAML)
        #[arg(long)]
        claim: PathBuf,

        /// Policy documents or directories of them
        #[arg(short, long, num_args = 1.., required = true)]
        policies: Vec<PathBuf>,

        /// Earlier claims used for duplicate-invoice and frequency checks
        #[arg(long)]
        history: Option<PathBuf>,

        /// Build the approximate index before searching
        #[arg(long)]
        ann: bool,

        /// Print Prometheus metrics after the audit
        #[arg(long)]
        metrics: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: Option<OutputFormat>,
    },

    /// Ask a free-form question about the policy documents
    Ask {
        /// The question
        question: String,

        /// Policy documents or directories of them
        #[arg(short, long, num_args = 1.., required = true)]
        policies: Vec<PathBuf>,

        /// Chunks to retrieve (0 uses the configured default)
        #[arg(long, default_value_t = 0)]
        top_k: usize,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: Option<OutputFormat>,
    },

    /// Print the effective configuration with secrets redacted
    Config {
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: Option<OutputFormat>,
    },
}

/// Compile every rule and report the results
pub fn execute_check(rules: &Path, format: Option<OutputFormat>) -> Result<ExitCode> {
    let rules = loader::load_rules(rules)?;
    let output = RuleCheckOutput::new(check_rules(&rules, &ExprRuleEngine::new()));
    output.render(format.unwrap_or_default())?;
    Ok(if output.valid {
        ExitCode::Success
    } else {
        ExitCode::Rejected
    })
}

fn check_rules(rules: &[Rule], engine: &dyn RuleEngine) -> Vec<RuleCheckEntry> {
    let mut seen = HashSet::new();
    rules
        .iter()
        .map(|rule| {
            let outcome = if seen.insert(rule.code.as_str()) {
                engine.validate(&rule.source)
            } else {
                Err(RuleError::DuplicateCode(rule.code.clone()))
            };
            let position = match &outcome {
                Err(RuleError::Compile(e)) => Some(e.position),
                _ => None,
            };
            RuleCheckEntry {
                code: rule.code.clone(),
                name: rule.name.clone(),
                rule_type: rule.rule_type.as_str().to_string(),
                valid: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
                position,
            }
        })
        .collect()
}

fn claim_repository(claim: &Claim, history: Option<&Path>) -> Result<InMemoryClaimRepository> {
    let mut claims = match history {
        Some(path) => loader::load_claims(path)?,
        None => Vec::new(),
    };
    claims.retain(|c| c.id != claim.id);
    claims.push(claim.clone());
    Ok(InMemoryClaimRepository::with_claims(claims))
}

fn rule_executor(rules: Vec<Rule>, config: &AuditConfig) -> Arc<RuleExecutor> {
    Arc::new(
        RuleExecutor::new(
            Arc::new(InMemoryRuleRepository::with_rules(rules)),
            Arc::new(ExprRuleEngine::new()),
        )
        .with_page_size(config.rules.page_size),
    )
}

/// Run the rule stage alone and report results and violations
pub async fn execute_evaluate(
    config: &AuditConfig,
    rules: &Path,
    claim: &Path,
    history: Option<&Path>,
    format: Option<OutputFormat>,
) -> Result<ExitCode> {
    let claim = loader::load_claim(claim)?;
    let claims = Arc::new(claim_repository(&claim, history)?);
    let executor = rule_executor(loader::load_rules(rules)?, config);

    let reload = executor.reload().await?;
    let library = executor.ensure_loaded().await?;
    let context = ContextBuilder::new(
        claims,
        std::time::Duration::from_millis(config.rules.repository_timeout_ms),
    )
    .build(&claim)
    .await?;

    let results = executor.execute_all(&library, &context);
    let report = ViolationAggregator::new().aggregate(&results);
    let output = EvaluationOutput::new(&claim.id, &reload, results, report);
    output.render(format.unwrap_or_default())?;

    Ok(if output.rule_pass {
        ExitCode::Success
    } else {
        ExitCode::Rejected
    })
}

/// Evaluate one predicate against a claim through the rule service
pub async fn execute_test_rule(config: &AuditConfig, expr: &str, claim: &Path) -> Result<ExitCode> {
    let claim = loader::load_claim(claim)?;
    let repository = Arc::new(InMemoryRuleRepository::new());
    let executor = Arc::new(
        RuleExecutor::new(repository.clone(), Arc::new(ExprRuleEngine::new()))
            .with_page_size(config.rules.page_size),
    );
    let service = RuleService::new(repository, executor);

    let context = ContextBuilder::new(
        Arc::new(claim_repository(&claim, None)?),
        std::time::Duration::from_millis(config.rules.repository_timeout_ms),
    )
    .build(&claim)
    .await?;

    let passed = service.test_rule(expr, &context)?;
    println!("{}", passed);
    Ok(if passed { ExitCode::Success } else { ExitCode::Rejected })
}

/// Index the policy corpus and wire the semantic stage
async fn rag_service(
    config: &AuditConfig,
    policies: &[PathBuf],
    metrics: Arc<AuditMetricsRegistry>,
    ann: bool,
) -> Result<Arc<RagService>> {
    let documents = loader::load_policies(policies)?;
    if documents.is_empty() {
        anyhow::bail!("No policy documents found");
    }

    let embedder = embedder_from_config(&config.embedding, config.vector.dimension)?;
    let store = VectorStore::new(Arc::new(InMemoryVectorBackend::new()), config.vector.clone()).with_metrics(metrics);
    let indexer = DocumentIndexer::new(embedder.clone(), store, &config.rag);

    let reports = indexer.index_all(&documents).await?;
    let chunks: usize = reports.iter().map(|r| r.chunks).sum();
    info!(documents = reports.len(), chunks, "Indexed policy documents");

    if ann {
        let lists = indexer.store().build_index(0).await?;
        info!(lists, "Built approximate index");
    }

    let chat = HttpChatClient::new(&config.chat).context("Failed to create chat client")?;
    let judgment = JudgmentClient::new(Arc::new(chat), &config.chat);
    let service = RagService::new(embedder, indexer.store().clone(), judgment)
        .with_query_scorer(Arc::new(FixedConfidence(config.rag.query_confidence)))
        .with_default_top_k(config.rag.top_k);
    Ok(Arc::new(service))
}

/// Run a full audit; Ctrl-C cancels the run
#[allow(clippy::too_many_arguments)]
pub async fn execute_audit(
    config: &AuditConfig,
    rules: &Path,
    claim: &Path,
    policies: &[PathBuf],
    history: Option<&Path>,
    ann: bool,
    show_metrics: bool,
    format: Option<OutputFormat>,
) -> Result<ExitCode> {
    let claim = loader::load_claim(claim)?;
    let claims = Arc::new(claim_repository(&claim, history)?);
    let executor = rule_executor(loader::load_rules(rules)?, config);
    let metrics = Arc::new(AuditMetricsRegistry::new()?);
    let rag = rag_service(config, policies, metrics.clone(), ann).await?;

    let report = executor.reload().await?;
    for rejected in &report.rejected {
        warn!(code = %rejected.code, error = %rejected.error, "Rule excluded from library");
    }

    let orchestrator = Arc::new(
        AuditOrchestrator::new(claims, Arc::new(InMemoryAuditRepository::new()), executor, rag, config)
            .with_metrics(metrics.clone()),
    );

    let handle = orchestrator.spawn_audit(&claim.id);
    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling audit");
            cancel.cancel();
        }
    });
    let result = handle.join().await;
    interrupt.abort();
    let result = result?;

    let format = format.unwrap_or_default();
    result.render(format)?;
    if show_metrics {
        MetricsOutput {
            metrics: metrics.encode_text()?,
        }
        .render(format)?;
    }

    Ok(match result.status {
        AuditStatus::Completed if result.final_pass == Some(true) => ExitCode::Success,
        AuditStatus::Completed => ExitCode::Rejected,
        AuditStatus::Failed if result.reason == CANCELLED_REASON => ExitCode::Cancelled,
        _ => ExitCode::AuditFailed,
    })
}

/// Answer a question from the policy corpus
pub async fn execute_ask(
    config: &AuditConfig,
    question: &str,
    policies: &[PathBuf],
    top_k: usize,
    format: Option<OutputFormat>,
) -> Result<ExitCode> {
    let metrics = Arc::new(AuditMetricsRegistry::new()?);
    let rag = rag_service(config, policies, metrics, false).await?;
    let answer = rag.query(question, top_k).await?;
    answer.render(format.unwrap_or_default())?;
    Ok(ExitCode::Success)
}

/// Print the effective configuration
pub fn execute_config(config: &AuditConfig, format: Option<OutputFormat>) -> Result<ExitCode> {
    let mut config = config.clone();
    for key in [&mut config.embedding.api_key, &mut config.chat.api_key] {
        if key.is_some() {
            *key = Some("****".to_string());
        }
    }

    match format.unwrap_or(OutputFormat::Yaml) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", serde_yaml::to_string(&config)?),
    }
    Ok(ExitCode::Success)
}

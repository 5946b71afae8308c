//! Expense Audit Decision Engine
//!
//! Decides whether an expense reimbursement claim complies with corporate
//! policy by combining deterministic rule validation with retrieval-augmented
//! judgment over a natural-language policy corpus.
//!
//! ## Architecture
//!
//! 1. **Rules** (`rules/`): expression-language rule compiler, versioned rule
//!    library with priority-ordered execution, violation aggregation and rule
//!    management.
//!
//! 2. **Vector store** (`vector/`): fixed-dimension chunk storage with vector,
//!    keyword, category and hybrid search plus an IVF approximate index.
//!
//! 3. **Indexer** (`indexer`): chunks and embeds policy documents.
//!
//! 4. **RAG** (`rag/`): embedding and chat clients, prompt composition,
//!    response validation and confidence scoring.
//!
//! 5. **Audit** (`audit/`): the orchestrator state machine and risk fusion.
//!
//! 6. **Repository** (`repository/`): collaborator traits with in-memory
//!    implementations.
//!
//! 7. **Telemetry** (`telemetry/`): Prometheus metrics.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use expense_audit_core::{
//!     config::AuditConfig,
//!     rag::{embedder_from_config, HttpChatClient, JudgmentClient, RagService},
//!     repository::{InMemoryAuditRepository, InMemoryClaimRepository, InMemoryRuleRepository},
//!     rules::{ExprRuleEngine, RuleExecutor},
//!     vector::VectorStore,
//!     AuditOrchestrator,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuditConfig::from_env();
//! let embedder = embedder_from_config(&config.embedding, config.vector.dimension)?;
//! let chat = Arc::new(HttpChatClient::new(&config.chat)?);
//! let rag = RagService::new(
//!     embedder,
//!     VectorStore::in_memory(config.vector.dimension),
//!     JudgmentClient::new(chat, &config.chat),
//! );
//! let executor = Arc::new(RuleExecutor::new(
//!     Arc::new(InMemoryRuleRepository::new()),
//!     Arc::new(ExprRuleEngine::new()),
//! ));
//! let orchestrator = AuditOrchestrator::new(
//!     Arc::new(InMemoryClaimRepository::new()),
//!     Arc::new(InMemoryAuditRepository::new()),
//!     executor,
//!     Arc::new(rag),
//!     &config,
//! );
//! let result = orchestrator.start_audit("claim-42").await?;
//! println!("final pass: {:?}, risk: {:?}", result.final_pass, result.risk_level);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod indexer;
pub mod model;
pub mod rag;
pub mod repository;
pub mod rules;
pub mod telemetry;
pub mod vector;

pub use audit::{AuditHandle, AuditOrchestrator, CancellationToken};
pub use config::AuditConfig;
pub use error::{AuditError, Result};
pub use indexer::{DocumentIndexer, PolicyDocument};
pub use model::{AuditResult, AuditStatus, Claim, ClaimFields, InvoiceFields, RiskLevel};
pub use rag::{AnalysisResult, Decision, RagService};
pub use rules::{Rule, RuleType, RuleValidationResult, Severity, Violation, ViolationReport};
pub use vector::{DocumentChunk, VectorSearchResult, VectorStore};

/// Crate version (from Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

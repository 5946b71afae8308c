//! Top-level error type for the audit engine
//!
//! Component errors keep their own enums; everything that crosses the
//! orchestrator or the CLI boundary is folded into [`AuditError`].

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::indexer::IndexError;
use crate::model::AuditStatus;
use crate::rag::RagError;
use crate::repository::RepositoryError;
use crate::rules::RuleError;
use crate::vector::VectorStoreError;

#[derive(Error, Debug)]
pub enum AuditError {
    /// The claim could not be read; no audit record was created
    #[error("Failed to fetch claim {claim_id}: {source}")]
    ClaimFetch {
        claim_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Rag(#[from] RagError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Indexing error: {0}")]
    Index(#[from] IndexError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Operation not allowed in the audit's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Audit {0} was cancelled")]
    Cancelled(Uuid),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A spawned audit task panicked or was aborted
    #[error("Audit task failed: {0}")]
    Task(String),
}

impl AuditError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        AuditError::InvalidState(msg.into())
    }

    /// Retry refused because the audit is not Failed
    pub fn not_retryable(id: Uuid, status: AuditStatus) -> Self {
        AuditError::InvalidState(format!("audit {} is {} and cannot be retried", id, status))
    }

    pub fn timeout(operation: &'static str, millis: u64) -> Self {
        AuditError::Timeout { operation, millis }
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::ClaimFetch { .. } => "claim_fetch",
            AuditError::Rule(RuleError::Compile(_)) => "compile",
            AuditError::Rule(RuleError::Execution(_)) => "rule_execution",
            AuditError::Rule(_) => "rule",
            AuditError::Rag(RagError::ResponseValidation(_)) => "response_validation",
            AuditError::Rag(RagError::Judgment(_)) => "judgment",
            AuditError::Rag(_) => "retrieval",
            AuditError::VectorStore(VectorStoreError::DimensionMismatch { .. }) => "dimension_mismatch",
            AuditError::VectorStore(_) => "vector_store",
            AuditError::Index(_) => "index",
            AuditError::Repository(_) => "repository",
            AuditError::InvalidState(_) => "invalid_state",
            AuditError::Cancelled(_) => "cancelled",
            AuditError::Timeout { .. } => "timeout",
            AuditError::Config(_) => "config",
            AuditError::Task(_) => "task",
        }
    }

    /// Whether the caller can fix this by changing its input
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AuditError::ClaimFetch {
                source: RepositoryError::NotFound { .. },
                ..
            } | AuditError::Rule(RuleError::Compile(_))
                | AuditError::Rule(RuleError::DuplicateCode(_))
                | AuditError::Rule(RuleError::NotLoaded(_))
                | AuditError::VectorStore(VectorStoreError::DimensionMismatch { .. })
                | AuditError::Index(IndexError::EmptyDocument(_))
                | AuditError::Repository(RepositoryError::NotFound { .. })
                | AuditError::InvalidState(_)
                | AuditError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;

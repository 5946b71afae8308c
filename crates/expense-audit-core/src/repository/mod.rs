//! Collaborator interfaces consumed by the audit engine
//!
//! The engine never talks to a database directly. Rules, claims and audit
//! records are reached through these traits; `memory` provides in-process
//! implementations used by the CLI and the test suites.

pub mod memory;

pub use memory::{InMemoryAuditRepository, InMemoryClaimRepository, InMemoryRuleRepository};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AuditResult, Claim};
use crate::rules::{Rule, RuleType};

/// Errors raised by repository implementations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// The requested entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness or state constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store failed
    #[error("Repository backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Offset pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(50)
    }
}

/// One page of a listing plus the total number of matches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Filter applied when listing rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    pub rule_type: Option<RuleType>,
    pub category: Option<String>,
    pub enabled: Option<bool>,
}

impl RuleFilter {
    pub fn enabled_only() -> Self {
        Self {
            enabled: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        self.rule_type.map_or(true, |t| rule.rule_type == t)
            && self.category.as_deref().map_or(true, |c| rule.category == c)
            && self.enabled.map_or(true, |e| rule.enabled == e)
    }
}

/// Rule persistence
///
/// Listing order is the load order used to break priority ties.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, rule: Rule) -> RepositoryResult<Rule>;

    async fn get(&self, id: &str) -> RepositoryResult<Rule>;

    /// Replace the stored rule with a new version
    async fn update(&self, rule: Rule) -> RepositoryResult<Rule>;

    async fn delete(&self, id: &str) -> RepositoryResult<()>;

    async fn list(&self, filter: &RuleFilter, page: PageRequest) -> RepositoryResult<Page<Rule>>;

    /// Whether `code` is taken by a rule other than `exclude_id`
    async fn code_exists(&self, code: &str, exclude_id: Option<&str>) -> RepositoryResult<bool>;
}

/// Claim reads needed to build the rule evaluation context
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    async fn get_claim(&self, id: &str) -> RepositoryResult<Claim>;

    /// Ids of other claims carrying the same invoice number
    async fn find_by_invoice_number(
        &self,
        invoice_number: &str,
        exclude_claim_id: &str,
    ) -> RepositoryResult<Vec<String>>;

    /// Number and summed amount of an employee's other claims with an
    /// expense date in `[from, until)`
    async fn employee_totals_between(
        &self,
        employee_id: &str,
        from: NaiveDate,
        until: NaiveDate,
        exclude_claim_id: &str,
    ) -> RepositoryResult<(usize, f64)>;
}

/// Audit record persistence
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn create(&self, audit: &AuditResult) -> RepositoryResult<()>;

    async fn get(&self, id: Uuid) -> RepositoryResult<AuditResult>;

    async fn update(&self, audit: &AuditResult) -> RepositoryResult<()>;

    /// All runs for a claim, oldest first
    async fn list_by_claim(&self, claim_id: &str) -> RepositoryResult<Vec<AuditResult>>;
}

//! In-memory repository implementations

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuditRepository, ClaimRepository, Page, PageRequest, RepositoryError, RepositoryResult,
    RuleFilter, RuleRepository,
};
use crate::model::{AuditResult, Claim};
use crate::rules::Rule;

/// Rule store keeping insertion order as load order
#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<Rule>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository, bypassing uniqueness checks
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn create(&self, rule: Rule) -> RepositoryResult<Rule> {
        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(RepositoryError::Conflict(format!("rule id {} already exists", rule.id)));
        }
        if rules.iter().any(|r| r.code == rule.code) {
            return Err(RepositoryError::Conflict(format!("rule code {} already exists", rule.code)));
        }
        rules.push(rule.clone());
        Ok(rule)
    }

    async fn get(&self, id: &str) -> RepositoryResult<Rule> {
        self.rules
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("rule", id))
    }

    async fn update(&self, rule: Rule) -> RepositoryResult<Rule> {
        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.code == rule.code && r.id != rule.id) {
            return Err(RepositoryError::Conflict(format!("rule code {} already exists", rule.code)));
        }
        let slot = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| RepositoryError::not_found("rule", rule.id.clone()))?;
        *slot = rule.clone();
        Ok(rule)
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(RepositoryError::not_found("rule", id));
        }
        Ok(())
    }

    async fn list(&self, filter: &RuleFilter, page: PageRequest) -> RepositoryResult<Page<Rule>> {
        let rules = self.rules.read().await;
        let matching: Vec<&Rule> = rules.iter().filter(|r| filter.matches(r)).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            offset: page.offset,
        })
    }

    async fn code_exists(&self, code: &str, exclude_id: Option<&str>) -> RepositoryResult<bool> {
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .any(|r| r.code == code && Some(r.id.as_str()) != exclude_id))
    }
}

/// Claim store keyed by claim id
#[derive(Debug, Default)]
pub struct InMemoryClaimRepository {
    claims: RwLock<HashMap<String, Claim>>,
}

impl InMemoryClaimRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claims(claims: impl IntoIterator<Item = Claim>) -> Self {
        Self {
            claims: RwLock::new(claims.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    pub async fn insert(&self, claim: Claim) {
        self.claims.write().await.insert(claim.id.clone(), claim);
    }
}

#[async_trait]
impl ClaimRepository for InMemoryClaimRepository {
    async fn get_claim(&self, id: &str) -> RepositoryResult<Claim> {
        self.claims
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("claim", id))
    }

    async fn find_by_invoice_number(
        &self,
        invoice_number: &str,
        exclude_claim_id: &str,
    ) -> RepositoryResult<Vec<String>> {
        let claims = self.claims.read().await;
        let mut ids: Vec<String> = claims
            .values()
            .filter(|c| c.id != exclude_claim_id)
            .filter(|c| {
                c.invoice
                    .as_ref()
                    .map_or(false, |inv| inv.invoice_number == invoice_number)
            })
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn employee_totals_between(
        &self,
        employee_id: &str,
        from: NaiveDate,
        until: NaiveDate,
        exclude_claim_id: &str,
    ) -> RepositoryResult<(usize, f64)> {
        let claims = self.claims.read().await;
        let (count, total) = claims
            .values()
            .filter(|c| {
                c.employee_id == employee_id
                    && c.id != exclude_claim_id
                    && c.expense_date >= from
                    && c.expense_date < until
            })
            .fold((0usize, 0.0f64), |(n, sum), c| (n + 1, sum + c.amount));
        Ok((count, total))
    }
}

/// Audit record store
#[derive(Debug, Default)]
pub struct InMemoryAuditRepository {
    audits: RwLock<Vec<AuditResult>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.audits.read().await.len()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn create(&self, audit: &AuditResult) -> RepositoryResult<()> {
        let mut audits = self.audits.write().await;
        if audits.iter().any(|a| a.id == audit.id) {
            return Err(RepositoryError::Conflict(format!("audit {} already exists", audit.id)));
        }
        audits.push(audit.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<AuditResult> {
        self.audits
            .read()
            .await
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("audit", id.to_string()))
    }

    async fn update(&self, audit: &AuditResult) -> RepositoryResult<()> {
        let mut audits = self.audits.write().await;
        let slot = audits
            .iter_mut()
            .find(|a| a.id == audit.id)
            .ok_or_else(|| RepositoryError::not_found("audit", audit.id.to_string()))?;
        if slot.status.is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "audit {} is {} and can no longer change",
                audit.id, slot.status
            )));
        }
        *slot = audit.clone();
        Ok(())
    }

    async fn list_by_claim(&self, claim_id: &str) -> RepositoryResult<Vec<AuditResult>> {
        let mut runs: Vec<AuditResult> = self
            .audits
            .read()
            .await
            .iter()
            .filter(|a| a.claim_id == claim_id)
            .cloned()
            .collect();
        runs.sort_by_key(|a| a.started_at);
        Ok(runs)
    }
}

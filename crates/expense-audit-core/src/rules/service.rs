//! Rule management on top of the rule repository
//!
//! Every write validates the predicate source first, enforces code
//! uniqueness, and republishes the executor's library so new audits see the
//! change.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::context::AuditContext;
use super::executor::{ReloadReport, RuleExecutor};
use super::{Result, Rule, RuleError, RuleType, RuleValidationResult};
use crate::repository::{Page, PageRequest, RuleFilter, RuleRepository};

/// Request to create a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub category: Option<String>,
    pub source: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rule_type: Option<RuleType>,
    pub category: Option<String>,
    pub source: Option<String>,
    pub message: Option<String>,
    pub priority: Option<i32>,
}

pub struct RuleService {
    repository: Arc<dyn RuleRepository>,
    executor: Arc<RuleExecutor>,
}

impl RuleService {
    pub fn new(repository: Arc<dyn RuleRepository>, executor: Arc<RuleExecutor>) -> Self {
        Self { repository, executor }
    }

    pub async fn create(&self, new: NewRule) -> Result<Rule> {
        self.executor.engine().validate(&new.source)?;
        if self.repository.code_exists(&new.code, None).await? {
            return Err(RuleError::DuplicateCode(new.code));
        }

        let mut rule = Rule::new(new.code, new.name, new.rule_type, new.source);
        rule.description = new.description;
        rule.message = new.message;
        rule.priority = new.priority;
        rule.enabled = new.enabled;
        if let Some(category) = new.category {
            rule.category = category;
        }

        let created = self.repository.create(rule).await?;
        info!(rule_id = %created.id, code = %created.code, "Rule created");
        self.refresh().await?;
        Ok(created)
    }

    /// Apply `update` as a new version of the rule
    pub async fn update(&self, id: &str, update: RuleUpdate) -> Result<Rule> {
        let mut rule = self.repository.get(id).await?;

        if let Some(source) = &update.source {
            self.executor.engine().validate(source)?;
        }
        if let Some(code) = &update.code {
            if self.repository.code_exists(code, Some(id)).await? {
                return Err(RuleError::DuplicateCode(code.clone()));
            }
        }

        if let Some(code) = update.code {
            rule.code = code;
        }
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(description) = update.description {
            rule.description = description;
        }
        if let Some(rule_type) = update.rule_type {
            rule.rule_type = rule_type;
        }
        if let Some(category) = update.category {
            rule.category = category;
        }
        if let Some(source) = update.source {
            rule.source = source;
        }
        if let Some(message) = update.message {
            rule.message = Some(message);
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }

        self.store_new_version(rule).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.repository.delete(id).await?;
        info!(rule_id = %id, "Rule deleted");
        self.refresh().await?;
        Ok(())
    }

    pub async fn enable(&self, id: &str) -> Result<Rule> {
        self.set_enabled(id, true).await
    }

    pub async fn disable(&self, id: &str) -> Result<Rule> {
        self.set_enabled(id, false).await
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Rule> {
        let mut rule = self.repository.get(id).await?;
        if rule.enabled == enabled {
            return Ok(rule);
        }
        rule.enabled = enabled;
        self.store_new_version(rule).await
    }

    async fn store_new_version(&self, mut rule: Rule) -> Result<Rule> {
        rule.version += 1;
        rule.updated_at = Utc::now();
        let stored = self.repository.update(rule).await?;
        info!(rule_id = %stored.id, version = stored.version, enabled = stored.enabled, "Rule updated");
        self.refresh().await?;
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Rule> {
        Ok(self.repository.get(id).await?)
    }

    pub async fn list(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<Rule>> {
        Ok(self.repository.list(filter, page).await?)
    }

    /// Compile `source` and evaluate it against `ctx` without storing anything
    pub fn test_rule(&self, source: &str, ctx: &AuditContext) -> Result<bool> {
        let engine = self.executor.engine();
        let predicate = engine.compile_source(source)?;
        predicate.test(ctx)
    }

    /// Run a loaded rule against `ctx`
    pub async fn test_existing(&self, id: &str, ctx: &AuditContext) -> Result<RuleValidationResult> {
        self.executor.execute(id, ctx).await
    }

    /// Force a library rebuild
    pub async fn refresh(&self) -> Result<ReloadReport> {
        self.executor.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Claim;
    use crate::repository::InMemoryRuleRepository;
    use crate::rules::ExprRuleEngine;
    use chrono::NaiveDate;

    fn service() -> RuleService {
        let repo: Arc<dyn RuleRepository> = Arc::new(InMemoryRuleRepository::new());
        let executor = Arc::new(RuleExecutor::new(repo.clone(), Arc::new(ExprRuleEngine::new())));
        RuleService::new(repo, executor)
    }

    fn new_rule(code: &str, source: &str) -> NewRule {
        NewRule {
            code: code.to_string(),
            name: format!("{} rule", code),
            description: String::new(),
            rule_type: RuleType::Amount,
            category: None,
            source: source.to_string(),
            message: None,
            priority: 10,
            enabled: true,
        }
    }

    fn context(amount: f64) -> AuditContext {
        let claim = Claim {
            id: "c1".to_string(),
            employee_id: "e1".to_string(),
            department: String::new(),
            claim_type: "meal".to_string(),
            category: "meal".to_string(),
            amount,
            currency: "CNY".to_string(),
            description: String::new(),
            vendor: String::new(),
            expense_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            submitted_at: Utc::now(),
            attachment_count: 0,
            invoice: None,
        };
        AuditContext::from_claim(&claim, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
    }

    #[tokio::test]
    async fn test_create_validates_and_reloads() {
        let svc = service();
        let rule = svc.create(new_rule("AMT-1", "amount <= 2000")).await.unwrap();
        assert_eq!(rule.version, 1);

        let result = svc.test_existing(&rule.id, &context(2500.0)).await.unwrap();
        assert!(!result.passed);

        let err = svc.create(new_rule("AMT-2", "amount <=")).await.unwrap_err();
        assert!(matches!(err, RuleError::Compile(_)));

        let err = svc.create(new_rule("AMT-1", "amount > 0")).await.unwrap_err();
        assert_eq!(err, RuleError::DuplicateCode("AMT-1".to_string()));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let svc = service();
        let rule = svc.create(new_rule("AMT-1", "amount <= 2000")).await.unwrap();

        let updated = svc
            .update(
                &rule.id,
                RuleUpdate {
                    source: Some("amount <= 3000".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert!(svc.test_existing(&rule.id, &context(2500.0)).await.unwrap().passed);
        assert_eq!(svc.executor.library().unwrap().get(&rule.id).unwrap().compiled.version(), 2);
    }

    #[tokio::test]
    async fn test_disable_removes_from_library() {
        let svc = service();
        let rule = svc.create(new_rule("AMT-1", "amount <= 2000")).await.unwrap();

        let disabled = svc.disable(&rule.id).await.unwrap();
        assert!(!disabled.enabled);
        assert!(matches!(
            svc.test_existing(&rule.id, &context(1.0)).await,
            Err(RuleError::NotLoaded(_))
        ));

        svc.enable(&rule.id).await.unwrap();
        assert!(svc.test_existing(&rule.id, &context(1.0)).await.is_ok());

        svc.delete(&rule.id).await.unwrap();
        assert!(svc.executor.library().unwrap().is_empty());
    }

    #[test]
    fn test_rule_dry_run() {
        let svc = service();
        assert!(svc.test_rule("amount > 100", &context(150.0)).unwrap());
        assert!(svc.test_rule("salary > 1", &context(150.0)).is_err());
    }
}

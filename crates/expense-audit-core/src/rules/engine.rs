//! Rule engine seam
//!
//! The executor only sees [`RuleEngine`]: compile source into an opaque
//! [`CompiledRule`], then execute it against a context. [`ExprRuleEngine`]
//! is the expression-language implementation.

use std::fmt;
use std::sync::Arc;

use super::context::AuditContext;
use super::eval::{evaluate, Value};
use super::parser::{parse, Expr};
use super::{Result, Rule, RuleError};

/// An executable predicate produced by an engine
pub trait Predicate: Send + Sync {
    fn test(&self, ctx: &AuditContext) -> Result<bool>;
}

/// Executable form of one rule version
#[derive(Clone)]
pub struct CompiledRule {
    rule_id: String,
    version: u32,
    predicate: Arc<dyn Predicate>,
}

impl CompiledRule {
    pub fn new(rule_id: impl Into<String>, version: u32, predicate: Arc<dyn Predicate>) -> Self {
        Self {
            rule_id: rule_id.into(),
            version,
            predicate,
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("rule_id", &self.rule_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Compiles and executes rule predicates
pub trait RuleEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Compile `source` into a standalone predicate
    fn compile_source(&self, source: &str) -> Result<Arc<dyn Predicate>>;

    /// Compile a stored rule, binding the result to its id and version
    fn compile(&self, rule: &Rule) -> Result<CompiledRule> {
        let predicate = self.compile_source(&rule.source)?;
        Ok(CompiledRule::new(rule.id.clone(), rule.version, predicate))
    }

    /// Check `source` without producing anything
    fn validate(&self, source: &str) -> Result<()> {
        self.compile_source(source).map(|_| ())
    }

    fn execute(&self, compiled: &CompiledRule, ctx: &AuditContext) -> Result<bool> {
        compiled.predicate.test(ctx)
    }
}

struct ExprPredicate {
    expr: Expr,
}

impl Predicate for ExprPredicate {
    fn test(&self, ctx: &AuditContext) -> Result<bool> {
        match evaluate(&self.expr, ctx)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuleError::Execution(format!(
                "predicate produced {} instead of a bool",
                other
            ))),
        }
    }
}

/// Engine for the built-in expression language
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprRuleEngine;

impl ExprRuleEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RuleEngine for ExprRuleEngine {
    fn name(&self) -> &'static str {
        "expr"
    }

    fn compile_source(&self, source: &str) -> Result<Arc<dyn Predicate>> {
        let expr = parse(source)?;
        Ok(Arc::new(ExprPredicate { expr }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Claim;
    use crate::rules::{CompileError, RuleType};
    use chrono::{NaiveDate, Utc};

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

    #[test]
    fn test_compile_binds_rule_identity() {
        let engine = ExprRuleEngine::new();
        let mut rule = Rule::new("AMT-001", "Cap", RuleType::Amount, "amount <= 2000");
        rule.version = 3;

        let compiled = engine.compile(&rule).unwrap();
        assert_eq!(compiled.rule_id(), "rule-amt-001");
        assert_eq!(compiled.version(), 3);
        assert!(engine.execute(&compiled, &context(1999.0)).unwrap());
        assert!(!engine.execute(&compiled, &context(2500.0)).unwrap());
    }

    #[test]
    fn test_validate_reports_position() {
        let engine = ExprRuleEngine::new();
        let err = engine.validate("amount <= ").unwrap_err();
        assert!(matches!(err, RuleError::Compile(CompileError { position: 10, .. })));
        assert!(engine.validate("has_invoice").is_ok());
    }

    #[test]
    fn test_runtime_error_surfaces_as_execution_error() {
        let engine = ExprRuleEngine::new();
        let rule = Rule::new("INV-002", "Invoice total", RuleType::Invoice, "invoice_amount >= amount");
        let compiled = engine.compile(&rule).unwrap();
        let err = engine.execute(&compiled, &context(10.0)).unwrap_err();
        assert!(matches!(err, RuleError::Execution(_)));
    }
}

//! Rule framework for claim validation
//!
//! Rules are small boolean predicates written in an expression language
//! (see [`parser`]) and evaluated against a typed [`AuditContext`]. The
//! framework is split into:
//!
//! - `lexer` / `parser` / `eval`: the expression language
//! - `engine`: the [`RuleEngine`] seam that compiles and executes predicates
//! - `executor`: the versioned rule library and priority-ordered execution
//! - `aggregator`: turning failing results into prioritized violations
//! - `service`: rule management on top of the rule repository

pub mod aggregator;
pub mod context;
pub mod engine;
pub mod eval;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod service;

pub use aggregator::{BatchReport, Violation, ViolationAggregator, ViolationReport};
pub use context::{AuditContext, ContextBuilder, Field};
pub use engine::{CompiledRule, ExprRuleEngine, RuleEngine};
pub use executor::{ReloadReport, RuleExecutor, RuleLibrary, RuleStats};
pub use service::{NewRule, RuleService, RuleUpdate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::repository::RepositoryError;

/// Kind of policy constraint a rule expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Amount caps and limits
    Amount,
    /// Submission frequency limits
    Frequency,
    /// Invoice presence, duplication and consistency
    Invoice,
    /// Regulatory checks such as tax id format
    Compliance,
    /// Anything else
    Custom,
}

impl RuleType {
    pub const ALL: [RuleType; 5] = [
        RuleType::Amount,
        RuleType::Frequency,
        RuleType::Invoice,
        RuleType::Compliance,
        RuleType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Amount => "amount",
            RuleType::Frequency => "frequency",
            RuleType::Invoice => "invoice",
            RuleType::Compliance => "compliance",
            RuleType::Custom => "custom",
        }
    }

    /// Severity assigned to violations of this rule type
    pub fn severity(&self) -> Severity {
        match self {
            RuleType::Amount | RuleType::Invoice => Severity::High,
            RuleType::Frequency | RuleType::Compliance => Severity::Medium,
            RuleType::Custom => Severity::Low,
        }
    }

    /// Remediation hint attached to violations of this rule type
    pub fn suggestion(&self) -> &'static str {
        match self {
            RuleType::Amount => {
                "Reduce the claimed amount to the policy limit or attach a pre-approval for the excess"
            }
            RuleType::Frequency => {
                "Consolidate claims or obtain manager approval for additional submissions this period"
            }
            RuleType::Invoice => {
                "Provide a valid, unused invoice whose number and total match the claim"
            }
            RuleType::Compliance => {
                "Correct the invoice tax information or request a compliant invoice from the vendor"
            }
            RuleType::Custom => "Review the claim against the referenced policy and amend it",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amount" => Ok(RuleType::Amount),
            "frequency" => Ok(RuleType::Frequency),
            "invoice" => Ok(RuleType::Invoice),
            "compliance" => Ok(RuleType::Compliance),
            "custom" => Ok(RuleType::Custom),
            other => Err(format!("unknown rule type: {}", other)),
        }
    }
}

/// Severity of a rule violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Text shown to claimants and reviewers
    pub fn display_text(&self) -> &'static str {
        match self {
            Severity::Low => "Low risk",
            Severity::Medium => "Needs attention",
            Severity::High => "Policy breach",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A policy rule as stored in the rule repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Unique business code, e.g. "AMT-001"
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub category: String,
    /// Predicate source in the rule expression language
    pub source: String,
    /// Message reported when the predicate fails
    #[serde(default)]
    pub message: Option<String>,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl Rule {
    /// Create an enabled version-1 rule whose id is derived from its code
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        rule_type: RuleType,
        source: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let now = Utc::now();
        Self {
            id: format!("rule-{}", code.to_lowercase()),
            code,
            name: name.into(),
            description: String::new(),
            rule_type,
            category: rule_type.as_str().to_string(),
            source: source.into(),
            message: None,
            priority: 0,
            enabled: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Message reported when the predicate evaluates to false
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("{} failed: {}", self.name, self.source.trim()))
    }
}

/// Outcome of evaluating one rule against one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleValidationResult {
    pub rule_id: String,
    pub rule_code: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    /// Rule priority at execution time
    pub priority: i32,
    pub rule_version: u32,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
    /// Wall-clock execution time in microseconds
    pub duration_us: u64,
    /// Engine error text when the predicate could not be evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleValidationResult {
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us)
    }
}

/// Position-tagged compilation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    /// Byte offset into the rule source
    pub position: usize,
}

impl CompileError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for CompileError {}

/// Errors for rule compilation, execution and management
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// Rule source is not a valid predicate
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Predicate failed while evaluating
    #[error("Rule execution error: {0}")]
    Execution(String),

    /// Rule id is not present in the compiled library
    #[error("Rule not loaded: {0}")]
    NotLoaded(String),

    /// Another rule already uses this code
    #[error("Duplicate rule code: {0}")]
    DuplicateCode(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_rule_type_lookup_table() {
        assert_eq!(RuleType::Amount.severity(), Severity::High);
        assert_eq!(RuleType::Frequency.severity(), Severity::Medium);
        assert_eq!(RuleType::Custom.severity(), Severity::Low);
        for rule_type in RuleType::ALL {
            assert!(!rule_type.suggestion().is_empty());
            assert_eq!(rule_type.as_str().parse::<RuleType>().unwrap(), rule_type);
        }
    }

    #[test]
    fn test_rule_type_from_str() {
        assert_eq!("Amount".parse::<RuleType>(), Ok(RuleType::Amount));
        assert_eq!("INVOICE".parse::<RuleType>(), Ok(RuleType::Invoice));
        assert_eq!(
            "bogus".parse::<RuleType>(),
            Err("unknown rule type: bogus".to_string())
        );
    }

    #[test]
    fn test_failure_message_fallback() {
        let rule = Rule::new("AMT-001", "Meal cap", RuleType::Amount, "amount <= 200");
        assert_eq!(rule.failure_message(), "Meal cap failed: amount <= 200");

        let rule = rule.with_message("Meals are capped at 200");
        assert_eq!(rule.failure_message(), "Meals are capped at 200");
    }

    #[test]
    fn test_rule_yaml_defaults() {
        let yaml = r#"
id: r1
code: INV-001
name: Invoice required
rule_type: invoice
source: has_invoice
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.version, 1);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.rule_type, RuleType::Invoice);
    }

    #[test]
    fn test_compile_error_display() {
        let err = RuleError::from(CompileError::new("unexpected token", 4));
        assert_eq!(err.to_string(), "Compile error: unexpected token at offset 4");
    }
}

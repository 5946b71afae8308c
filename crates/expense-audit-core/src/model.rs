//! Domain records shared across the audit pipeline
//!
//! Claims come from the reimbursement system (with OCR invoice fields already
//! extracted), audit results are owned by the orchestrator and persisted
//! through the audit repository.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rag::AnalysisResult;
use crate::rules::Violation;

/// Structured invoice fields produced by the OCR parser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceFields {
    /// Invoice number printed on the document
    pub invoice_number: String,
    /// Seller tax identification number
    #[serde(default)]
    pub tax_id: Option<String>,
    /// Seller name
    #[serde(default)]
    pub seller_name: Option<String>,
    /// Total amount printed on the invoice
    #[serde(default)]
    pub total_amount: Option<f64>,
    /// Issue date printed on the invoice
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    /// Line item descriptions
    #[serde(default)]
    pub items: Vec<String>,
}

/// An expense reimbursement claim submitted for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub employee_id: String,
    #[serde(default)]
    pub department: String,
    /// Claim type, e.g. "travel", "meal", "office"
    pub claim_type: String,
    /// Policy category used for retrieval filtering
    pub category: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    pub expense_date: NaiveDate,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub attachment_count: u32,
    #[serde(default)]
    pub invoice: Option<InvoiceFields>,
}

fn default_currency() -> String {
    "CNY".to_string()
}

impl Claim {
    /// Fields exposed to the semantic reviewer
    pub fn fields(&self) -> ClaimFields {
        ClaimFields {
            claim_id: self.id.clone(),
            claim_type: self.claim_type.clone(),
            category: self.category.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            description: self.description.clone(),
            vendor: self.vendor.clone(),
            department: self.department.clone(),
            expense_date: self.expense_date,
            invoice_items: self
                .invoice
                .as_ref()
                .map(|inv| inv.items.clone())
                .unwrap_or_default(),
            seller_name: self.invoice.as_ref().and_then(|inv| inv.seller_name.clone()),
        }
    }
}

/// The claim payload rendered into the audit prompt
///
/// Deliberately excludes employee identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimFields {
    pub claim_id: String,
    pub claim_type: String,
    pub category: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub vendor: String,
    pub department: String,
    pub expense_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invoice_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,
}

/// Lifecycle state of an audit run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Running => "running",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }

    /// Completed and Failed records never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditStatus::Completed | AuditStatus::Failed)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative risk bucket derived from the risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Score thresholds are inclusive: 0.7 is High, 0.4 is Medium
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one audit run for one claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub id: Uuid,
    pub claim_id: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_pass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_pass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_pass: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub violation_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    /// Audit this run retries, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditResult {
    /// Create a fresh record in the Running state
    pub fn running(claim_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            claim_id: claim_id.into(),
            status: AuditStatus::Running,
            rule_pass: None,
            rag_pass: None,
            final_pass: None,
            risk_score: None,
            risk_level: None,
            reason: String::new(),
            suggestions: Vec::new(),
            violations: Vec::new(),
            violation_summary: String::new(),
            analysis: None,
            retry_of: None,
            attempt: 1,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Link this record to the failed run it retries
    pub fn retrying(mut self, previous: &AuditResult) -> Self {
        self.retry_of = Some(previous.id);
        self.attempt = previous.attempt + 1;
        self
    }

    fn finish(&mut self, status: AuditStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }

    /// Mark the run completed
    pub fn complete(&mut self) {
        self.finish(AuditStatus::Completed);
    }

    /// Mark the run failed with the cause recorded in `reason`
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.reason = reason.into();
        self.finish(AuditStatus::Failed);
    }
}

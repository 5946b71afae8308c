//! Typed evaluation context for rules
//!
//! Rules never see the raw claim. They read the fields of [`AuditContext`]
//! through the fixed binding table in [`Field`], resolved once at compile
//! time, so an unknown name is a compile error rather than a runtime lookup
//! miss.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::eval::Value;
use super::parser::Ty;
use crate::model::{Claim, InvoiceFields};
use crate::repository::{ClaimRepository, RepositoryError};

/// Bindings available to rule predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Amount,
    Currency,
    ClaimType,
    Category,
    EmployeeId,
    Department,
    Description,
    Vendor,
    ExpenseDate,
    DaysSinceExpense,
    AttachmentCount,
    HasInvoice,
    InvoiceNumber,
    InvoiceAmount,
    InvoiceDate,
    TaxId,
    SellerName,
    DuplicateInvoiceCount,
    MonthlyClaimCount,
    MonthlyClaimTotal,
}

/// (name, field, type, nullable)
const BINDINGS: &[(&str, Field, Ty, bool)] = &[
    ("amount", Field::Amount, Ty::Number, false),
    ("currency", Field::Currency, Ty::Text, false),
    ("claim_type", Field::ClaimType, Ty::Text, false),
    ("category", Field::Category, Ty::Text, false),
    ("employee_id", Field::EmployeeId, Ty::Text, false),
    ("department", Field::Department, Ty::Text, false),
    ("description", Field::Description, Ty::Text, false),
    ("vendor", Field::Vendor, Ty::Text, false),
    ("expense_date", Field::ExpenseDate, Ty::Text, false),
    ("days_since_expense", Field::DaysSinceExpense, Ty::Number, false),
    ("attachment_count", Field::AttachmentCount, Ty::Number, false),
    ("has_invoice", Field::HasInvoice, Ty::Bool, false),
    ("invoice_number", Field::InvoiceNumber, Ty::Text, true),
    ("invoice_amount", Field::InvoiceAmount, Ty::Number, true),
    ("invoice_date", Field::InvoiceDate, Ty::Text, true),
    ("tax_id", Field::TaxId, Ty::Text, true),
    ("seller_name", Field::SellerName, Ty::Text, true),
    ("duplicate_invoice_count", Field::DuplicateInvoiceCount, Ty::Number, false),
    ("monthly_claim_count", Field::MonthlyClaimCount, Ty::Number, false),
    ("monthly_claim_total", Field::MonthlyClaimTotal, Ty::Number, false),
];

impl Field {
    /// Resolve a binding name
    pub fn lookup(name: &str) -> Option<Field> {
        BINDINGS.iter().find(|(n, ..)| *n == name).map(|(_, f, ..)| *f)
    }

    pub fn name(&self) -> &'static str {
        self.binding().0
    }

    pub fn ty(&self) -> Ty {
        self.binding().2
    }

    /// Whether the field may be null at runtime
    pub fn nullable(&self) -> bool {
        self.binding().3
    }

    /// All binding names, for error messages and documentation
    pub fn names() -> impl Iterator<Item = &'static str> {
        BINDINGS.iter().map(|(n, ..)| *n)
    }

    fn binding(&self) -> &'static (&'static str, Field, Ty, bool) {
        BINDINGS
            .iter()
            .find(|(_, f, ..)| f == self)
            .unwrap_or(&BINDINGS[0])
    }
}

/// Everything a rule can observe about a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditContext {
    pub claim_id: String,
    pub employee_id: String,
    pub department: String,
    pub claim_type: String,
    pub category: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub vendor: String,
    pub expense_date: NaiveDate,
    pub days_since_expense: i64,
    pub attachment_count: u32,
    pub invoice: Option<InvoiceFields>,
    /// Other claims carrying the same invoice number
    pub duplicate_invoice_count: usize,
    /// Claims by the same employee this month, this one included
    pub monthly_claim_count: usize,
    /// Amount claimed by the same employee this month
    pub monthly_claim_total: f64,
}

impl AuditContext {
    /// Context with no repository-derived facts, relative to `today`
    pub fn from_claim(claim: &Claim, today: NaiveDate) -> Self {
        Self {
            claim_id: claim.id.clone(),
            employee_id: claim.employee_id.clone(),
            department: claim.department.clone(),
            claim_type: claim.claim_type.clone(),
            category: claim.category.clone(),
            amount: claim.amount,
            currency: claim.currency.clone(),
            description: claim.description.clone(),
            vendor: claim.vendor.clone(),
            expense_date: claim.expense_date,
            days_since_expense: (today - claim.expense_date).num_days(),
            attachment_count: claim.attachment_count,
            invoice: claim.invoice.clone(),
            duplicate_invoice_count: 0,
            monthly_claim_count: 1,
            monthly_claim_total: claim.amount,
        }
    }

    /// Read a bound field
    pub fn value_of(&self, field: Field) -> Value {
        let invoice = self.invoice.as_ref();
        let opt_text = |v: Option<&String>| v.map_or(Value::Null, |s| Value::Text(s.clone()));

        match field {
            Field::Amount => Value::Number(self.amount),
            Field::Currency => Value::Text(self.currency.clone()),
            Field::ClaimType => Value::Text(self.claim_type.clone()),
            Field::Category => Value::Text(self.category.clone()),
            Field::EmployeeId => Value::Text(self.employee_id.clone()),
            Field::Department => Value::Text(self.department.clone()),
            Field::Description => Value::Text(self.description.clone()),
            Field::Vendor => Value::Text(self.vendor.clone()),
            Field::ExpenseDate => Value::Text(self.expense_date.format("%Y-%m-%d").to_string()),
            Field::DaysSinceExpense => Value::Number(self.days_since_expense as f64),
            Field::AttachmentCount => Value::Number(self.attachment_count as f64),
            Field::HasInvoice => Value::Bool(invoice.map_or(false, |inv| !inv.invoice_number.is_empty())),
            Field::InvoiceNumber => opt_text(invoice.map(|inv| &inv.invoice_number)),
            Field::InvoiceAmount => invoice
                .and_then(|inv| inv.total_amount)
                .map_or(Value::Null, Value::Number),
            Field::InvoiceDate => invoice
                .and_then(|inv| inv.issue_date)
                .map_or(Value::Null, |d| Value::Text(d.format("%Y-%m-%d").to_string())),
            Field::TaxId => opt_text(invoice.and_then(|inv| inv.tax_id.as_ref())),
            Field::SellerName => opt_text(invoice.and_then(|inv| inv.seller_name.as_ref())),
            Field::DuplicateInvoiceCount => Value::Number(self.duplicate_invoice_count as f64),
            Field::MonthlyClaimCount => Value::Number(self.monthly_claim_count as f64),
            Field::MonthlyClaimTotal => Value::Number(self.monthly_claim_total),
        }
    }
}

/// Builds contexts from claims plus repository facts
pub struct ContextBuilder {
    claims: Arc<dyn ClaimRepository>,
    timeout: Duration,
}

impl ContextBuilder {
    pub fn new(claims: Arc<dyn ClaimRepository>, timeout: Duration) -> Self {
        Self { claims, timeout }
    }

    /// Gather duplicate-invoice and monthly frequency facts for `claim`
    pub async fn build(&self, claim: &Claim) -> Result<AuditContext, RepositoryError> {
        let today = Utc::now().date_naive();
        let mut context = AuditContext::from_claim(claim, today);

        if let Some(invoice) = claim.invoice.as_ref().filter(|inv| !inv.invoice_number.is_empty()) {
            let dupes = self
                .bounded(self.claims.find_by_invoice_number(&invoice.invoice_number, &claim.id))
                .await?;
            context.duplicate_invoice_count = dupes.len();
        }

        let (count, total) = self
            .bounded(self.claims.employee_totals_between(
                &claim.employee_id,
                month_start(claim.expense_date),
                next_month_start(claim.expense_date),
                &claim.id,
            ))
            .await?;
        // Other claims in the expense month, plus this one
        context.monthly_claim_count = count + 1;
        context.monthly_claim_total = total + claim.amount;

        tracing::debug!(
            claim_id = %claim.id,
            duplicate_invoice_count = context.duplicate_invoice_count,
            monthly_claim_count = context.monthly_claim_count,
            "Built audit context"
        );

        Ok(context)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, RepositoryError> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            RepositoryError::Backend(format!(
                "claim repository timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
    }
}

/// First day of the month containing `date`
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month after the one containing `date`
pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
}

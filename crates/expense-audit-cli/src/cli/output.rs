//! Output formatting for the expense audit CLI
//!
//! Every result renders as JSON, YAML, or a colored human-readable table.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

use expense_audit_core::rules::{ReloadReport, RuleValidationResult};
use expense_audit_core::{AnalysisResult, AuditResult, AuditStatus, RiskLevel, Severity, ViolationReport};

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table format with colors
    #[default]
    Table,
    /// JSON format for machine processing
    Json,
    /// YAML format
    Yaml,
}

/// A CLI result that can be printed in any [`OutputFormat`]
pub trait Render: Serialize {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()>;

    fn render(&self, format: OutputFormat) -> Result<()> {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(self)?),
            OutputFormat::Yaml => println!("{}", serde_yaml::to_string(self)?),
            OutputFormat::Table => self.write_table(&mut io::stdout().lock())?,
        }
        Ok(())
    }
}

fn header(out: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", title.cyan().bold())?;
    writeln!(out, "{}", "=".repeat(60))?;
    writeln!(out)
}

fn status_icon(ok: bool) -> colored::ColoredString {
    if ok {
        "+".green()
    } else {
        "x".red()
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::High => severity.as_str().red().bold(),
        Severity::Medium => severity.as_str().yellow(),
        Severity::Low => severity.as_str().blue(),
    }
}

fn risk_label(level: RiskLevel) -> colored::ColoredString {
    match level {
        RiskLevel::High => level.as_str().red().bold(),
        RiskLevel::Medium => level.as_str().yellow(),
        RiskLevel::Low => level.as_str().green(),
    }
}

fn pass_label(passed: Option<bool>) -> colored::ColoredString {
    match passed {
        Some(true) => "pass".green(),
        Some(false) => "fail".red(),
        None => "-".normal(),
    }
}

/// Compilation status of one rule in a rule file
#[derive(Debug, Clone, Serialize)]
pub struct RuleCheckEntry {
    pub code: String,
    pub name: String,
    pub rule_type: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Byte offset of the compile error in the rule source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleCheckOutput {
    pub valid: bool,
    pub total: usize,
    pub invalid: usize,
    pub rules: Vec<RuleCheckEntry>,
}

impl RuleCheckOutput {
    pub fn new(rules: Vec<RuleCheckEntry>) -> Self {
        let invalid = rules.iter().filter(|r| !r.valid).count();
        Self {
            valid: invalid == 0,
            total: rules.len(),
            invalid,
            rules,
        }
    }
}

impl Render for RuleCheckOutput {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Rule Check")?;
        for rule in &self.rules {
            writeln!(
                out,
                "{} {:<12} {:<10} {}",
                status_icon(rule.valid),
                rule.code,
                rule.rule_type,
                rule.name
            )?;
            if let Some(error) = &rule.error {
                writeln!(out, "    {}", error.red())?;
            }
        }
        writeln!(out)?;
        writeln!(
            out,
            "{} {} of {} rules compiled",
            status_icon(self.valid),
            self.total - self.invalid,
            self.total
        )
    }
}

/// Rule results and violations for one claim
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutput {
    pub claim_id: String,
    pub library_version: u64,
    pub rule_pass: bool,
    pub results: Vec<RuleValidationResult>,
    pub violations: ViolationReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

impl EvaluationOutput {
    pub fn new(
        claim_id: impl Into<String>,
        reload: &ReloadReport,
        results: Vec<RuleValidationResult>,
        violations: ViolationReport,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            library_version: reload.version,
            rule_pass: violations.is_empty(),
            results,
            violations,
            rejected: reload
                .rejected
                .iter()
                .map(|r| format!("{}: {}", r.code, r.error))
                .collect(),
        }
    }
}

impl Render for EvaluationOutput {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, &format!("Rule Evaluation: {}", self.claim_id))?;
        for result in &self.results {
            writeln!(
                out,
                "{} {:<12} p={:<4} {:>6}us  {}",
                status_icon(result.passed),
                result.rule_code,
                result.priority,
                result.duration_us,
                result.rule_name
            )?;
            if let Some(error) = &result.error {
                writeln!(out, "    {}", error.red())?;
            }
        }
        for rejected in &self.rejected {
            writeln!(out, "{} rejected {}", "!".yellow(), rejected)?;
        }
        writeln!(out)?;

        if !self.violations.is_empty() {
            writeln!(out, "{}", "Violations:".cyan().bold())?;
            writeln!(out, "{}", "-".repeat(60))?;
            for violation in &self.violations.violations {
                writeln!(
                    out,
                    "  [{}] {} {}",
                    violation.rule_code,
                    severity_label(violation.severity),
                    violation.message
                )?;
            }
            writeln!(out)?;
        }

        writeln!(out, "{} {}", status_icon(self.rule_pass), self.violations.summary)
    }
}

impl Render for AuditResult {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, &format!("Audit {} for claim {}", self.id, self.claim_id))?;
        writeln!(out, "Status:      {}", self.status)?;
        writeln!(out, "Rules:       {}", pass_label(self.rule_pass))?;
        writeln!(out, "Semantic:    {}", pass_label(self.rag_pass))?;
        writeln!(out, "Final:       {}", pass_label(self.final_pass))?;
        if let (Some(score), Some(level)) = (self.risk_score, self.risk_level) {
            writeln!(out, "Risk:        {:.2} ({})", score, risk_label(level))?;
        }
        if let Some(ms) = self.duration_ms {
            writeln!(out, "Duration:    {}ms", ms)?;
        }
        if self.status == AuditStatus::Failed {
            writeln!(out, "Reason:      {}", self.reason.red())?;
        }
        writeln!(out)?;

        if let Some(analysis) = &self.analysis {
            writeln!(out, "{}", "Analysis:".cyan().bold())?;
            writeln!(out, "{}", "-".repeat(60))?;
            writeln!(out, "{}", analysis.conclusion)?;
            writeln!(
                out,
                "confidence {:.2}, {} references, {} tokens",
                analysis.confidence,
                analysis.references.len(),
                analysis.tokens_used
            )?;
            writeln!(out)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(out, "{}", "Suggestions:".cyan().bold())?;
            for suggestion in &self.suggestions {
                writeln!(out, "  - {}", suggestion)?;
            }
        }
        Ok(())
    }
}

impl Render for AnalysisResult {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Policy Answer")?;
        writeln!(out, "{}", self.conclusion)?;
        writeln!(out)?;
        if !self.reasoning.is_empty() {
            writeln!(out, "{}", self.reasoning)?;
            writeln!(out)?;
        }
        if !self.references.is_empty() {
            writeln!(out, "{}", "References:".cyan().bold())?;
            for reference in &self.references {
                writeln!(
                    out,
                    "  [{}] {} ({:.3})",
                    reference.label, reference.document_id, reference.score
                )?;
            }
            writeln!(out)?;
        }
        writeln!(
            out,
            "confidence {:.2}, model {}, {} tokens",
            self.confidence, self.model, self.tokens_used
        )
    }
}

/// Metrics in the Prometheus text format
#[derive(Debug, Clone, Serialize)]
pub struct MetricsOutput {
    pub metrics: String,
}

impl Render for MetricsOutput {
    fn write_table(&self, out: &mut dyn Write) -> io::Result<()> {
        header(out, "Metrics")?;
        write!(out, "{}", self.metrics)
    }
}

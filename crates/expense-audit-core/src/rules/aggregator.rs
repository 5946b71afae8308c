//! Violation aggregation
//!
//! Turns failing rule results into violations ordered by rule priority and
//! summarizes them by severity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{RuleType, RuleValidationResult, Severity};

/// One failing rule, ready for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub rule_code: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    pub priority: i32,
}

impl Violation {
    pub fn from_result(result: &RuleValidationResult) -> Self {
        Self {
            rule_id: result.rule_id.clone(),
            rule_code: result.rule_code.clone(),
            rule_name: result.rule_name.clone(),
            rule_type: result.rule_type,
            severity: result.rule_type.severity(),
            message: result.message.clone(),
            suggestion: result.rule_type.suggestion().to_string(),
            priority: result.priority,
        }
    }
}

/// Violations for one claim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationReport {
    /// Sorted by descending priority
    pub violations: Vec<Violation>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub summary: String,
}

impl ViolationReport {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.by_severity.keys().next_back().copied()
    }
}

/// Statistics over independently validated claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub claims: usize,
    pub passed_claims: usize,
    pub failed_claims: usize,
    pub total_violations: usize,
    pub by_rule_type: BTreeMap<RuleType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ViolationAggregator;

impl ViolationAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, results: &[RuleValidationResult]) -> ViolationReport {
        let mut violations: Vec<Violation> = results
            .iter()
            .filter(|r| !r.passed)
            .map(Violation::from_result)
            .collect();
        violations.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut by_severity = BTreeMap::new();
        for v in &violations {
            *by_severity.entry(v.severity).or_insert(0) += 1;
        }

        let summary = summarize(&by_severity);
        ViolationReport {
            violations,
            by_severity,
            summary,
        }
    }

    /// Aggregate each claim's results independently and tally the batch
    pub fn aggregate_batch<'a, I>(&self, batch: I) -> (Vec<ViolationReport>, BatchReport)
    where
        I: IntoIterator<Item = &'a [RuleValidationResult]>,
    {
        let mut stats = BatchReport::default();
        let reports: Vec<ViolationReport> = batch
            .into_iter()
            .map(|results| {
                let report = self.aggregate(results);
                stats.claims += 1;
                if report.is_empty() {
                    stats.passed_claims += 1;
                } else {
                    stats.failed_claims += 1;
                }
                stats.total_violations += report.violations.len();
                for v in &report.violations {
                    *stats.by_rule_type.entry(v.rule_type).or_insert(0) += 1;
                    *stats.by_severity.entry(v.severity).or_insert(0) += 1;
                }
                report
            })
            .collect();
        (reports, stats)
    }
}

fn summarize(by_severity: &BTreeMap<Severity, usize>) -> String {
    if by_severity.is_empty() {
        return "no violations".to_string();
    }
    by_severity
        .iter()
        .rev()
        .map(|(severity, count)| format!("{} {}", count, severity))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: &str, rule_type: RuleType, priority: i32, passed: bool) -> RuleValidationResult {
        RuleValidationResult {
            rule_id: format!("rule-{}", code),
            rule_code: code.to_string(),
            rule_name: code.to_string(),
            rule_type,
            priority,
            rule_version: 1,
            passed,
            message: format!("{} message", code),
            severity: rule_type.severity(),
            duration_us: 3,
            error: None,
        }
    }

    #[test]
    fn test_summary_and_ordering() {
        let results = vec![
            result("F1", RuleType::Frequency, 1, false),
            result("A1", RuleType::Amount, 10, false),
            result("OK", RuleType::Amount, 50, true),
            result("I1", RuleType::Invoice, 10, false),
        ];
        let report = ViolationAggregator::new().aggregate(&results);

        let codes: Vec<&str> = report.violations.iter().map(|v| v.rule_code.as_str()).collect();
        assert_eq!(codes, vec!["A1", "I1", "F1"]);
        assert_eq!(report.summary, "2 high, 1 medium");
        assert_eq!(report.count(Severity::High), 2);
        assert_eq!(report.highest_severity(), Some(Severity::High));
        assert_eq!(report.violations[0].suggestion, RuleType::Amount.suggestion());
    }

    #[test]
    fn test_no_violations() {
        let report = ViolationAggregator::new().aggregate(&[result("OK", RuleType::Custom, 0, true)]);
        assert!(report.is_empty());
        assert_eq!(report.summary, "no violations");
        assert_eq!(report.highest_severity(), None);
    }

    #[test]
    fn test_batch_statistics() {
        let claim_a = vec![result("A1", RuleType::Amount, 1, false)];
        let claim_b = vec![result("A1", RuleType::Amount, 1, true)];
        let claim_c = vec![
            result("A1", RuleType::Amount, 1, false),
            result("C1", RuleType::Compliance, 0, false),
        ];

        let (reports, stats) = ViolationAggregator::new()
            .aggregate_batch([claim_a.as_slice(), claim_b.as_slice(), claim_c.as_slice()]);
        assert_eq!(reports.len(), 3);
        assert_eq!(stats.claims, 3);
        assert_eq!(stats.passed_claims, 1);
        assert_eq!(stats.failed_claims, 2);
        assert_eq!(stats.total_violations, 3);
        assert_eq!(stats.by_rule_type[&RuleType::Amount], 2);
        assert_eq!(stats.by_severity[&Severity::Medium], 1);
    }
}

//! Fusion of rule and semantic outcomes into a final verdict

use serde::{Deserialize, Serialize};

use crate::model::RiskLevel;
use crate::rules::Violation;

/// Default confidence a semantic analysis must exceed to pass
pub const DEFAULT_RAG_PASS_THRESHOLD: f64 = 0.6;

/// Line emitted when nothing else was suggested
pub const AUDIT_PASSED: &str = "Audit passed: no rule violations and the policy review found no issues";

const RAG_REVIEW: &str = "Semantic policy review was inconclusive or unfavourable; route the claim to a human reviewer";
const HIGH_RISK: &str = "High risk claim: require additional supporting documents before approval";

/// Final decision for one audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub rule_pass: bool,
    pub rag_pass: bool,
    pub final_pass: bool,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub suggestions: Vec<String>,
}

/// Semantic stage passes only with a confidence strictly above `threshold`
pub fn rag_pass(confidence: Option<f64>, threshold: f64) -> bool {
    confidence.map_or(false, |c| c > threshold)
}

/// `(rule ? 0 : 0.5) + (rag ? 0 : 0.3) + (1 - confidence) * 0.2`, clamped to [0, 1]
pub fn risk_score(rule_pass: bool, rag_pass: bool, confidence: f64) -> f64 {
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut tenths = 0u32;
    if !rule_pass {
        tenths += 5;
    }
    if !rag_pass {
        tenths += 3;
    }
    let score = tenths as f64 / 10.0 + (1.0 - confidence) * 0.2;
    score.clamp(0.0, 1.0)
}

/// Combine the rule violations and the semantic confidence
///
/// `confidence` is `None` when no analysis is available, which fails the
/// semantic stage and contributes the full uncertainty term.
pub fn fuse(rule_pass: bool, violations: &[Violation], confidence: Option<f64>, threshold: f64) -> Verdict {
    let rag_pass = rag_pass(confidence, threshold);
    let final_pass = rule_pass && rag_pass;
    let risk_score = risk_score(rule_pass, rag_pass, confidence.unwrap_or(0.0));
    let risk_level = RiskLevel::from_score(risk_score);

    let mut suggestions: Vec<String> = violations
        .iter()
        .map(|v| format!("[{}] {}: {}", v.rule_code, v.rule_name, v.message))
        .collect();
    if !rag_pass {
        suggestions.push(RAG_REVIEW.to_string());
    }
    if risk_level == RiskLevel::High {
        suggestions.push(HIGH_RISK.to_string());
    }
    if suggestions.is_empty() {
        suggestions.push(AUDIT_PASSED.to_string());
    }

    Verdict {
        rule_pass,
        rag_pass,
        final_pass,
        risk_score,
        risk_level,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleType, Severity};

    fn violation(code: &str) -> Violation {
        Violation {
            rule_id: format!("rule-{}", code),
            rule_code: code.to_string(),
            rule_name: "Amount cap".to_string(),
            rule_type: RuleType::Amount,
            severity: Severity::High,
            message: "Amount exceeds 2000".to_string(),
            suggestion: String::new(),
            priority: 10,
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(!rag_pass(Some(0.6), DEFAULT_RAG_PASS_THRESHOLD));
        assert!(rag_pass(Some(0.61), DEFAULT_RAG_PASS_THRESHOLD));
        assert!(!rag_pass(None, DEFAULT_RAG_PASS_THRESHOLD));
    }

    #[test]
    fn test_clean_claim_passes() {
        let verdict = fuse(true, &[], Some(0.95), DEFAULT_RAG_PASS_THRESHOLD);
        assert!(verdict.final_pass);
        assert!((verdict.risk_score - 0.01).abs() < 1e-9);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert_eq!(verdict.suggestions, vec![AUDIT_PASSED.to_string()]);
    }

    #[test]
    fn test_rule_failure_with_confident_rag() {
        let verdict = fuse(false, &[violation("AMT-001")], Some(0.95), DEFAULT_RAG_PASS_THRESHOLD);
        assert!(!verdict.final_pass);
        assert!(verdict.rag_pass);
        assert!((verdict.risk_score - 0.51).abs() < 1e-9);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
        assert_eq!(verdict.suggestions, vec!["[AMT-001] Amount cap: Amount exceeds 2000".to_string()]);
    }

    #[test]
    fn test_everything_fails() {
        let verdict = fuse(false, &[violation("AMT-001")], Some(0.5), DEFAULT_RAG_PASS_THRESHOLD);
        assert!((verdict.risk_score - 0.9).abs() < 1e-9);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.suggestions.len(), 3);
        assert_eq!(verdict.suggestions[1], RAG_REVIEW);
        assert_eq!(verdict.suggestions[2], HIGH_RISK);
    }

    #[test]
    fn test_rag_only_failure_at_threshold() {
        let verdict = fuse(true, &[], Some(0.6), DEFAULT_RAG_PASS_THRESHOLD);
        assert!(verdict.rule_pass);
        assert!(!verdict.rag_pass);
        assert!(!verdict.final_pass);
        assert!((verdict.risk_score - 0.38).abs() < 1e-9);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert_eq!(verdict.suggestions, vec![RAG_REVIEW.to_string()]);
    }

    #[test]
    fn test_risk_is_clamped() {
        assert_eq!(risk_score(false, false, -3.0), 1.0);
        assert_eq!(risk_score(true, true, 7.0), 0.0);
        assert_eq!(risk_score(false, false, f64::NAN), 1.0);
    }
}

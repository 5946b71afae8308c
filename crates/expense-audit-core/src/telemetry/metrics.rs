//! Prometheus metrics for the audit engine
//!
//! - `audits_total` (counter) - Finished audits by status
//! - `audit_duration_seconds` (histogram) - End-to-end audit duration
//! - `violations_total` (counter) - Rule violations by severity
//! - `rule_evaluations_total` (counter) - Rule evaluations by result
//! - `rag_confidence` (histogram) - Semantic analysis confidence
//! - `risk_score` (histogram) - Fused risk scores
//! - `vector_retries_total` (counter) - Vector store retries by operation
//! - `active_audits` (gauge) - Audits in progress
//!
//! # Example
//!
//! ```rust,no_run
//! use expense_audit_core::telemetry::AuditMetricsRegistry;
//!
//! let registry = AuditMetricsRegistry::new().unwrap();
//! registry.audit().record_audit("completed");
//! registry.audit().observe_risk(0.35);
//! println!("{}", registry.encode_text().unwrap());
//! ```

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;

use super::{Result, TelemetryError};
use crate::rules::Severity;

const NAMESPACE: &str = "expense_audit";

/// Audit metrics
pub struct AuditMetrics {
    audits_total: CounterVec,
    duration_seconds: HistogramVec,
    violations_total: CounterVec,
    rule_evaluations_total: CounterVec,
    confidence: Histogram,
    risk_score: Histogram,
    vector_retries_total: CounterVec,
    active_audits: Gauge,
}

impl AuditMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let audits_total = CounterVec::new(
            Opts::new("audits_total", "Total number of finished audits").namespace(NAMESPACE),
            &["status"],
        )?;

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("audit_duration_seconds", "Audit duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["status"],
        )?;

        let violations_total = CounterVec::new(
            Opts::new("violations_total", "Total number of rule violations").namespace(NAMESPACE),
            &["severity"],
        )?;

        let rule_evaluations_total = CounterVec::new(
            Opts::new("rule_evaluations_total", "Total number of rule evaluations")
                .namespace(NAMESPACE),
            &["result"],
        )?;

        let ratio_buckets = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
        let confidence = Histogram::with_opts(
            HistogramOpts::new("rag_confidence", "Confidence of semantic analyses")
                .namespace(NAMESPACE)
                .buckets(ratio_buckets.clone()),
        )?;

        let risk_score = Histogram::with_opts(
            HistogramOpts::new("risk_score", "Fused audit risk scores")
                .namespace(NAMESPACE)
                .buckets(ratio_buckets),
        )?;

        let vector_retries_total = CounterVec::new(
            Opts::new("vector_retries_total", "Vector store operation retries").namespace(NAMESPACE),
            &["operation"],
        )?;

        let active_audits = Gauge::new("expense_audit_active_audits", "Number of audits in progress")?;

        registry.register(Box::new(audits_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(violations_total.clone()))?;
        registry.register(Box::new(rule_evaluations_total.clone()))?;
        registry.register(Box::new(confidence.clone()))?;
        registry.register(Box::new(risk_score.clone()))?;
        registry.register(Box::new(vector_retries_total.clone()))?;
        registry.register(Box::new(active_audits.clone()))?;

        Ok(Self {
            audits_total,
            duration_seconds,
            violations_total,
            rule_evaluations_total,
            confidence,
            risk_score,
            vector_retries_total,
            active_audits,
        })
    }

    /// Count a finished audit
    pub fn record_audit(&self, status: &str) {
        self.audits_total.with_label_values(&[status]).inc();
    }

    pub fn observe_duration(&self, status: &str, duration_secs: f64) {
        self.duration_seconds
            .with_label_values(&[status])
            .observe(duration_secs);
    }

    pub fn record_violation(&self, severity: Severity) {
        self.violations_total
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    pub fn record_rule_evaluation(&self, passed: bool, errored: bool) {
        let result = match (passed, errored) {
            (_, true) => "error",
            (true, false) => "passed",
            (false, false) => "failed",
        };
        self.rule_evaluations_total.with_label_values(&[result]).inc();
    }

    pub fn observe_confidence(&self, confidence: f64) {
        self.confidence.observe(confidence);
    }

    pub fn observe_risk(&self, score: f64) {
        self.risk_score.observe(score);
    }

    pub fn record_vector_retry(&self, operation: &str) {
        self.vector_retries_total.with_label_values(&[operation]).inc();
    }

    pub fn active_audits(&self) -> f64 {
        self.active_audits.get()
    }

    /// Start timing an audit; the guard tracks it as active until finished
    pub fn start_audit(&self) -> AuditTimer<'_> {
        self.active_audits.inc();
        AuditTimer {
            start: Instant::now(),
            metrics: self,
            finished: false,
        }
    }
}

/// RAII guard for timing audits
///
/// Dropping an unfinished timer records the audit as `failed`.
pub struct AuditTimer<'a> {
    start: Instant,
    metrics: &'a AuditMetrics,
    finished: bool,
}

impl<'a> AuditTimer<'a> {
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the final status and duration
    pub fn finish(mut self, status: &str) {
        self.complete(status);
    }

    fn complete(&mut self, status: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.metrics.record_audit(status);
        self.metrics.observe_duration(status, self.elapsed_secs());
        self.metrics.active_audits.dec();
    }
}

impl<'a> Drop for AuditTimer<'a> {
    fn drop(&mut self) {
        self.complete("failed");
    }
}

/// Registry for all audit metrics
pub struct AuditMetricsRegistry {
    registry: Arc<Registry>,
    audit: AuditMetrics,
}

impl AuditMetricsRegistry {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Register into an existing Prometheus registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let audit = AuditMetrics::new(Arc::clone(&registry))?;
        Ok(Self { registry, audit })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn audit(&self) -> &AuditMetrics {
        &self.audit
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encode metrics as text for scraping
    pub fn encode_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.gather(), &mut buffer)
            .map_err(|e| TelemetryError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Encoding(e.to_string()))
    }
}

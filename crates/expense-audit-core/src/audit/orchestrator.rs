//! Audit orchestration
//!
//! One run moves a claim through rule validation, then semantic analysis,
//! then fusion. The record is created in `Running` once the claim is known
//! and ends `Completed` or `Failed`; stage failures are recorded on the
//! record rather than returned as errors.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancel::CancellationToken;
use super::fusion;
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::model::{AuditResult, AuditStatus, Claim};
use crate::rag::RagService;
use crate::repository::{AuditRepository, ClaimRepository};
use crate::rules::{ContextBuilder, RuleExecutor, ViolationAggregator};
use crate::telemetry::AuditMetricsRegistry;

/// Reason recorded on runs stopped by their cancellation token
pub const CANCELLED_REASON: &str = "cancelled";

/// Handle to an audit running on its own task
pub struct AuditHandle {
    audit_id: Uuid,
    claim_id: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<AuditResult>>,
}

impl AuditHandle {
    /// Id the record will carry once created
    pub fn audit_id(&self) -> Uuid {
        self.audit_id
    }

    pub fn claim_id(&self) -> &str {
        &self.claim_id
    }

    /// Stop the run at its next I/O boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<AuditResult> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AuditError::Task(e.to_string())),
        }
    }
}

/// Removes a claim from the in-flight set when the run ends
struct InFlight<'a> {
    claims: &'a Mutex<HashSet<String>>,
    claim_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.claim_id);
    }
}

/// Sequences rule validation and semantic analysis for claims
pub struct AuditOrchestrator {
    claims: Arc<dyn ClaimRepository>,
    audits: Arc<dyn AuditRepository>,
    executor: Arc<RuleExecutor>,
    context_builder: ContextBuilder,
    aggregator: ViolationAggregator,
    rag: Arc<RagService>,
    metrics: Option<Arc<AuditMetricsRegistry>>,
    in_flight: Mutex<HashSet<String>>,
    claim_fetch_timeout: Duration,
    repository_timeout: Duration,
    rules_timeout: Duration,
    rag_timeout: Duration,
    rag_pass_threshold: f64,
    top_k: usize,
}

impl AuditOrchestrator {
    pub fn new(
        claims: Arc<dyn ClaimRepository>,
        audits: Arc<dyn AuditRepository>,
        executor: Arc<RuleExecutor>,
        rag: Arc<RagService>,
        config: &AuditConfig,
    ) -> Self {
        let rules_timeout = Duration::from_millis(config.rules.repository_timeout_ms);
        Self {
            context_builder: ContextBuilder::new(claims.clone(), rules_timeout),
            claims,
            audits,
            executor,
            aggregator: ViolationAggregator::new(),
            rag,
            metrics: None,
            in_flight: Mutex::new(HashSet::new()),
            claim_fetch_timeout: Duration::from_millis(config.orchestrator.claim_fetch_timeout_ms),
            repository_timeout: Duration::from_millis(config.orchestrator.repository_timeout_ms),
            rules_timeout,
            rag_timeout: Duration::from_millis(config.orchestrator.rag_timeout_ms),
            rag_pass_threshold: config.orchestrator.rag_pass_threshold,
            top_k: config.rag.top_k,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AuditMetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn executor(&self) -> &Arc<RuleExecutor> {
        &self.executor
    }

    /// Audit a claim to completion on the current task
    pub async fn start_audit(&self, claim_id: &str) -> Result<AuditResult> {
        self.run(AuditResult::running(claim_id), &CancellationToken::new()).await
    }

    /// Like [`start_audit`](Self::start_audit), observing `cancel`
    pub async fn start_audit_with_cancel(&self, claim_id: &str, cancel: &CancellationToken) -> Result<AuditResult> {
        self.run(AuditResult::running(claim_id), cancel).await
    }

    /// Re-run a failed audit for the same claim
    pub async fn retry_audit(&self, audit_id: Uuid) -> Result<AuditResult> {
        let previous = self.bounded_repo("audit read", self.audits.get(audit_id)).await?;
        if previous.status != AuditStatus::Failed {
            return Err(AuditError::not_retryable(audit_id, previous.status));
        }
        info!(audit_id = %audit_id, claim_id = %previous.claim_id, attempt = previous.attempt + 1, "Retrying audit");
        let seed = AuditResult::running(previous.claim_id.clone()).retrying(&previous);
        self.run(seed, &CancellationToken::new()).await
    }

    /// Audit a claim on its own task
    pub fn spawn_audit(self: &Arc<Self>, claim_id: &str) -> AuditHandle {
        let seed = AuditResult::running(claim_id);
        let audit_id = seed.id;
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run(seed, &token).await });
        AuditHandle {
            audit_id,
            claim_id: claim_id.to_string(),
            cancel,
            join,
        }
    }

    pub async fn get_audit_status(&self, audit_id: Uuid) -> Result<AuditStatus> {
        Ok(self.get_audit_result(audit_id).await?.status)
    }

    pub async fn get_audit_result(&self, audit_id: Uuid) -> Result<AuditResult> {
        self.bounded_repo("audit read", self.audits.get(audit_id)).await
    }

    /// Every run for a claim, oldest first
    pub async fn list_audits(&self, claim_id: &str) -> Result<Vec<AuditResult>> {
        self.bounded_repo("audit list", self.audits.list_by_claim(claim_id)).await
    }

    fn claim_in_flight(&self, claim_id: &str) -> Result<InFlight<'_>> {
        let mut claims = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !claims.insert(claim_id.to_string()) {
            return Err(AuditError::invalid_state(format!(
                "claim {} already has an audit in progress",
                claim_id
            )));
        }
        Ok(InFlight {
            claims: &self.in_flight,
            claim_id: claim_id.to_string(),
        })
    }

    async fn run(&self, mut record: AuditResult, cancel: &CancellationToken) -> Result<AuditResult> {
        let _in_flight = self.claim_in_flight(&record.claim_id)?;
        let audit_id = record.id;

        let claim_id = record.claim_id.clone();
        let claim: Claim = self
            .bounded(cancel, audit_id, "claim fetch", self.claim_fetch_timeout, async {
                self.claims
                    .get_claim(&claim_id)
                    .await
                    .map_err(|source| AuditError::ClaimFetch {
                        claim_id: claim_id.clone(),
                        source,
                    })
            })
            .await
            .map_err(|e| {
                warn!(claim_id = %claim_id, error = %e, "Audit aborted before start");
                e
            })?;

        self.bounded(cancel, audit_id, "audit create", self.repository_timeout, self.audits.create(&record))
            .await?;
        let timer = self.metrics.as_ref().map(|m| m.audit().start_audit());
        info!(
            audit_id = %audit_id,
            claim_id = %claim.id,
            attempt = record.attempt,
            retry_of = ?record.retry_of,
            "Audit started"
        );

        // Rule validation
        let rule_stage = async {
            let library = self
                .bounded(cancel, audit_id, "rule library load", self.rules_timeout, self.executor.ensure_loaded())
                .await?;
            let context = self
                .bounded(cancel, audit_id, "context build", self.rules_timeout, self.context_builder.build(&claim))
                .await?;
            Ok::<_, AuditError>(self.executor.execute_all(&library, &context))
        };
        let results = match rule_stage.await {
            Ok(results) => results,
            Err(e) => return self.abort(record, "rule validation", e, timer).await,
        };

        let report = self.aggregator.aggregate(&results);
        let rule_pass = results.iter().all(|r| r.passed);
        if let Some(metrics) = &self.metrics {
            for result in &results {
                metrics.audit().record_rule_evaluation(result.passed, result.error.is_some());
            }
            for violation in &report.violations {
                metrics.audit().record_violation(violation.severity);
            }
        }
        record.rule_pass = Some(rule_pass);
        record.violations = report.violations;
        record.violation_summary = report.summary;
        debug!(
            audit_id = %audit_id,
            evaluated = results.len(),
            rule_pass,
            summary = %record.violation_summary,
            "Rule validation complete"
        );
        let persisted = self
            .bounded(cancel, audit_id, "audit update", self.repository_timeout, self.audits.update(&record))
            .await;
        if let Err(e) = persisted {
            return self.abort(record, "rule validation", e, timer).await;
        }

        // Semantic analysis
        let fields = claim.fields();
        let analysis = match self
            .bounded(
                cancel,
                audit_id,
                "semantic analysis",
                self.rag_timeout,
                self.rag.audit_reimbursement(&fields, self.top_k),
            )
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => return self.abort(record, "semantic analysis", e, timer).await,
        };

        // Fusion
        let verdict = fusion::fuse(
            rule_pass,
            &record.violations,
            Some(analysis.confidence),
            self.rag_pass_threshold,
        );
        record.rag_pass = Some(verdict.rag_pass);
        record.final_pass = Some(verdict.final_pass);
        record.risk_score = Some(verdict.risk_score);
        record.risk_level = Some(verdict.risk_level);
        record.suggestions = verdict.suggestions;
        record.analysis = Some(analysis);
        record.complete();

        self.persist_terminal(&record).await?;
        if let Some(metrics) = &self.metrics {
            if let Some(analysis) = &record.analysis {
                metrics.audit().observe_confidence(analysis.confidence);
            }
            metrics.audit().observe_risk(verdict.risk_score);
        }
        if let Some(timer) = timer {
            timer.finish(AuditStatus::Completed.as_str());
        }

        info!(
            audit_id = %audit_id,
            claim_id = %record.claim_id,
            final_pass = verdict.final_pass,
            rule_pass,
            rag_pass = verdict.rag_pass,
            risk_score = verdict.risk_score,
            risk_level = %verdict.risk_level,
            duration_ms = record.duration_ms.unwrap_or_default(),
            "Audit completed"
        );
        Ok(record)
    }

    /// Mark the run Failed and persist it; the failure lives on the record
    async fn abort(
        &self,
        mut record: AuditResult,
        stage: &'static str,
        cause: AuditError,
        timer: Option<crate::telemetry::AuditTimer<'_>>,
    ) -> Result<AuditResult> {
        let reason = match &cause {
            AuditError::Cancelled(_) => CANCELLED_REASON.to_string(),
            other => format!("{} failed: {}", stage, other),
        };
        record.fail(reason);
        self.persist_terminal(&record).await?;
        if let Some(timer) = timer {
            timer.finish(AuditStatus::Failed.as_str());
        }

        error!(
            audit_id = %record.id,
            claim_id = %record.claim_id,
            stage,
            kind = cause.kind(),
            reason = %record.reason,
            "Audit failed"
        );
        Ok(record)
    }

    /// Terminal writes ignore cancellation so the outcome is always recorded
    async fn persist_terminal(&self, record: &AuditResult) -> Result<()> {
        self.bounded_repo("audit update", self.audits.update(record)).await
    }

    async fn bounded_repo<T, E>(&self, operation: &'static str, fut: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
    where
        AuditError: From<E>,
    {
        match tokio::time::timeout(self.repository_timeout, fut).await {
            Ok(outcome) => outcome.map_err(AuditError::from),
            Err(_) => Err(AuditError::timeout(operation, self.repository_timeout.as_millis() as u64)),
        }
    }

    /// Await `fut` under `limit`, giving up early if the run is cancelled
    async fn bounded<T, E>(
        &self,
        cancel: &CancellationToken,
        audit_id: Uuid,
        operation: &'static str,
        limit: Duration,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T>
    where
        AuditError: From<E>,
    {
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled(audit_id));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuditError::Cancelled(audit_id)),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(result) => result.map_err(AuditError::from),
                Err(_) => Err(AuditError::timeout(operation, limit.as_millis() as u64)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::rag::judgment::{ChatChoice, ChatRequest, ChatResponse, ChatUsage};
    use crate::rag::{ChatMessage, ChatModel, HashingEmbedder, JudgmentClient};
    use crate::repository::{InMemoryAuditRepository, InMemoryClaimRepository, InMemoryRuleRepository};
    use crate::rules::{ExprRuleEngine, Rule, RuleType};
    use crate::vector::VectorStore;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    const DIM: usize = 32;

    struct ScriptedChat {
        content: String,
        delay: Duration,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _request: &ChatRequest) -> crate::rag::Result<ChatResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(ChatResponse {
                id: "r".to_string(),
                model: "scripted".to_string(),
                choices: vec![ChatChoice {
                    message: ChatMessage {
                        role: "assistant".to_string(),
                        content: self.content.clone(),
                    },
                }],
                usage: Some(ChatUsage { total_tokens: 12 }),
            })
        }
    }

    fn claim(id: &str, amount: f64) -> Claim {
        Claim {
            id: id.to_string(),
            employee_id: "e-1".to_string(),
            department: "sales".to_string(),
            claim_type: "travel".to_string(),
            category: "hotel".to_string(),
            amount,
            currency: "CNY".to_string(),
            description: "hotel stay".to_string(),
            vendor: "Hilton".to_string(),
            expense_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            submitted_at: Utc::now(),
            attachment_count: 1,
            invoice: None,
        }
    }

    fn orchestrator(rules: Vec<Rule>, content: &str, delay: Duration) -> Arc<AuditOrchestrator> {
        let config = AuditConfig::default();
        let claims = Arc::new(InMemoryClaimRepository::with_claims(vec![claim("c-1", 2500.0), claim("c-2", 100.0)]));
        let executor = Arc::new(RuleExecutor::new(
            Arc::new(InMemoryRuleRepository::with_rules(rules)),
            Arc::new(ExprRuleEngine::new()),
        ));
        let chat = Arc::new(ScriptedChat {
            content: content.to_string(),
            delay,
        });
        let rag = RagService::new(
            Arc::new(HashingEmbedder::new(DIM)),
            VectorStore::in_memory(DIM),
            JudgmentClient::new(chat, &ChatConfig::default()),
        );
        Arc::new(AuditOrchestrator::new(
            claims,
            Arc::new(InMemoryAuditRepository::new()),
            executor,
            Arc::new(rag),
            &config,
        ))
    }

    fn amount_rule() -> Rule {
        Rule::new("AMT-001", "Amount cap", RuleType::Amount, "amount <= 2000").with_priority(10)
    }

    #[tokio::test]
    async fn test_rule_failure_completes_with_violation() {
        let orchestrator = orchestrator(vec![amount_rule()], "The claim needs review against policy.", Duration::ZERO);
        let result = orchestrator.start_audit("c-1").await.unwrap();

        assert_eq!(result.status, AuditStatus::Completed);
        assert_eq!(result.rule_pass, Some(false));
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.final_pass, Some(false));
        assert!(result.analysis.is_some());
        assert!(result.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_claim_creates_no_record() {
        let orchestrator = orchestrator(vec![], "irrelevant answer text", Duration::ZERO);
        let err = orchestrator.start_audit("nope").await.unwrap_err();
        assert!(matches!(err, AuditError::ClaimFetch { .. }));
        assert!(orchestrator.list_audits("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_library_passes_rules() {
        let orchestrator = orchestrator(vec![], "Nothing in policy objects to this claim.", Duration::ZERO);
        let result = orchestrator.start_audit("c-2").await.unwrap();
        assert_eq!(result.rule_pass, Some(true));
        assert!(result.violations.is_empty());
        assert_eq!(result.violation_summary, "no violations");
    }

    #[tokio::test]
    async fn test_judgment_validation_failure_marks_failed_and_is_retryable() {
        let orchestrator = orchestrator(vec![amount_rule()], "short", Duration::ZERO);
        let failed = orchestrator.start_audit("c-1").await.unwrap();
        assert_eq!(failed.status, AuditStatus::Failed);
        assert!(failed.reason.starts_with("semantic analysis failed"));
        assert_eq!(failed.rule_pass, Some(false));
        assert_eq!(failed.final_pass, None);

        let retried = orchestrator.retry_audit(failed.id).await.unwrap();
        assert_eq!(retried.retry_of, Some(failed.id));
        assert_eq!(retried.attempt, 2);
        assert_eq!(orchestrator.list_audits("c-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_of_completed_is_rejected() {
        let orchestrator = orchestrator(vec![], "A sufficiently long answer.", Duration::ZERO);
        let done = orchestrator.start_audit("c-2").await.unwrap();
        let err = orchestrator.retry_audit(done.id).await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidState(_)));
        assert_eq!(orchestrator.list_audits("c-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_for_same_claim_rejected() {
        let orchestrator = orchestrator(vec![], "A sufficiently long answer.", Duration::from_millis(200));
        let handle = orchestrator.spawn_audit("c-2");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = orchestrator.start_audit("c-2").await.unwrap_err();
        assert!(matches!(err, AuditError::InvalidState(_)));
        assert_eq!(orchestrator.get_audit_status(handle.audit_id()).await.unwrap(), AuditStatus::Running);

        let result = handle.join().await.unwrap();
        assert_eq!(result.status, AuditStatus::Completed);
        assert!(result.risk_score.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_records_failed_run() {
        let orchestrator = orchestrator(vec![amount_rule()], "A sufficiently long answer.", Duration::from_secs(5));
        let handle = orchestrator.spawn_audit("c-1");
        let audit_id = handle.audit_id();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let result = handle.join().await.unwrap();
        assert_eq!(result.id, audit_id);
        assert_eq!(result.status, AuditStatus::Failed);
        assert_eq!(result.reason, CANCELLED_REASON);
        // Rule results from before the cancel are kept
        assert_eq!(result.violations.len(), 1);

        let stored = orchestrator.get_audit_result(audit_id).await.unwrap();
        assert_eq!(stored.status, AuditStatus::Failed);
    }
}

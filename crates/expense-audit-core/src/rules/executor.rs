//! Versioned rule library and priority-ordered rule execution
//!
//! The executor keeps the compiled library as an immutable `Arc` snapshot.
//! [`RuleExecutor::reload`] builds a complete replacement from the rule
//! repository and publishes it with a single pointer swap, so a run that
//! already holds a snapshot keeps seeing the library it started with.
//! Per-rule statistics live behind their own lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::AuditContext;
use super::engine::{CompiledRule, RuleEngine};
use super::{Result, Rule, RuleError, RuleValidationResult};
use crate::repository::{PageRequest, RuleFilter, RuleRepository};

/// Default number of rules fetched per repository page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A rule together with its compiled predicate
#[derive(Debug, Clone)]
pub struct LoadedRule {
    pub rule: Rule,
    pub compiled: CompiledRule,
}

/// A rule excluded from the library because it did not compile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRule {
    pub rule_id: String,
    pub code: String,
    pub error: String,
}

/// Immutable snapshot of the compiled rules
#[derive(Debug, Default)]
pub struct RuleLibrary {
    version: u64,
    /// Sorted by descending priority, ties in load order
    entries: Vec<LoadedRule>,
    by_id: HashMap<String, usize>,
    rejected: Vec<RejectedRule>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RuleLibrary {
    /// Compile `rules` in load order, excluding those that fail
    pub fn build(version: u64, rules: Vec<Rule>, engine: &dyn RuleEngine) -> Self {
        let mut entries = Vec::with_capacity(rules.len());
        let mut rejected = Vec::new();

        for rule in rules {
            match engine.compile(&rule) {
                Ok(compiled) => entries.push(LoadedRule { rule, compiled }),
                Err(e) => {
                    warn!(rule_id = %rule.id, code = %rule.code, error = %e, "Rule rejected at load");
                    rejected.push(RejectedRule {
                        rule_id: rule.id,
                        code: rule.code,
                        error: e.to_string(),
                    });
                }
            }
        }

        // sort_by is stable
        entries.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.rule.id.clone(), i))
            .collect();

        Self {
            version,
            entries,
            by_id,
            rejected,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rule_id: &str) -> Option<&LoadedRule> {
        self.by_id.get(rule_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.by_id.contains_key(rule_id)
    }

    /// Rules in execution order
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.entries.iter().map(|e| &e.rule)
    }

    pub fn rejected(&self) -> &[RejectedRule] {
        &self.rejected
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Outcome of a library reload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub version: u64,
    pub loaded: usize,
    pub rejected: Vec<RejectedRule>,
}

/// Execution statistics for one rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub executions: u64,
    /// Evaluations where the predicate held
    pub successes: u64,
    /// Evaluations where the predicate did not hold, errors included
    pub failures: u64,
    /// Evaluations that raised an engine error
    pub errors: u64,
    /// Running mean latency in microseconds
    pub avg_latency_us: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl RuleStats {
    fn record(&mut self, result: &RuleValidationResult) {
        self.executions += 1;
        if result.passed {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if result.error.is_some() {
            self.errors += 1;
        }
        let n = self.executions as f64;
        self.avg_latency_us = ((n - 1.0) * self.avg_latency_us + result.duration_us as f64) / n;
        self.last_executed_at = Some(Utc::now());
    }
}

/// Runs compiled rules against audit contexts
pub struct RuleExecutor {
    repository: Arc<dyn RuleRepository>,
    engine: Arc<dyn RuleEngine>,
    page_size: usize,
    library: RwLock<Option<Arc<RuleLibrary>>>,
    stats: RwLock<HashMap<String, RuleStats>>,
    reload_gate: Mutex<()>,
}

impl RuleExecutor {
    pub fn new(repository: Arc<dyn RuleRepository>, engine: Arc<dyn RuleEngine>) -> Self {
        Self {
            repository,
            engine,
            page_size: DEFAULT_PAGE_SIZE,
            library: RwLock::new(None),
            stats: RwLock::new(HashMap::new()),
            reload_gate: Mutex::new(()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn engine(&self) -> &Arc<dyn RuleEngine> {
        &self.engine
    }

    /// Current library snapshot, if one has been loaded
    pub fn library(&self) -> Option<Arc<RuleLibrary>> {
        self.library
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch every enabled rule, compile, and publish a new library
    ///
    /// A repository failure leaves the current library untouched.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let _gate = self.reload_gate.lock().await;
        self.reload_locked().await
    }

    async fn reload_locked(&self) -> Result<ReloadReport> {
        let rules = self.fetch_enabled().await?;
        let version = self.library().map_or(1, |lib| lib.version() + 1);
        let library = Arc::new(RuleLibrary::build(version, rules, self.engine.as_ref()));

        let report = ReloadReport {
            version,
            loaded: library.len(),
            rejected: library.rejected().to_vec(),
        };

        *self.library.write().unwrap_or_else(PoisonError::into_inner) = Some(library);

        info!(
            engine = self.engine.name(),
            version,
            loaded = report.loaded,
            rejected = report.rejected.len(),
            "Rule library published"
        );
        Ok(report)
    }

    /// Load the library on first use and return the current snapshot
    pub async fn ensure_loaded(&self) -> Result<Arc<RuleLibrary>> {
        if let Some(library) = self.library() {
            return Ok(library);
        }

        let _gate = self.reload_gate.lock().await;
        // Another caller may have loaded while we waited
        if let Some(library) = self.library() {
            return Ok(library);
        }
        self.reload_locked().await?;
        self.library()
            .ok_or_else(|| RuleError::NotLoaded("rule library".to_string()))
    }

    async fn fetch_enabled(&self) -> Result<Vec<Rule>> {
        let filter = RuleFilter::enabled_only();
        let mut page = PageRequest::first(self.page_size);
        let mut rules = Vec::new();

        loop {
            let batch = self.repository.list(&filter, page).await?;
            let has_more = batch.has_more() && !batch.items.is_empty();
            debug!(offset = page.offset, fetched = batch.items.len(), total = batch.total, "Fetched rule page");
            rules.extend(batch.items);
            if !has_more {
                break;
            }
            page = page.next();
        }

        Ok(rules)
    }

    /// Execute one rule by id
    ///
    /// Engine errors are folded into a failing result; only an unknown rule
    /// id is an error.
    pub async fn execute(&self, rule_id: &str, ctx: &AuditContext) -> Result<RuleValidationResult> {
        let library = self.ensure_loaded().await?;
        let loaded = library
            .get(rule_id)
            .ok_or_else(|| RuleError::NotLoaded(rule_id.to_string()))?;
        let result = self.run(loaded, ctx);
        self.record(&result);
        Ok(result)
    }

    /// Execute every loaded rule in priority order against one snapshot
    pub fn execute_all(&self, library: &RuleLibrary, ctx: &AuditContext) -> Vec<RuleValidationResult> {
        let results: Vec<RuleValidationResult> = library
            .entries
            .iter()
            .map(|loaded| self.run(loaded, ctx))
            .collect();

        {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            for result in &results {
                stats.entry(result.rule_id.clone()).or_default().record(result);
            }
        }

        debug!(
            claim_id = %ctx.claim_id,
            library_version = library.version(),
            evaluated = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            "Rules executed"
        );
        results
    }

    fn run(&self, loaded: &LoadedRule, ctx: &AuditContext) -> RuleValidationResult {
        let rule = &loaded.rule;
        let started = Instant::now();
        let outcome = self.engine.execute(&loaded.compiled, ctx);
        let duration_us = started.elapsed().as_micros() as u64;

        let (passed, message, error) = match outcome {
            Ok(true) => (true, format!("{} passed", rule.name), None),
            Ok(false) => (false, rule.failure_message(), None),
            Err(e) => {
                warn!(rule_id = %rule.id, claim_id = %ctx.claim_id, error = %e, "Rule could not be evaluated");
                (
                    false,
                    format!("{} could not be evaluated: {}", rule.name, e),
                    Some(e.to_string()),
                )
            }
        };

        RuleValidationResult {
            rule_id: rule.id.clone(),
            rule_code: rule.code.clone(),
            rule_name: rule.name.clone(),
            rule_type: rule.rule_type,
            priority: rule.priority,
            rule_version: rule.version,
            passed,
            message,
            severity: rule.rule_type.severity(),
            duration_us,
            error,
        }
    }

    fn record(&self, result: &RuleValidationResult) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(result.rule_id.clone())
            .or_default()
            .record(result);
    }

    pub fn stats(&self, rule_id: &str) -> Option<RuleStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(rule_id)
            .cloned()
    }

    pub fn all_stats(&self) -> HashMap<String, RuleStats> {
        self.stats.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

//! Process Validator - live processes vs. process allow-rules
//!
//! # Decision per pass
//!
//! ```text
//! for each constraint
//!   for each rule with a non-empty regex (bad regex: logged, skipped)
//!     for each process
//!       name matches  → allowed[pid]
//!       otherwise     → violations[pid]
//!
//! violations -= allowed      (any allow anywhere wins)
//! ```
//!
//! A policy without process rules therefore never reports a process.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ProcessSource;
use crate::agent::wait_for_next_pass;
use crate::grpc::pb::Process;
use crate::metrics::{INVALID_RULES_TOTAL, VALIDATION_PASS_DURATION, VIOLATIONS_DETECTED};
use crate::policy::{PolicyCache, PolicySnapshot};
use crate::reporter::ViolationReporter;

/// Compiled process patterns for one policy generation
///
/// Keyed by pattern text. Dropped whenever a new constraint set is
/// installed, so a pattern is compiled (and, if broken, logged) once per
/// generation rather than once per pass.
#[derive(Debug, Default)]
pub struct PatternCache {
    generation: u64,
    patterns: HashMap<String, Option<Regex>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&mut self, pattern: &str) -> Option<&Regex> {
        if !self.patterns.contains_key(pattern) {
            let compiled = match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    error!(expr = pattern, error = %e, "can not compile regex, skipping rule");
                    INVALID_RULES_TOTAL.with_label_values(&["process"]).inc();
                    None
                }
            };
            self.patterns.insert(pattern.to_string(), compiled);
        }
        self.patterns.get(pattern).and_then(Option::as_ref)
    }

    /// Processes no rule in `snapshot` allows, keyed by pid
    pub fn find_violations(
        &mut self,
        snapshot: &PolicySnapshot,
        processes: &[Process],
    ) -> BTreeMap<i32, Process> {
        if snapshot.generation != self.generation {
            self.patterns.clear();
            self.generation = snapshot.generation;
        }

        let mut violations = BTreeMap::new();
        let mut allowed = BTreeSet::new();

        for constraint in snapshot.constraints.iter() {
            for rule in &constraint.allowed_processes {
                let Some(pattern) = rule.regex.as_deref().filter(|p| !p.is_empty()) else {
                    continue;
                };
                let Some(regex) = self.compiled(pattern) else {
                    continue;
                };

                debug!(expr = pattern, "looking for running processes that violate regex");

                for process in processes {
                    if regex.is_match(&process.name) {
                        allowed.insert(process.pid);
                    } else {
                        violations.insert(process.pid, process.clone());
                    }
                }
            }
        }

        violations.retain(|pid, _| !allowed.contains(pid));
        violations
    }
}

/// Periodically checks the process table against the policy
pub struct ProcessValidator {
    source: Arc<dyn ProcessSource>,
    cache: Arc<PolicyCache>,
    reporter: Arc<ViolationReporter>,
    patterns: PatternCache,
    interval: Duration,
}

impl ProcessValidator {
    pub fn new(
        source: Arc<dyn ProcessSource>,
        cache: Arc<PolicyCache>,
        reporter: Arc<ViolationReporter>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            reporter,
            patterns: PatternCache::new(),
            interval,
        }
    }

    /// One validation pass; reports and returns the violating processes
    pub async fn validate_once(&mut self) -> BTreeMap<i32, Process> {
        let start = Instant::now();

        let source = Arc::clone(&self.source);
        let processes = match tokio::task::spawn_blocking(move || source.processes()).await {
            Ok(Ok(processes)) => processes,
            Ok(Err(e)) => {
                warn!(error = %e, "can not list processes, skipping pass");
                return BTreeMap::new();
            }
            Err(e) => {
                error!(error = %e, "process listing task failed, skipping pass");
                return BTreeMap::new();
            }
        };

        // Snapshot after the OS calls: the lock is never held across them
        let snapshot = self.cache.snapshot().await;
        let violations = self.patterns.find_violations(&snapshot, &processes);

        VALIDATION_PASS_DURATION
            .with_label_values(&["process"])
            .observe(start.elapsed().as_secs_f64());

        if !violations.is_empty() {
            for process in violations.values() {
                debug!(
                    pid = process.pid,
                    process = %process.name,
                    "found process that violates regex"
                );
            }
            VIOLATIONS_DETECTED
                .with_label_values(&["process"])
                .inc_by(violations.len() as f64);

            self.reporter
                .report_processes(violations.values().cloned().collect())
                .await;
        }

        violations
    }

    /// Validate until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, "process validation started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.validate_once() => {}
            }

            if !wait_for_next_pass(self.interval, &shutdown).await {
                break;
            }
        }

        info!("process validation stopped");
    }
}

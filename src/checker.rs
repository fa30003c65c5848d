//! Parallel compatibility run
//!
//! Identity matching happens once, up front. The matched pairs are then
//! shared read-only between a fixed pool of scoped worker threads that pull
//! the next unclaimed pair from an atomic cursor. Each worker keeps its own
//! findings and hands them back when it is joined, so nothing is locked while
//! rules run. Output order never depends on scheduling: the aggregator sorts
//! everything at the end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CheckConfig;
use crate::diff::{diff_pair, DiffStats};
use crate::error::Result;
use crate::matcher::{match_types, TypePair};
use crate::report::{Aggregator, Finding, Report};
use crate::rules::{RuleContext, RuleRegistry, SeverityTable};
use crate::schema::SchemaSnapshot;

/// Cooperative cancellation shared between a run and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What one worker produced
#[derive(Debug, Default)]
struct WorkerOutput {
    findings: Vec<Finding>,
    stats: DiffStats,
    processed: usize,
}

/// A configured checker, reusable across runs
#[derive(Debug)]
pub struct Checker {
    config: CheckConfig,
    registry: RuleRegistry,
    severities: SeverityTable,
}

impl Checker {
    /// Validate `config` and build the rule set it selects
    pub fn new(config: CheckConfig) -> Result<Self> {
        config.validate()?;
        let registry = RuleRegistry::from_config(&config)?;
        Self::with_registry(config, registry)
    }

    /// Use an explicit rule set instead of the configured allow/deny lists
    pub fn with_registry(config: CheckConfig, registry: RuleRegistry) -> Result<Self> {
        config.validate()?;
        let severities = SeverityTable::from_config(&config)?;
        Ok(Self {
            config,
            registry,
            severities,
        })
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn check(&self, base: &SchemaSnapshot, candidate: &SchemaSnapshot) -> Report {
        self.check_with_cancel(base, candidate, &CancellationToken::new())
    }

    /// Run every rule over every matched pair.
    ///
    /// If `cancel` fires, workers stop claiming new pairs and the report is
    /// marked incomplete with an unknown verdict.
    pub fn check_with_cancel(&self, base: &SchemaSnapshot, candidate: &SchemaSnapshot, cancel: &CancellationToken) -> Report {
        let pairs = match_types(base, candidate);
        let workers = self.config.effective_workers().min(pairs.len()).max(1);
        info!(
            base = base.label(),
            candidate = candidate.label(),
            types = pairs.len(),
            rules = self.registry.len(),
            workers,
            "checking compatibility"
        );

        let next = AtomicUsize::new(0);
        let outputs: Vec<WorkerOutput> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                handles.push(scope.spawn(|| self.work(&pairs, &next, base, candidate, cancel)));
            }
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut findings = Vec::new();
        let mut stats = DiffStats::default();
        let mut processed = 0;
        for mut output in outputs {
            findings.append(&mut output.findings);
            stats.merge(output.stats);
            processed += output.processed;
        }

        let complete = processed == pairs.len();
        if !complete {
            warn!(processed, total = pairs.len(), "run cancelled before every type was checked");
        }

        let report = Aggregator::new(self.config.treat_advisory_as_error).finish(findings, stats, complete, base, candidate);
        info!(
            verdict = %report.verdict,
            breaking = report.breaking_count(),
            advisory = report.advisory_count(),
            "check finished"
        );
        report
    }

    fn work(
        &self,
        pairs: &[TypePair<'_>],
        next: &AtomicUsize,
        base: &SchemaSnapshot,
        candidate: &SchemaSnapshot,
        cancel: &CancellationToken,
    ) -> WorkerOutput {
        let mut output = WorkerOutput::default();
        loop {
            if cancel.is_cancelled() {
                return output;
            }
            let idx = next.fetch_add(1, Ordering::Relaxed);
            let Some(pair) = pairs.get(idx) else {
                return output;
            };

            let diff = diff_pair(pair);
            output.processed += 1;
            if diff.is_empty() {
                continue;
            }
            debug!(type_name = pair.name, events = diff.events.len(), "evaluating rules");

            let ctx = RuleContext {
                base,
                candidate,
                config: &self.config,
                severities: &self.severities,
                type_name: pair.name,
            };
            output.stats.merge(diff.stats());
            output.findings.extend(self.registry.evaluate(&ctx, &diff));
        }
    }
}

/// Check with a freshly built checker
pub fn check(base: &SchemaSnapshot, candidate: &SchemaSnapshot, config: CheckConfig) -> Result<Report> {
    Ok(Checker::new(config)?.check(base, candidate))
}

//! One read → classify → compose → apply cycle.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::Classifier;
use crate::compose::{CommitPlan, Composer};
use crate::config::PipelineConfig;
use crate::engine::{Engine, Failure, PlanSummary, RunResult, SkipReason};
use crate::error::ErrorKind;
use crate::snapshot::SnapshotReader;
use crate::vcs::{HeadRef, VcsWrite};

/// Whether a cycle commits or only drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    Apply,
    DryRun,
}

/// Everything one cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub mode: RunMode,
    /// Snapshot sequence number, if a snapshot was taken.
    pub sequence: Option<u64>,
    pub head: Option<HeadRef>,
    pub plans: Vec<PlanSummary>,
    /// Full plans, kept only in dry runs since applied plans are consumed.
    pub drafts: Vec<CommitPlan>,
    pub result: RunResult,
}

impl CycleReport {
    fn empty(mode: RunMode) -> Self {
        Self {
            mode,
            sequence: None,
            head: None,
            plans: Vec::new(),
            drafts: Vec::new(),
            result: RunResult::default(),
        }
    }

    /// A cycle that failed before producing any plan.
    pub fn failed(mode: RunMode, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            result: RunResult::failed(kind, detail),
            ..Self::empty(mode)
        }
    }

    /// Nothing pending and nothing went wrong.
    pub fn is_noop(&self) -> bool {
        self.plans.is_empty() && self.result.is_success()
    }
}

/// Reader, classifier, composer and engine bound to one backend.
pub struct Pipeline<B> {
    backend: B,
    reader: SnapshotReader,
    classifier: Classifier,
    engine: Engine,
    config: PipelineConfig,
    /// Local commits not yet on the push remote.
    unpushed: bool,
}

impl<B: VcsWrite> Pipeline<B> {
    pub fn new(backend: B, config: PipelineConfig) -> Self {
        let classifier = Classifier::new(config.rules.clone(), config.classifier.clone());
        Self {
            backend,
            reader: SnapshotReader::new(),
            classifier,
            engine: Engine::new(),
            config,
            unpushed: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run one cycle. Every outcome, including early failures, is reported.
    ///
    /// With a push remote configured, a cycle pushes when it committed
    /// something or when an earlier push failed, even if the tree is clean.
    pub fn run(&mut self, mode: RunMode, cancel: &CancellationToken) -> CycleReport {
        let mut report = self.cycle(mode, cancel);

        if mode == RunMode::Apply
            && !cancel.is_cancelled()
            && let Some(remote) = &self.config.push_remote
        {
            if !report.result.applied.is_empty() {
                self.unpushed = true;
            }
            if self.unpushed {
                self.unpushed = !self.engine.push(&self.backend, remote, &mut report.result);
            }
        }

        report
    }

    fn cycle(&mut self, mode: RunMode, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::empty(mode);

        let snapshot = match self.reader.snapshot(&self.backend, cancel) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to read repository state: {}", e);
                report.result = RunResult::failed(e.kind(), e.to_string());
                return report;
            }
        };
        report.sequence = Some(snapshot.sequence());
        report.head = Some(snapshot.head().clone());

        if snapshot.is_empty() {
            debug!("Snapshot #{}: working tree clean", snapshot.sequence());
            return report;
        }
        debug!(
            "Snapshot #{}: {} changed paths on {}",
            snapshot.sequence(),
            snapshot.len(),
            snapshot.head()
        );

        let clusters = match self.classifier.classify(&snapshot) {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!("Classification failed: {}", e);
                report.result = RunResult::failed(e.kind(), e.to_string());
                return report;
            }
        };

        let composer = Composer::new(self.config.metadata());
        let mut plans = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let label = cluster.label().to_string();
            match composer.compose(cluster, snapshot.head()) {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    warn!("Could not compose plan for '{}': {}", label, e);
                    report.result.failures.push(Failure {
                        plan: None,
                        kind: e.kind(),
                        detail: e.to_string(),
                    });
                }
            }
        }
        report.plans = plans.iter().map(PlanSummary::of).collect();

        match mode {
            RunMode::DryRun => {
                for plan in &plans {
                    report.result.skip(plan, SkipReason::DryRun);
                }
                report.drafts = plans;
            }
            RunMode::Apply => {
                let applied = self.engine.apply(&self.backend, plans, cancel);
                report.result.applied.extend(applied.applied);
                report.result.skipped.extend(applied.skipped);
                report.result.failures.extend(applied.failures);
            }
        }

        report
    }
}

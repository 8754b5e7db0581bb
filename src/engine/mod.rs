//! Applying commit plans to the repository.
//!
//! The engine is the only component that mutates version control. Each plan
//! is staged and committed in order; a plan whose parent went stale is
//! rebased onto the new head and retried once before it is abandoned.
//! Committed plans are never rolled back, whatever happens to later ones.

pub mod state;

use std::collections::BTreeMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compose::CommitPlan;
use crate::error::{ErrorKind, VcsError};
use crate::vcs::{CommitId, CommitOutcome, HeadRef, VcsWrite};

pub use state::PlanState;
use state::PlanTracker;

/// Rebases allowed per plan after a conflict.
pub const MAX_CONFLICT_RETRIES: u32 = 1;

/// Why a path was not committed in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    DryRun,
    Cancelled,
}

/// Identifying details of a plan, kept after the plan itself is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub label: String,
    pub subject: String,
    pub parent: HeadRef,
    pub paths: Vec<String>,
}

impl PlanSummary {
    pub fn of(plan: &CommitPlan) -> Self {
        Self {
            label: plan.cluster().label().to_string(),
            subject: plan.subject().to_string(),
            parent: plan.parent_ref().clone(),
            paths: plan.staged_paths().iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedCommit {
    pub id: CommitId,
    pub label: String,
    pub subject: String,
}

/// A failure recorded during a cycle. Failures before any plan existed
/// (reading or classifying) carry no plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub plan: Option<PlanSummary>,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Outcome of one pipeline cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub applied: Vec<AppliedCommit>,
    pub skipped: BTreeMap<String, SkipReason>,
    pub failures: Vec<Failure>,
}

impl RunResult {
    /// A result holding a single failure not tied to any plan.
    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            failures: vec![Failure {
                plan: None,
                kind,
                detail: detail.into(),
            }],
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn has_retryable_failure(&self) -> bool {
        self.failures.iter().any(|f| f.kind.is_retryable())
    }

    pub fn skip(&mut self, plan: &CommitPlan, reason: SkipReason) {
        for path in plan.staged_paths() {
            self.skipped.insert(path.clone(), reason);
        }
    }
}

/// Error from a single plan, with the newest head seen while applying it.
struct PlanError {
    kind: ErrorKind,
    detail: String,
    head: Option<HeadRef>,
}

impl PlanError {
    fn vcs(e: &VcsError) -> Self {
        Self {
            kind: e.kind(),
            detail: e.to_string(),
            head: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Engine;

impl Engine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `plans` in order.
    ///
    /// Head is read fresh first. Each committed plan becomes the parent of
    /// the next, so the engine's own commits never look like conflicts.
    /// `cancel` is checked between plans only; a plan that has started is
    /// carried through.
    pub fn apply<B: VcsWrite + ?Sized>(
        &self,
        backend: &B,
        plans: Vec<CommitPlan>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let mut result = RunResult::default();
        if plans.is_empty() {
            return result;
        }

        let mut expected = match backend.head_ref() {
            Ok(head) => head,
            Err(e) => {
                warn!("Failed to read head before applying plans: {}", e);
                for plan in &plans {
                    result.failures.push(Failure {
                        plan: Some(PlanSummary::of(plan)),
                        kind: e.kind(),
                        detail: e.to_string(),
                    });
                }
                return result;
            }
        };

        let mut plans = plans.into_iter();
        while let Some(mut plan) = plans.next() {
            if cancel.is_cancelled() {
                debug!("Cancelled before '{}'", plan.cluster().label());
                result.skip(&plan, SkipReason::Cancelled);
                for rest in plans.by_ref() {
                    result.skip(&rest, SkipReason::Cancelled);
                }
                break;
            }

            if *plan.parent_ref() != expected {
                debug!(
                    "Plan '{}' drafted on {}, applying on {}",
                    plan.cluster().label(),
                    plan.parent_ref(),
                    expected
                );
                plan.rebase(expected.clone());
            }

            match self.apply_one(backend, &mut plan) {
                Ok(id) => {
                    info!("Committed {} {}", id.short(), plan.subject());
                    expected = HeadRef::Commit(id.clone());
                    result.applied.push(AppliedCommit {
                        id,
                        label: plan.cluster().label().to_string(),
                        subject: plan.subject().to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Plan '{}' failed ({}): {}",
                        plan.cluster().label(),
                        e.kind,
                        e.detail
                    );
                    if let Some(head) = e.head {
                        expected = head;
                    }
                    result.failures.push(Failure {
                        plan: Some(PlanSummary::of(&plan)),
                        kind: e.kind,
                        detail: e.detail,
                    });
                }
            }
        }

        result
    }

    fn apply_one<B: VcsWrite + ?Sized>(
        &self,
        backend: &B,
        plan: &mut CommitPlan,
    ) -> Result<CommitId, PlanError> {
        let mut tracker = PlanTracker::new(plan.cluster().label());
        let mut retries = 0;

        loop {
            if let Err(e) = backend.stage(plan.staged_paths()) {
                tracker.advance(PlanState::Failed);
                return Err(PlanError::vcs(&e));
            }
            tracker.advance(PlanState::Staged);

            let outcome = backend.commit(plan.message(), plan.metadata(), plan.parent_ref());
            match outcome {
                Ok(CommitOutcome::Committed(id)) => {
                    tracker.advance(PlanState::Committed);
                    return Ok(id);
                }
                Ok(CommitOutcome::Conflicted { head }) => {
                    tracker.advance(PlanState::Conflicted);
                    if retries >= MAX_CONFLICT_RETRIES {
                        tracker.advance(PlanState::Abandoned);
                        return Err(PlanError {
                            kind: ErrorKind::Abandoned,
                            detail: format!(
                                "head moved to {} again after rebasing onto {}",
                                head,
                                plan.parent_ref()
                            ),
                            head: Some(head),
                        });
                    }
                    retries += 1;

                    let fresh = backend.head_ref().map_err(|e| {
                        tracker.advance(PlanState::Failed);
                        PlanError::vcs(&e)
                    })?;
                    debug!(
                        "Head moved from {} to {}, rebasing '{}'",
                        plan.parent_ref(),
                        fresh,
                        plan.cluster().label()
                    );
                    plan.rebase(fresh);
                    tracker.advance(PlanState::Retried);
                }
                Err(e) => {
                    tracker.advance(PlanState::Failed);
                    return Err(PlanError::vcs(&e));
                }
            }
        }
    }

    /// Push the current branch. Returns whether the push went through.
    ///
    /// A failed push is recorded as `PushFailed`; local commits stay.
    pub fn push<B: VcsWrite + ?Sized>(
        &self,
        backend: &B,
        remote: &str,
        result: &mut RunResult,
    ) -> bool {
        match backend.push(remote) {
            Ok(()) => {
                info!("Pushed to {}", remote);
                true
            }
            Err(e) => {
                warn!("Push to {} failed: {}", remote, e);
                result.failures.push(Failure {
                    plan: None,
                    kind: ErrorKind::PushFailed,
                    detail: e.to_string(),
                });
                false
            }
        }
    }
}

//! Per-plan lifecycle.

use std::fmt;

use serde::Serialize;

/// Where a plan is in its lifecycle.
///
/// ```text
/// Pending -> Staged -> Committed
///                   -> Conflicted -> Retried -> Staged
///                                 -> Abandoned
/// ```
/// Any state before `Committed` may also end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanState {
    Pending,
    Staged,
    Committed,
    Conflicted,
    Retried,
    Abandoned,
    Failed,
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanState::Committed | PlanState::Abandoned | PlanState::Failed
        )
    }

    pub fn can_advance_to(&self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Pending, Staged)
                | (Staged, Committed)
                | (Staged, Conflicted)
                | (Conflicted, Retried)
                | (Conflicted, Abandoned)
                | (Retried, Staged)
                | (Pending | Staged | Conflicted | Retried, Failed)
        )
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanState::Pending => "pending",
            PlanState::Staged => "staged",
            PlanState::Committed => "committed",
            PlanState::Conflicted => "conflicted",
            PlanState::Retried => "retried",
            PlanState::Abandoned => "abandoned",
            PlanState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State of one plan plus the path it took, for logging and tests.
#[derive(Debug, Clone)]
pub(crate) struct PlanTracker {
    label: String,
    history: Vec<PlanState>,
}

impl PlanTracker {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            history: vec![PlanState::Pending],
        }
    }

    pub(crate) fn current(&self) -> PlanState {
        self.history
            .last()
            .copied()
            .unwrap_or(PlanState::Pending)
    }

    pub(crate) fn advance(&mut self, next: PlanState) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "invalid plan transition {current} -> {next}"
        );
        tracing::debug!("Plan '{}': {} -> {}", self.label, current, next);
        self.history.push(next);
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &[PlanState] {
        &self.history
    }
}

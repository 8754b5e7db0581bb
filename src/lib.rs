//! auto-git - watches a git working tree and turns pending changes into commits.
//!
//! # Overview
//!
//! Each cycle reads a consistent snapshot of pending changes, partitions it
//! into clusters (user rules first, then directory and time heuristics),
//! drafts one commit plan per cluster and applies the plans in order. Only
//! the execution engine ever mutates the repository.

pub mod classify;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod snapshot;
pub mod vcs;
pub mod watch;

// Re-export commonly used types
pub use classify::{Classifier, ClassifierConfig, Cluster, RuleSet};
pub use compose::{CommitPlan, Composer};
pub use config::PipelineConfig;
pub use engine::{Engine, Failure, RunResult, SkipReason};
pub use error::{
    ClassifyError, ComposeError, ConfigError, ErrorKind, SnapshotError, VcsError, WatchError,
};
pub use pipeline::{CycleReport, Pipeline, RunMode};
pub use snapshot::{ChangeKind, ChangeRecord, Snapshot, SnapshotReader};
pub use vcs::{CommitId, GitBackend, HeadRef, InMemoryBackend, VcsRead, VcsWrite};
pub use watch::{PipelineLock, TriggerLoop, WatchConfig};

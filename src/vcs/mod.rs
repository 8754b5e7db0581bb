//! Version-control backend interface.
//!
//! The pipeline only talks to git through these two traits. [`VcsRead`] is
//! all the snapshot reader gets; only the execution engine holds a
//! [`VcsWrite`].

pub mod git;
pub mod memory;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::VcsError;
use crate::snapshot::ChangeRecord;

pub use git::GitBackend;
pub use memory::InMemoryBackend;

/// Hex object name of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Where the current branch points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum HeadRef {
    /// Branch with no commits yet.
    Unborn,
    Commit(CommitId),
}

impl HeadRef {
    pub fn commit(&self) -> Option<&CommitId> {
        match self {
            HeadRef::Unborn => None,
            HeadRef::Commit(id) => Some(id),
        }
    }
}

impl fmt::Display for HeadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadRef::Unborn => f.write_str("(unborn)"),
            HeadRef::Commit(id) => f.write_str(id.short()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Author and timestamp for a commit, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitMetadata {
    pub author: Author,
    pub timestamp: DateTime<Utc>,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitId),
    /// Head no longer matches the expected parent.
    Conflicted { head: HeadRef },
}

/// Read-only view of a repository.
#[cfg_attr(test, mockall::automock)]
pub trait VcsRead {
    fn head_ref(&self) -> Result<HeadRef, VcsError>;

    /// Pending changes relative to head, staged or not. Implementations check
    /// `cancel` between records.
    fn status_diff(&self, cancel: &CancellationToken) -> Result<Vec<ChangeRecord>, VcsError>;
}

/// Mutating operations, reserved for the execution engine.
pub trait VcsWrite: VcsRead {
    /// Mark exactly `paths` for inclusion in the next commit.
    fn stage(&self, paths: &BTreeSet<String>) -> Result<(), VcsError>;

    /// Commit the staged paths on top of `parent`.
    fn commit(
        &self,
        message: &str,
        metadata: &CommitMetadata,
        parent: &HeadRef,
    ) -> Result<CommitOutcome, VcsError>;

    /// Push the current branch to `remote`.
    fn push(&self, remote: &str) -> Result<(), VcsError>;
}

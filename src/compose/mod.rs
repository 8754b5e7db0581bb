//! Turning clusters into commit plans.

pub mod message;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;
use tracing::debug;

use crate::classify::Cluster;
use crate::error::ComposeError;
use crate::vcs::{CommitMetadata, HeadRef};

pub use message::{CommitMessage, describe};

static OBJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9a-f]{40}|[0-9a-f]{64})$").expect("Invalid regex"));

/// Everything needed to create one commit.
///
/// A plan is consumed by the execution engine exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitPlan {
    cluster: Cluster,
    message: String,
    parent_ref: HeadRef,
    staged_paths: BTreeSet<String>,
    metadata: CommitMetadata,
}

impl CommitPlan {
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn parent_ref(&self) -> &HeadRef {
        &self.parent_ref
    }

    pub fn staged_paths(&self) -> &BTreeSet<String> {
        &self.staged_paths
    }

    pub fn metadata(&self) -> &CommitMetadata {
        &self.metadata
    }

    /// Re-target the plan at a new parent after head moved.
    pub(crate) fn rebase(&mut self, parent: HeadRef) {
        self.parent_ref = parent;
    }
}

/// Drafts commit plans with caller-supplied author and timestamp.
#[derive(Debug, Clone)]
pub struct Composer {
    metadata: CommitMetadata,
}

impl Composer {
    pub fn new(metadata: CommitMetadata) -> Self {
        Self { metadata }
    }

    pub fn compose(&self, cluster: Cluster, parent: &HeadRef) -> Result<CommitPlan, ComposeError> {
        if cluster.is_empty() {
            return Err(ComposeError::EmptyCluster(cluster.label().to_string()));
        }
        validate_parent(parent)?;

        let message = describe(&cluster).format();
        let mut staged_paths = BTreeSet::new();
        for record in cluster.records() {
            staged_paths.insert(record.path.clone());
            if let Some(old) = &record.old_path {
                staged_paths.insert(old.clone());
            }
        }

        debug!(
            "Composed plan for '{}': {} paths on {}",
            cluster.label(),
            staged_paths.len(),
            parent
        );

        Ok(CommitPlan {
            cluster,
            message,
            parent_ref: parent.clone(),
            staged_paths,
            metadata: self.metadata.clone(),
        })
    }
}

fn validate_parent(parent: &HeadRef) -> Result<(), ComposeError> {
    match parent {
        HeadRef::Unborn => Ok(()),
        HeadRef::Commit(id) if OBJECT_NAME.is_match(id.as_str()) => Ok(()),
        HeadRef::Commit(id) => Err(ComposeError::InvalidParentRef(id.to_string())),
    }
}

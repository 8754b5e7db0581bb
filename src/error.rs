//! Error types for auto-git modules using thiserror.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Reportable failure category.
///
/// Every error type in this module maps onto one of these so that a
/// [`RunResult`](crate::engine::RunResult) can carry failures from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    RepoUnavailable,
    PermissionDenied,
    CorruptIndex,
    InconsistentRead,
    ClassificationAmbiguous,
    EmptyCluster,
    InvalidParentRef,
    Conflicted,
    Abandoned,
    ConfigError,
    Cancelled,
    Backend,
    PushFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RepoUnavailable => "RepoUnavailable",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::CorruptIndex => "CorruptIndex",
            ErrorKind::InconsistentRead => "InconsistentRead",
            ErrorKind::ClassificationAmbiguous => "ClassificationAmbiguous",
            ErrorKind::EmptyCluster => "EmptyCluster",
            ErrorKind::InvalidParentRef => "InvalidParentRef",
            ErrorKind::Conflicted => "Conflicted",
            ErrorKind::Abandoned => "Abandoned",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Backend => "Backend",
            ErrorKind::PushFailed => "PushFailed",
        }
    }

    /// Whether the watch loop should schedule another cycle on its own.
    ///
    /// Rule contradictions and configuration problems will not fix
    /// themselves, so only transient repository states qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InconsistentRead
                | ErrorKind::Conflicted
                | ErrorKind::Abandoned
                | ErrorKind::Backend
                | ErrorKind::PushFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the version-control backend.
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("Not a git repository: {0}")]
    RepoUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Git index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("File changed while it was being read: {0}")]
    Vanished(String),

    #[error("Read cancelled")]
    Cancelled,

    #[error("Failed to {operation}: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {operation} failed: {stderr}")]
    CommandFailed { operation: String, stderr: String },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl VcsError {
    /// Wrap a git2 error, promoting the classes that have their own kind.
    pub fn git(operation: &'static str, source: git2::Error) -> Self {
        match source.class() {
            git2::ErrorClass::Index => VcsError::CorruptIndex(source.message().to_string()),
            git2::ErrorClass::Os
                if source.message().to_lowercase().contains("permission denied") =>
            {
                VcsError::PermissionDenied(source.message().to_string())
            }
            _ => VcsError::Git { operation, source },
        }
    }

    /// Wrap an I/O error on a working-tree path.
    pub fn io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => VcsError::Vanished(path.to_string()),
            std::io::ErrorKind::PermissionDenied => VcsError::PermissionDenied(path.to_string()),
            _ => VcsError::Io {
                path: path.to_string(),
                source,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VcsError::RepoUnavailable(_) => ErrorKind::RepoUnavailable,
            VcsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VcsError::CorruptIndex(_) => ErrorKind::CorruptIndex,
            VcsError::Vanished(_) => ErrorKind::InconsistentRead,
            VcsError::Cancelled => ErrorKind::Cancelled,
            VcsError::Git { .. }
            | VcsError::Io { .. }
            | VcsError::CommandFailed { .. }
            | VcsError::Backend(_) => ErrorKind::Backend,
        }
    }
}

/// Errors from the repository state reader.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("Working tree kept changing across {attempts} read attempts")]
    InconsistentRead { attempts: u32 },
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::Vcs(e) => e.kind(),
            SnapshotError::InconsistentRead { .. } => ErrorKind::InconsistentRead,
        }
    }
}

/// Errors from change classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error(
        "Rules disagree on '{path}': pattern '{pattern}' labels it both '{first}' and '{second}'"
    )]
    Ambiguous {
        path: String,
        pattern: String,
        first: String,
        second: String,
    },
}

impl ClassifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifyError::Ambiguous { .. } => ErrorKind::ClassificationAmbiguous,
        }
    }
}

/// Errors from commit plan composition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Cluster '{0}' has no changes to commit")]
    EmptyCluster(String),

    #[error("Invalid parent reference '{0}'")]
    InvalidParentRef(String),
}

impl ComposeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ComposeError::EmptyCluster(_) => ErrorKind::EmptyCluster,
            ComposeError::InvalidParentRef(_) => ErrorKind::InvalidParentRef,
        }
    }
}

/// Errors from configuration and rule file loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read rules file {path}: {source}")]
    ReadRules {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed rules file {path}: {source}")]
    ParseRules {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Rule #{index} has an invalid glob '{glob}': {source}")]
    InvalidGlob {
        index: usize,
        glob: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Rule #{index} has an empty {field}")]
    EmptyField { index: usize, field: &'static str },

    #[error(
        "No commit author configured. Set AUTO_GIT_AUTHOR_NAME and AUTO_GIT_AUTHOR_EMAIL, \
         or git config user.name and user.email"
    )]
    MissingAuthor,

    #[error("Invalid AUTO_GIT_COMMIT_TIME '{value}': {source}")]
    InvalidCommitTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("git executable not found in PATH (required for --push)")]
    GitNotInstalled,
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigError
    }
}

/// Errors from the filesystem watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to resolve watch root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watch backend error: {0}")]
    Notify(#[from] notify::Error),
}

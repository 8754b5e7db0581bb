//! Normalized view of pending working-tree changes.

pub mod reader;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::vcs::HeadRef;

pub use reader::{MAX_READ_ATTEMPTS, SnapshotReader};

/// Kind of change recorded for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    /// One-letter status code, as printed by `git status --short`.
    pub fn code(&self) -> char {
        match self {
            ChangeKind::Added => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => 'D',
            ChangeKind::Renamed => 'R',
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Modified => write!(f, "Modified"),
            ChangeKind::Deleted => write!(f, "Deleted"),
            ChangeKind::Renamed => write!(f, "Renamed"),
        }
    }
}

/// SHA-256 digest of a file's working-tree content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    /// Stream `reader` through the hasher, returning the digest and byte count.
    pub fn from_reader<R: std::io::Read>(mut reader: R) -> std::io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut reader, &mut hasher)?;
        Ok((Self(hasher.finalize().into()), size))
    }

    /// Digest recorded for deleted paths.
    pub fn empty() -> Self {
        Self::of(&[])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A single changed path within one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    /// Previous path for renamed files (None for non-rename changes).
    pub old_path: Option<String>,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    /// Working-tree modification time; absent for deletions.
    pub modified_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    /// Build a record for content present in the working tree.
    pub fn present(
        path: impl Into<String>,
        kind: ChangeKind,
        content: &[u8],
        modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            old_path: None,
            content_hash: ContentHash::of(content),
            size_bytes: content.len() as u64,
            modified_at,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Deleted,
            old_path: None,
            content_hash: ContentHash::empty(),
            size_bytes: 0,
            modified_at: None,
        }
    }

    pub fn with_old_path(mut self, old_path: impl Into<String>) -> Self {
        self.old_path = Some(old_path.into());
        self
    }

    /// First path component, or `None` for files at the repository root.
    pub fn top_level_dir(&self) -> Option<&str> {
        self.path.split_once('/').map(|(dir, _)| dir)
    }

    /// File name without directories.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Point-in-time read of pending changes, owned by a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    sequence: u64,
    head: HeadRef,
    records: Vec<ChangeRecord>,
}

impl Snapshot {
    /// Records are kept sorted by path so downstream stages see a stable order.
    pub fn new(sequence: u64, head: HeadRef, mut records: Vec<ChangeRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|a, b| a.path == b.path);
        Self {
            sequence,
            head,
            records,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn head(&self) -> &HeadRef {
        &self.head
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

//! In-memory backend for exercising the pipeline without a real repository.
//!
//! Files live in two maps: the tree at head and the working tree. Pending
//! changes are the difference between them, with exact-content renames
//! detected the way git does for identical blobs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::VcsError;
use crate::snapshot::{ChangeKind, ChangeRecord};

use super::{CommitId, CommitMetadata, CommitOutcome, HeadRef, VcsRead, VcsWrite};

/// A commit created through the backend (by the engine or simulated externally).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub id: CommitId,
    pub parent: HeadRef,
    pub message: String,
    pub paths: BTreeSet<String>,
    pub author: Option<String>,
    pub external: bool,
}

#[derive(Debug, Clone)]
struct WorkingFile {
    content: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    head: Option<CommitId>,
    tree: BTreeMap<String, Vec<u8>>,
    working: BTreeMap<String, WorkingFile>,
    staged: BTreeSet<String>,
    commits: Vec<MemoryCommit>,
    external_before_commit: u32,
    failing_paths: BTreeSet<String>,
    failing_pushes: u32,
    pushes: Vec<String>,
    mutations: u64,
}

impl State {
    fn head_ref(&self) -> HeadRef {
        match &self.head {
            Some(id) => HeadRef::Commit(id.clone()),
            None => HeadRef::Unborn,
        }
    }

    fn next_id(&self, message: &str) -> CommitId {
        let mut hasher = Sha256::new();
        hasher.update(self.head.as_ref().map(|id| id.as_str()).unwrap_or(""));
        hasher.update(message.as_bytes());
        hasher.update(self.commits.len().to_le_bytes());
        let digest = hex::encode(hasher.finalize());
        CommitId::new(&digest[..40])
    }

    fn record_commit(
        &mut self,
        message: &str,
        paths: BTreeSet<String>,
        author: Option<String>,
        external: bool,
    ) -> CommitId {
        let id = self.next_id(message);
        self.commits.push(MemoryCommit {
            id: id.clone(),
            parent: self.head_ref(),
            message: message.to_string(),
            paths,
            author,
            external,
        });
        self.head = Some(id.clone());
        id
    }

    /// Another process commits a file of its own, advancing head.
    fn external_commit(&mut self) {
        let n = self.commits.iter().filter(|c| c.external).count() + 1;
        let path = format!(".external/commit-{n}");
        let content = format!("external {n}").into_bytes();
        self.tree.insert(path.clone(), content.clone());
        self.working.insert(
            path.clone(),
            WorkingFile {
                content,
                modified_at: default_mtime(),
            },
        );
        self.record_commit(
            &format!("external commit {n}"),
            BTreeSet::from([path]),
            None,
            true,
        );
    }
}

fn default_mtime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write a working-tree file with the default modification time.
    pub fn write_file(&self, path: &str, content: impl AsRef<[u8]>) {
        self.write_file_at(path, content, default_mtime());
    }

    pub fn write_file_at(&self, path: &str, content: impl AsRef<[u8]>, modified_at: DateTime<Utc>) {
        self.state().working.insert(
            path.to_string(),
            WorkingFile {
                content: content.as_ref().to_vec(),
                modified_at,
            },
        );
    }

    pub fn remove_file(&self, path: &str) {
        self.state().working.remove(path);
    }

    pub fn rename_file(&self, from: &str, to: &str) {
        let mut state = self.state();
        if let Some(file) = state.working.remove(from) {
            state.working.insert(to.to_string(), file);
        }
    }

    /// Commit the given files as pre-existing history, outside the engine.
    pub fn seed(&self, files: &[(&str, &str)]) -> CommitId {
        let mut state = self.state();
        let mut paths = BTreeSet::new();
        for (path, content) in files {
            state.tree.insert(path.to_string(), content.as_bytes().to_vec());
            state.working.insert(
                path.to_string(),
                WorkingFile {
                    content: content.as_bytes().to_vec(),
                    modified_at: default_mtime(),
                },
            );
            paths.insert(path.to_string());
        }
        state.record_commit("seed", paths, None, true)
    }

    /// Simulate a concurrent external commit right before each of the next
    /// `count` engine commit attempts.
    pub fn conflict_on_next_commits(&self, count: u32) {
        self.state().external_before_commit = count;
    }

    /// Make any commit that includes `path` fail with a backend error.
    pub fn fail_commits_touching(&self, path: &str) {
        self.state().failing_paths.insert(path.to_string());
    }

    /// Commits made by the engine, oldest first.
    pub fn commits(&self) -> Vec<MemoryCommit> {
        self.state()
            .commits
            .iter()
            .filter(|c| !c.external)
            .cloned()
            .collect()
    }

    /// Every commit including seeded and simulated external ones.
    pub fn history(&self) -> Vec<MemoryCommit> {
        self.state().commits.clone()
    }

    /// Reject the next `count` pushes with a command failure.
    pub fn fail_next_pushes(&self, count: u32) {
        self.state().failing_pushes = count;
    }

    /// Remotes pushed to successfully, in order.
    pub fn pushes(&self) -> Vec<String> {
        self.state().pushes.clone()
    }

    /// Number of `stage`, `commit` and `push` calls received.
    pub fn mutation_count(&self) -> u64 {
        self.state().mutations
    }
}

impl VcsRead for InMemoryBackend {
    fn head_ref(&self) -> Result<HeadRef, VcsError> {
        Ok(self.state().head_ref())
    }

    fn status_diff(&self, cancel: &CancellationToken) -> Result<Vec<ChangeRecord>, VcsError> {
        let state = self.state();

        let mut added = Vec::new();
        let mut records = Vec::new();
        for (path, file) in &state.working {
            if cancel.is_cancelled() {
                return Err(VcsError::Cancelled);
            }
            match state.tree.get(path) {
                Some(committed) if *committed == file.content => {}
                Some(_) => records.push(ChangeRecord::present(
                    path.as_str(),
                    ChangeKind::Modified,
                    &file.content,
                    Some(file.modified_at),
                )),
                None => added.push((path, file)),
            }
        }

        let mut claimed = BTreeSet::new();
        for (path, content) in &state.tree {
            if state.working.contains_key(path) {
                continue;
            }
            let renamed_to = added
                .iter()
                .find(|(new_path, file)| file.content == *content && !claimed.contains(*new_path));
            match renamed_to {
                Some((new_path, file)) => {
                    claimed.insert(new_path.to_string());
                    records.push(
                        ChangeRecord::present(
                            new_path.as_str(),
                            ChangeKind::Renamed,
                            &file.content,
                            Some(file.modified_at),
                        )
                        .with_old_path(path.as_str()),
                    );
                }
                None => records.push(ChangeRecord::deleted(path.as_str())),
            }
        }

        for (path, file) in added {
            if !claimed.contains(path) {
                records.push(ChangeRecord::present(
                    path.as_str(),
                    ChangeKind::Added,
                    &file.content,
                    Some(file.modified_at),
                ));
            }
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }
}

impl VcsWrite for InMemoryBackend {
    fn stage(&self, paths: &BTreeSet<String>) -> Result<(), VcsError> {
        let mut state = self.state();
        state.mutations += 1;
        state.staged = paths.clone();
        Ok(())
    }

    fn commit(
        &self,
        message: &str,
        metadata: &CommitMetadata,
        parent: &HeadRef,
    ) -> Result<CommitOutcome, VcsError> {
        let mut state = self.state();
        state.mutations += 1;

        if state.external_before_commit > 0 {
            state.external_before_commit -= 1;
            state.external_commit();
        }

        let head = state.head_ref();
        if head != *parent {
            return Ok(CommitOutcome::Conflicted { head });
        }

        if let Some(path) = state.staged.intersection(&state.failing_paths).next() {
            return Err(VcsError::Backend(format!("refusing to commit {}", path)));
        }

        let staged = std::mem::take(&mut state.staged);
        for path in &staged {
            let content = state.working.get(path).map(|f| f.content.clone());
            match content {
                Some(content) => {
                    state.tree.insert(path.clone(), content);
                }
                None => {
                    state.tree.remove(path);
                }
            }
        }

        let id = state.record_commit(message, staged, Some(metadata.author.to_string()), false);
        Ok(CommitOutcome::Committed(id))
    }

    fn push(&self, remote: &str) -> Result<(), VcsError> {
        let mut state = self.state();
        state.mutations += 1;
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(VcsError::CommandFailed {
                operation: "push".into(),
                stderr: format!("{}: remote rejected", remote),
            });
        }
        state.pushes.push(remote.to_string());
        Ok(())
    }
}

//! Production backend on git2, with `git push` shelled out to the system binary.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use git2::{
    Commit, Delta, DiffFindOptions, DiffOptions, ErrorCode, FileMode, Index, Oid, Repository,
    Signature, Tree,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::VcsError;
use crate::snapshot::{ChangeKind, ChangeRecord, ContentHash};

use super::{Author, CommitId, CommitMetadata, CommitOutcome, HeadRef, VcsRead, VcsWrite};

/// A git working tree opened through libgit2.
pub struct GitBackend {
    repo: Repository,
    workdir: PathBuf,
    /// Paths marked by the last `stage` call.
    staged: Mutex<BTreeSet<String>>,
}

impl GitBackend {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self, VcsError> {
        if !path.exists() {
            return Err(VcsError::RepoUnavailable(format!(
                "{}: no such directory",
                path.display()
            )));
        }

        let repo = Repository::discover(path).map_err(|e| match e.code() {
            ErrorCode::NotFound => {
                VcsError::RepoUnavailable(format!("{}: {}", path.display(), e.message()))
            }
            _ => VcsError::git("open repository", e),
        })?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                VcsError::RepoUnavailable(format!(
                    "{}: bare repositories are not supported",
                    path.display()
                ))
            })?
            .to_path_buf();

        Ok(Self {
            repo,
            workdir,
            staged: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `user.name` / `user.email` from the repository's git config, if both are set.
    pub fn configured_author(&self) -> Option<Author> {
        let config = self.repo.config().ok()?;
        let name = config.get_string("user.name").ok()?;
        let email = config.get_string("user.email").ok()?;
        Some(Author { name, email })
    }

    /// Short name of the checked-out branch.
    pub fn current_branch(&self) -> Result<String, VcsError> {
        let head = self
            .repo
            .head()
            .map_err(|e| VcsError::git("resolve HEAD", e))?;
        if !head.is_branch() {
            return Err(VcsError::Backend("HEAD is detached".into()));
        }
        head.shorthand()
            .map(String::from)
            .ok_or_else(|| VcsError::Backend("Branch name is not valid UTF-8".into()))
    }

    fn staged(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn head_tree(&self) -> Result<Option<Tree<'_>>, VcsError> {
        match self.repo.head() {
            Ok(head) => head
                .peel_to_tree()
                .map(Some)
                .map_err(|e| VcsError::git("resolve HEAD tree", e)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(VcsError::git("resolve HEAD", e)),
        }
    }

    fn find_commit(&self, id: &CommitId) -> Result<Commit<'_>, VcsError> {
        let oid = Oid::from_str(id.as_str()).map_err(|e| VcsError::git("parse commit id", e))?;
        self.repo
            .find_commit(oid)
            .map_err(|e| VcsError::git("find parent commit", e))
    }

    /// Parent tree with only the staged paths taken from the index.
    ///
    /// Anything else the user has staged stays out of the commit.
    fn build_tree(&self, parent: Option<&Commit<'_>>, paths: &BTreeSet<String>) -> Result<Tree<'_>, VcsError> {
        let mut repo_index = self
            .repo
            .index()
            .map_err(|e| VcsError::git("open index", e))?;
        repo_index
            .read(false)
            .map_err(|e| VcsError::git("read index", e))?;

        let mut tree_index = Index::new().map_err(|e| VcsError::git("create index", e))?;
        if let Some(commit) = parent {
            let tree = commit
                .tree()
                .map_err(|e| VcsError::git("read parent tree", e))?;
            tree_index
                .read_tree(&tree)
                .map_err(|e| VcsError::git("read parent tree", e))?;
        }

        for path in paths {
            let rel = Path::new(path);
            match repo_index.get_path(rel, 0) {
                Some(entry) => tree_index
                    .add(&entry)
                    .map_err(|e| VcsError::git("build commit tree", e))?,
                None => tree_index
                    .remove_path(rel)
                    .map_err(|e| VcsError::git("build commit tree", e))?,
            }
        }

        let tree_id = tree_index
            .write_tree_to(&self.repo)
            .map_err(|e| VcsError::git("write tree", e))?;
        self.repo
            .find_tree(tree_id)
            .map_err(|e| VcsError::git("write tree", e))
    }

    /// Hash and size a path present in the working tree.
    ///
    /// Symlinks are read, never followed: their content is the link target,
    /// which is what git stores as the blob.
    fn read_present(&self, path: &str, kind: ChangeKind) -> Result<Option<ChangeRecord>, VcsError> {
        let full = self.workdir.join(path);
        let metadata = std::fs::symlink_metadata(&full).map_err(|e| VcsError::io(path, e))?;
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

        let (content_hash, size_bytes) = if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&full).map_err(|e| VcsError::io(path, e))?;
            let bytes = link_target_bytes(&target);
            (ContentHash::of(&bytes), bytes.len() as u64)
        } else if metadata.is_dir() {
            // An untracked nested repository; git itself never stages it.
            debug!("Skipping nested repository at {}", path);
            return Ok(None);
        } else {
            let file = File::open(&full).map_err(|e| VcsError::io(path, e))?;
            ContentHash::from_reader(file).map_err(|e| VcsError::io(path, e))?
        };

        Ok(Some(ChangeRecord {
            path: path.to_string(),
            kind,
            old_path: None,
            content_hash,
            size_bytes,
            modified_at,
        }))
    }
}

impl VcsRead for GitBackend {
    fn head_ref(&self) -> Result<HeadRef, VcsError> {
        match self.repo.head() {
            Ok(head) => {
                let commit = head
                    .peel_to_commit()
                    .map_err(|e| VcsError::git("resolve HEAD", e))?;
                Ok(HeadRef::Commit(commit.id().into()))
            }
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(HeadRef::Unborn)
            }
            Err(e) => Err(VcsError::git("resolve HEAD", e)),
        }
    }

    fn status_diff(&self, cancel: &CancellationToken) -> Result<Vec<ChangeRecord>, VcsError> {
        let head_tree = self.head_tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let mut diff = self
            .repo
            .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
            .map_err(|e| VcsError::git("collect diff", e))?;

        let mut find = DiffFindOptions::new();
        find.renames(true).for_untracked(true);
        diff.find_similar(Some(&mut find))
            .map_err(|e| VcsError::git("detect renames", e))?;

        let mut records = Vec::new();
        for delta in diff.deltas() {
            if cancel.is_cancelled() {
                return Err(VcsError::Cancelled);
            }

            let kind = match delta.status() {
                Delta::Added | Delta::Untracked | Delta::Copied => ChangeKind::Added,
                Delta::Modified | Delta::Typechange | Delta::Conflicted => ChangeKind::Modified,
                Delta::Deleted => ChangeKind::Deleted,
                Delta::Renamed => ChangeKind::Renamed,
                Delta::Unreadable => {
                    let path = delta
                        .new_file()
                        .path()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    return Err(VcsError::PermissionDenied(path));
                }
                Delta::Unmodified | Delta::Ignored => continue,
            };

            // Submodule pointers move with their own repository.
            if delta.new_file().mode() == FileMode::Commit
                || delta.old_file().mode() == FileMode::Commit
            {
                debug!("Skipping submodule change");
                continue;
            }

            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());

            let record = match kind {
                ChangeKind::Deleted => old_path.or(new_path).map(ChangeRecord::deleted),
                ChangeKind::Renamed => {
                    let Some(path) = new_path else { continue };
                    self.read_present(&path, kind)?.map(|record| match old_path {
                        Some(old) => record.with_old_path(old),
                        None => record,
                    })
                }
                _ => match new_path.or(old_path) {
                    Some(path) => self.read_present(&path, kind)?,
                    None => None,
                },
            };

            if let Some(record) = record {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }
}

impl VcsWrite for GitBackend {
    fn stage(&self, paths: &BTreeSet<String>) -> Result<(), VcsError> {
        let mut index = self
            .repo
            .index()
            .map_err(|e| VcsError::git("open index", e))?;
        index
            .read(false)
            .map_err(|e| VcsError::git("read index", e))?;

        for path in paths {
            let rel = Path::new(path);
            let result = if self.workdir.join(rel).symlink_metadata().is_ok() {
                index.add_path(rel)
            } else {
                index.remove_path(rel)
            };
            result.map_err(|e| VcsError::git("stage path", e))?;
        }

        index.write().map_err(|e| VcsError::git("write index", e))?;
        *self.staged() = paths.clone();
        debug!("Staged {} paths", paths.len());
        Ok(())
    }

    fn commit(
        &self,
        message: &str,
        metadata: &CommitMetadata,
        parent: &HeadRef,
    ) -> Result<CommitOutcome, VcsError> {
        let head = self.head_ref()?;
        if head != *parent {
            return Ok(CommitOutcome::Conflicted { head });
        }

        let parent_commit = parent.commit().map(|id| self.find_commit(id)).transpose()?;
        let paths = self.staged().clone();
        let tree = self.build_tree(parent_commit.as_ref(), &paths)?;

        let time = git2::Time::new(metadata.timestamp.timestamp(), 0);
        let sig = Signature::new(&metadata.author.name, &metadata.author.email, &time)
            .map_err(|e| VcsError::git("build signature", e))?;

        let parents: Vec<&Commit<'_>> = parent_commit.iter().collect();
        match self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        {
            Ok(oid) => {
                self.staged().clear();
                Ok(CommitOutcome::Committed(oid.into()))
            }
            // HEAD moved between our check and the ref update.
            Err(e) if e.code() == ErrorCode::Modified => Ok(CommitOutcome::Conflicted {
                head: self.head_ref()?,
            }),
            Err(e) => Err(VcsError::git("create commit", e)),
        }
    }

    fn push(&self, remote: &str) -> Result<(), VcsError> {
        let branch = self.current_branch()?;
        run_git(&self.workdir, &["push", remote, &branch], "push")
    }
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}

/// Run a git command in `workdir` and return success or a descriptive error.
fn run_git(workdir: &Path, args: &[&str], operation: &str) -> Result<(), VcsError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .map_err(|e| VcsError::CommandFailed {
            operation: operation.to_string(),
            stderr: format!("could not run git: {}", e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VcsError::CommandFailed {
            operation: operation.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(())
}

//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use git2::{Oid, Repository, Signature};

use auto_git::config::PipelineConfig;
use auto_git::vcs::Author;
use auto_git::{GitBackend, Pipeline, RuleSet};

/// Get the path to test fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Get the path to a rule file fixture.
pub fn rules_fixture(name: &str) -> PathBuf {
    fixtures_dir().join("rules").join(name)
}

pub fn test_author() -> Author {
    Author {
        name: "Test User".into(),
        email: "test@example.com".into(),
    }
}

/// Pipeline settings with a fixed author and commit time.
pub fn pipeline_config(rules: RuleSet) -> PipelineConfig {
    let mut config = PipelineConfig::new(test_author());
    config.rules = rules;
    config.commit_time = Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    config
}

/// A test git repository builder for integration tests.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    pub repo: Repository,
}

impl TestRepo {
    /// Create a new empty git repository in a temp directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(dir.path()).expect("Failed to init git repo");
        {
            let mut config = repo.config().expect("Failed to open repo config");
            config
                .set_str("user.name", "Test User")
                .expect("Failed to set user.name");
            config
                .set_str("user.email", "test@example.com")
                .expect("Failed to set user.email");
        }
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a working-tree file, creating parent directories.
    pub fn write(&self, path: &str, content: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::write(&full, content).expect("Failed to write file");
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.dir.path().join(path)).expect("Failed to remove file");
    }

    pub fn rename(&self, from: &str, to: &str) {
        let dir = self.dir.path();
        if let Some(parent) = dir.join(to).parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::rename(dir.join(from), dir.join(to)).expect("Failed to rename file");
    }

    #[cfg(unix)]
    pub fn symlink(&self, target: &str, link: &str) {
        std::os::unix::fs::symlink(target, self.dir.path().join(link))
            .expect("Failed to create symlink");
    }

    /// Commit one root-level file the way another git client would: the
    /// commit is built from HEAD's tree, leaving other staged entries alone.
    pub fn commit_concurrently(&self, path: &str, content: &str, message: &str) -> Oid {
        self.write(path, content);
        let mut index = self.repo.index().expect("Failed to get index");
        index.read(true).expect("Failed to reload index");
        index.add_path(Path::new(path)).expect("Failed to add file");
        index.write().expect("Failed to write index");

        let blob = self.repo.blob(content.as_bytes()).expect("Failed to write blob");
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .expect("No HEAD commit");
        let head_tree = head.tree().expect("Failed to read tree");
        let mut builder = self
            .repo
            .treebuilder(Some(&head_tree))
            .expect("Failed to create tree builder");
        builder
            .insert(path, blob, 0o100644)
            .expect("Failed to insert entry");
        let tree_id = builder.write().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");

        let sig = self.signature();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head])
            .expect("Failed to create commit")
    }

    /// Get the test signature for commits.
    fn signature(&self) -> Signature<'_> {
        Signature::now("Test User", "test@example.com").expect("Failed to create signature")
    }

    /// Write `files` and commit them directly, outside auto-git. Returns the commit OID.
    pub fn commit_files(&self, files: &[(&str, &str)], message: &str) -> Oid {
        let mut index = self.repo.index().expect("Failed to get index");
        for (path, content) in files {
            self.write(path, content);
            index.add_path(Path::new(path)).expect("Failed to add file");
        }
        index.write().expect("Failed to write index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");

        let sig = self.signature();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("Failed to create commit")
    }

    pub fn head_oid(&self) -> Option<Oid> {
        self.repo.head().ok().and_then(|h| h.target())
    }

    /// Commit messages from HEAD back to the root, newest first.
    pub fn log(&self) -> Vec<String> {
        let Some(head) = self.head_oid() else {
            return Vec::new();
        };
        let mut walk = self.repo.revwalk().expect("Failed to create revwalk");
        walk.push(head).expect("Failed to push HEAD");
        walk.map(|oid| {
            let commit = self
                .repo
                .find_commit(oid.expect("Failed to walk"))
                .expect("Failed to find commit");
            commit.message().unwrap_or("").to_string()
        })
        .collect()
    }

    /// Paths changed by the commit at HEAD relative to its parent.
    pub fn head_paths(&self) -> Vec<String> {
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .expect("No HEAD commit");
        let tree = head.tree().expect("Failed to read tree");
        let parent_tree = head.parent(0).ok().map(|p| p.tree().expect("Failed to read tree"));
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .expect("Failed to diff");
        diff.deltas()
            .filter_map(|d| {
                d.new_file()
                    .path()
                    .or_else(|| d.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect()
    }

    pub fn backend(&self) -> GitBackend {
        GitBackend::open(self.path()).expect("Failed to open backend")
    }

    pub fn pipeline(&self, rules: RuleSet) -> Pipeline<GitBackend> {
        Pipeline::new(self.backend(), pipeline_config(rules))
    }
}

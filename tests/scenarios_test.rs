//! End-to-end cycles: snapshot, classify, compose and apply against real and
//! in-memory repositories.

mod common;

use common::{TestRepo, pipeline_config, rules_fixture};

use std::cell::Cell;
use std::collections::BTreeSet;

use auto_git::report::{self, EXIT_FAILURES, EXIT_OK};
use auto_git::vcs::{CommitMetadata, CommitOutcome, HeadRef};
use auto_git::{
    ChangeRecord, CycleReport, ErrorKind, GitBackend, InMemoryBackend, Pipeline, RuleSet, RunMode,
    SkipReason, VcsError, VcsRead, VcsWrite,
};
use git2::Status;
use tokio_util::sync::CancellationToken;

fn run(pipeline: &mut Pipeline<impl VcsWrite>, mode: RunMode) -> CycleReport {
    pipeline.run(mode, &CancellationToken::new())
}

#[test]
fn test_directory_clusters_commit_in_order() {
    let repo = TestRepo::new();
    repo.commit_files(
        &[("src/a.rs", "a"), ("src/b.rs", "b"), ("src/c.rs", "c")],
        "initial",
    );
    repo.write("src/a.rs", "a2");
    repo.write("src/b.rs", "b2");
    repo.write("src/c.rs", "c2");
    repo.write("docs/guide.md", "# Guide");

    let mut pipeline = repo.pipeline(RuleSet::empty());
    let report = run(&mut pipeline, RunMode::Apply);

    assert!(report.result.is_success(), "{:?}", report.result.failures);
    let labels: Vec<&str> = report.plans.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["src", "docs"]);
    assert_eq!(report.result.applied.len(), 2);
    assert_eq!(report::exit_code(&report), EXIT_OK);

    let log = repo.log();
    assert_eq!(log.len(), 3);
    assert!(log[1].starts_with("chore(src): update 3 files"));
    assert!(log[0].starts_with("docs(docs): add guide.md"));
    assert!(log[0].contains("A docs/guide.md"));
    assert_eq!(repo.head_paths(), vec!["docs/guide.md".to_string()]);
}

#[test]
fn test_concurrent_commit_is_rebased_once() {
    let backend = InMemoryBackend::new();
    backend.seed(&[("src/lib.rs", "v1")]);
    backend.write_file("src/lib.rs", "v2");
    backend.conflict_on_next_commits(1);

    let mut pipeline = Pipeline::new(backend, pipeline_config(RuleSet::empty()));
    let report = run(&mut pipeline, RunMode::Apply);

    assert!(report.result.failures.is_empty());
    assert_eq!(report.result.applied.len(), 1);

    let history = pipeline.backend().history();
    let external = history
        .iter()
        .find(|c| c.external && c.message.starts_with("external"))
        .expect("external commit recorded");
    let ours = &pipeline.backend().commits()[0];
    assert_eq!(ours.parent, HeadRef::Commit(external.id.clone()));
}

#[test]
fn test_second_conflict_abandons_plan() {
    let backend = InMemoryBackend::new();
    backend.write_file("src/lib.rs", "v1");
    backend.conflict_on_next_commits(2);

    let mut pipeline = Pipeline::new(backend, pipeline_config(RuleSet::empty()));
    let report = run(&mut pipeline, RunMode::Apply);

    assert_eq!(report.result.failures.len(), 1);
    assert_eq!(report.result.failures[0].kind, ErrorKind::Abandoned);
    assert!(pipeline.backend().commits().is_empty());
    assert_eq!(report::exit_code(&report), EXIT_FAILURES);

    // The next cycle picks the change up again.
    let report = run(&mut pipeline, RunMode::Apply);
    assert!(report.result.is_success());
    assert_eq!(pipeline.backend().commits().len(), 1);
}

#[test]
fn test_contradictory_rules_commit_nothing() {
    let repo = TestRepo::new();
    repo.write("a.txt", "a");
    repo.write("b.txt", "b");

    let rules = RuleSet::load(&rules_fixture("ambiguous.toml")).unwrap();
    let mut pipeline = repo.pipeline(rules);
    let report = run(&mut pipeline, RunMode::Apply);

    assert_eq!(report.result.failures.len(), 1);
    assert_eq!(
        report.result.failures[0].kind,
        ErrorKind::ClassificationAmbiguous
    );
    assert!(report.result.applied.is_empty());
    assert_eq!(report::exit_code(&report), EXIT_FAILURES);
    assert!(repo.head_oid().is_none());
}

#[test]
fn test_dry_run_prints_one_plan_and_mutates_nothing() {
    let backend = InMemoryBackend::new();
    backend.write_file("notes.txt", "hello");

    let mut pipeline = Pipeline::new(backend, pipeline_config(RuleSet::empty()));
    let report = run(&mut pipeline, RunMode::DryRun);

    assert_eq!(report.drafts.len(), 1);
    assert_eq!(pipeline.backend().mutation_count(), 0);
    assert_eq!(report.result.skipped["notes.txt"], SkipReason::DryRun);
    assert_eq!(report::exit_code(&report), EXIT_OK);
}

#[test]
fn test_dry_run_leaves_git_index_alone() {
    let repo = TestRepo::new();
    repo.commit_files(&[("README.md", "v1")], "initial");
    let before = repo.head_oid();
    repo.write("README.md", "v2");

    let mut pipeline = repo.pipeline(RuleSet::empty());
    let report = run(&mut pipeline, RunMode::DryRun);

    assert_eq!(report.drafts.len(), 1);
    assert_eq!(repo.head_oid(), before);
    let status = repo.repo.status_file(std::path::Path::new("README.md")).unwrap();
    assert_eq!(status, Status::WT_MODIFIED);
}

#[test]
fn test_rename_and_delete_committed_cleanly() {
    let repo = TestRepo::new();
    repo.commit_files(
        &[("src/old.rs", "fn moved() {}\n"), ("src/gone.rs", "x")],
        "initial",
    );
    repo.rename("src/old.rs", "src/new.rs");
    repo.remove("src/gone.rs");

    let mut pipeline = repo.pipeline(RuleSet::empty());
    let report = run(&mut pipeline, RunMode::Apply);
    assert!(report.result.is_success(), "{:?}", report.result.failures);

    let message = &repo.log()[0];
    assert!(message.starts_with("chore(src): update 2 files"));
    assert!(message.contains("R src/old.rs -> src/new.rs"));
    assert!(message.contains("D src/gone.rs"));

    let statuses = repo.repo.statuses(None).unwrap();
    assert_eq!(statuses.len(), 0, "working tree should be clean");

    let again = run(&mut pipeline, RunMode::Apply);
    assert!(again.is_noop());
}

#[test]
fn test_rules_group_across_directories() {
    let repo = TestRepo::new();
    repo.write("Cargo.toml", "[package]");
    repo.write("src/cli/args.rs", "args");
    repo.write("src/lib.rs", "lib");
    repo.write("docs/intro.md", "intro");

    let rules = RuleSet::load(&rules_fixture("project.toml")).unwrap();
    let mut pipeline = repo.pipeline(rules);
    let report = run(&mut pipeline, RunMode::Apply);

    let labels: Vec<&str> = report.plans.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["build", "docs", "cli", "src"]);
    assert_eq!(report.result.applied.len(), 4);
    assert_eq!(repo.log().len(), 4);
}

/// Git backend that lets another client commit right before the engine does.
struct RacingBackend<'a> {
    inner: GitBackend,
    repo: &'a TestRepo,
    races: Cell<u32>,
}

impl<'a> RacingBackend<'a> {
    fn new(repo: &'a TestRepo, races: u32) -> Self {
        Self {
            inner: repo.backend(),
            repo,
            races: Cell::new(races),
        }
    }
}

impl VcsRead for RacingBackend<'_> {
    fn head_ref(&self) -> Result<HeadRef, VcsError> {
        self.inner.head_ref()
    }

    fn status_diff(&self, cancel: &CancellationToken) -> Result<Vec<ChangeRecord>, VcsError> {
        self.inner.status_diff(cancel)
    }
}

impl VcsWrite for RacingBackend<'_> {
    fn stage(&self, paths: &BTreeSet<String>) -> Result<(), VcsError> {
        self.inner.stage(paths)
    }

    fn commit(
        &self,
        message: &str,
        metadata: &CommitMetadata,
        parent: &HeadRef,
    ) -> Result<CommitOutcome, VcsError> {
        let left = self.races.get();
        if left > 0 {
            self.races.set(left - 1);
            let name = format!("external-{}.txt", left);
            self.repo.commit_concurrently(&name, "theirs", "external");
        }
        self.inner.commit(message, metadata, parent)
    }

    fn push(&self, remote: &str) -> Result<(), VcsError> {
        self.inner.push(remote)
    }
}

#[test]
fn test_concurrent_git_commit_is_rebased_once() {
    let repo = TestRepo::new();
    repo.commit_files(&[("src/lib.rs", "v1")], "initial");
    repo.write("src/lib.rs", "v2");

    let mut pipeline = Pipeline::new(
        RacingBackend::new(&repo, 1),
        pipeline_config(RuleSet::empty()),
    );
    let report = run(&mut pipeline, RunMode::Apply);

    assert!(report.result.failures.is_empty(), "{:?}", report.result.failures);
    assert_eq!(report.result.applied.len(), 1);

    let log = repo.log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1], "external");
    assert!(log[0].starts_with("chore(src): update lib.rs"));

    let head = repo.repo.head().unwrap().peel_to_commit().unwrap();
    let external = head.parent(0).unwrap();
    assert_eq!(external.message(), Some("external"));
    let tree = head.tree().unwrap();
    assert!(tree.get_name("external-1.txt").is_some());
    assert_eq!(repo.head_paths(), vec!["src/lib.rs".to_string()]);

    let again = run(&mut pipeline, RunMode::Apply);
    assert!(again.is_noop(), "{:?}", again.plans);
}

#[test]
fn test_repeated_git_races_abandon_plan() {
    let repo = TestRepo::new();
    repo.commit_files(&[("src/lib.rs", "v1")], "initial");
    repo.write("src/lib.rs", "v2");

    let mut pipeline = Pipeline::new(
        RacingBackend::new(&repo, 2),
        pipeline_config(RuleSet::empty()),
    );
    let report = run(&mut pipeline, RunMode::Apply);

    assert_eq!(report.result.failures.len(), 1);
    assert_eq!(report.result.failures[0].kind, ErrorKind::Abandoned);
    assert!(report.result.applied.is_empty());
    assert_eq!(repo.log(), vec!["external", "external", "initial"]);
}

#[cfg(unix)]
#[test]
fn test_dangling_symlink_is_committed_as_link() {
    let repo = TestRepo::new();
    repo.write("src/a.rs", "a");
    repo.symlink("does-not-exist", "link");

    let mut pipeline = repo.pipeline(RuleSet::empty());
    let report = run(&mut pipeline, RunMode::Apply);

    assert!(report.result.is_success(), "{:?}", report.result.failures);
    assert_eq!(report.result.applied.len(), 2);
    assert_eq!(repo.repo.statuses(None).unwrap().len(), 0);
    assert!(run(&mut pipeline, RunMode::Apply).is_noop());
}

#[cfg(unix)]
#[test]
fn test_directory_symlink_is_not_left_pending() {
    let repo = TestRepo::new();
    repo.write("src/a.rs", "a");
    repo.symlink("src", "srclink");

    let mut pipeline = repo.pipeline(RuleSet::empty());
    let report = run(&mut pipeline, RunMode::Apply);

    assert!(report.result.is_success(), "{:?}", report.result.failures);
    let committed: usize = report.plans.iter().map(|p| p.paths.len()).sum();
    assert_eq!(committed, 2);
    assert_eq!(repo.repo.statuses(None).unwrap().len(), 0);
    assert!(run(&mut pipeline, RunMode::Apply).is_noop());
}

//! Deterministic commit message text for a cluster.

use std::path::Path;

use crate::classify::Cluster;
use crate::snapshot::{ChangeKind, ChangeRecord};

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "adoc", "txt"];
const DOC_DIRS: &[&str] = &["docs", "doc"];
const TEST_DIRS: &[&str] = &["tests", "test", "__tests__", "spec"];

/// A generated commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub subject: String,
    pub body: Vec<String>,
}

impl CommitMessage {
    /// Format the commit message for git.
    ///
    /// Produces:
    /// ```text
    /// type(scope): verb object
    ///
    /// M src/lib.rs
    /// R src/old.rs -> src/new.rs
    /// ```
    pub fn format(&self) -> String {
        if self.body.is_empty() {
            return self.subject.clone();
        }
        format!("{}\n\n{}", self.subject, self.body.join("\n"))
    }
}

/// Build the message for `cluster`. Depends only on its label and records.
pub fn describe(cluster: &Cluster) -> CommitMessage {
    let records = cluster.records();
    let (scope, part) = split_part_suffix(cluster.label());

    let mut subject = format!(
        "{}({}): {} {}",
        commit_type(records),
        scope,
        verb(records),
        object(records)
    );
    if let Some(part) = part {
        subject.push_str(&format!(" {}", part));
    }

    CommitMessage {
        subject,
        body: records.iter().map(body_line).collect(),
    }
}

/// Separate a force-split suffix like `" (2/3)"` from the label.
fn split_part_suffix(label: &str) -> (&str, Option<&str>) {
    if label.ends_with(')')
        && let Some(start) = label.rfind(" (")
    {
        let inner = &label[start + 2..label.len() - 1];
        let is_part = inner
            .split_once('/')
            .is_some_and(|(i, n)| is_number(i) && is_number(n));
        if is_part {
            return (&label[..start], Some(&label[start + 1..]));
        }
    }
    (label, None)
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn commit_type(records: &[ChangeRecord]) -> &'static str {
    if records.iter().all(|r| is_documentation(&r.path)) {
        "docs"
    } else if records.iter().all(|r| is_test(&r.path)) {
        "test"
    } else if records.iter().all(|r| r.kind == ChangeKind::Added) {
        "feat"
    } else {
        "chore"
    }
}

fn verb(records: &[ChangeRecord]) -> &'static str {
    let first = records.first().map(|r| r.kind);
    let uniform = records.iter().all(|r| Some(r.kind) == first);
    match first {
        Some(ChangeKind::Added) if uniform => "add",
        Some(ChangeKind::Deleted) if uniform => "remove",
        Some(ChangeKind::Renamed) if uniform => "rename",
        _ => "update",
    }
}

fn object(records: &[ChangeRecord]) -> String {
    match records {
        [single] => single.file_name().to_string(),
        _ => format!("{} files", records.len()),
    }
}

fn body_line(record: &ChangeRecord) -> String {
    match (&record.kind, &record.old_path) {
        (ChangeKind::Renamed, Some(old)) => format!("R {} -> {}", old, record.path),
        (kind, _) => format!("{} {}", kind.code(), record.path),
    }
}

pub(crate) fn is_documentation(path: &str) -> bool {
    let p = Path::new(path);
    let in_doc_dir = p
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| DOC_DIRS.contains(&first) && path.contains('/'));
    let doc_ext = p
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    in_doc_dir || doc_ext
}

pub(crate) fn is_test(path: &str) -> bool {
    let p = Path::new(path);
    let in_test_dir = p
        .parent()
        .into_iter()
        .flat_map(|parent| parent.components())
        .filter_map(|c| c.as_os_str().to_str())
        .any(|dir| TEST_DIRS.contains(&dir));
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    in_test_dir
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
}

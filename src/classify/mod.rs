//! Partitioning a snapshot into commit-sized clusters.
//!
//! User rules claim records first; whatever is left is grouped by top-level
//! directory and modification-time skew. Both paths are capped by file count
//! and total size, so a large burst of changes never becomes one giant commit.

pub mod heuristic;
pub mod rules;

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::ClassifyError;
use crate::snapshot::{ChangeRecord, Snapshot};

pub use rules::{Rule, RuleSet};

pub const DEFAULT_SKEW_THRESHOLD: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_FILES: usize = 25;
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

const RULE_CONFIDENCE: f32 = 1.0;

/// Thresholds for heuristic grouping and force-splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Largest modification-time gap between neighbours in one cluster.
    pub skew_threshold: Duration,
    pub max_files: usize,
    pub max_bytes: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            skew_threshold: DEFAULT_SKEW_THRESHOLD,
            max_files: DEFAULT_MAX_FILES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Records believed to belong to one commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    label: String,
    confidence: f32,
    records: Vec<ChangeRecord>,
}

impl Cluster {
    pub fn new(label: impl Into<String>, confidence: f32, records: Vec<ChangeRecord>) -> Self {
        Self {
            label: label.into(),
            confidence,
            records,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
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

    pub fn size_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }
}

pub struct Classifier {
    rules: RuleSet,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(rules: RuleSet, config: ClassifierConfig) -> Self {
        Self { rules, config }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Partition the snapshot's records into ordered clusters.
    ///
    /// Rule clusters come first, in the order their labels first appear in
    /// the rule list, followed by heuristic clusters.
    pub fn classify(&self, snapshot: &Snapshot) -> Result<Vec<Cluster>, ClassifyError> {
        let mut labels: Vec<&str> = Vec::new();
        for rule in self.rules.rules() {
            if !labels.contains(&rule.label()) {
                labels.push(rule.label());
            }
        }

        let mut buckets: Vec<Vec<ChangeRecord>> = vec![Vec::new(); labels.len()];
        let mut leftover = Vec::new();

        for record in snapshot.records() {
            match self.rules.resolve(&record.path)? {
                Some(rule) => {
                    let slot = labels
                        .iter()
                        .position(|l| *l == rule.label())
                        .unwrap_or_default();
                    buckets[slot].push(record.clone());
                }
                None => leftover.push(record.clone()),
            }
        }

        let mut clusters = Vec::new();
        for (label, records) in labels.iter().zip(buckets) {
            if records.is_empty() {
                continue;
            }
            let parts = heuristic::cap_size(records, self.config.max_files, self.config.max_bytes);
            clusters.extend(heuristic::label_parts(label, RULE_CONFIDENCE, parts));
        }
        clusters.extend(heuristic::group_by_directory(leftover, &self.config));

        debug!(
            "Classified {} records into {} clusters",
            snapshot.len(),
            clusters.len()
        );
        debug_assert!(validate_partition(snapshot, &clusters).is_none());

        Ok(clusters)
    }
}

/// Check that clusters partition the snapshot exactly.
///
/// Checks:
/// - No empty clusters
/// - No duplicate paths (paths appearing in multiple clusters)
/// - No unknown paths (paths in clusters but not in the snapshot)
/// - No orphaned paths (paths in the snapshot but not in any cluster)
///
/// Returns an error message if validation fails, or `None` if valid.
pub fn validate_partition(snapshot: &Snapshot, clusters: &[Cluster]) -> Option<String> {
    let expected: HashSet<&str> = snapshot.records().iter().map(|r| r.path.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for cluster in clusters {
        if cluster.is_empty() {
            return Some(format!("Empty cluster: {}", cluster.label()));
        }
        for record in cluster.records() {
            if !expected.contains(record.path.as_str()) {
                return Some(format!(
                    "Unknown path in cluster '{}': {}",
                    cluster.label(),
                    record.path
                ));
            }
            if !seen.insert(record.path.as_str()) {
                return Some(format!("Duplicate path across clusters: {}", record.path));
            }
        }
    }

    for path in expected {
        if !seen.contains(path) {
            return Some(format!("Path not assigned to any cluster: {}", path));
        }
    }

    None
}

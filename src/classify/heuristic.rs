//! Directory/time grouping for records no rule claims, and size capping.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::snapshot::ChangeRecord;

use super::{Cluster, ClassifierConfig};

/// Label for files directly at the repository root.
pub const ROOT_LABEL: &str = "root";

pub(crate) const DIRECTORY_CONFIDENCE: f32 = 0.8;
pub(crate) const ROOT_CONFIDENCE: f32 = 0.6;

/// Group leftover records by top-level directory and modification-time skew.
///
/// Groups are ordered largest first, ties broken by label, and a group's
/// parts stay adjacent.
pub(crate) fn group_by_directory(records: Vec<ChangeRecord>, config: &ClassifierConfig) -> Vec<Cluster> {
    // Root-level files are keyed by "" so a directory named "root" stays separate.
    let mut groups: BTreeMap<String, Vec<ChangeRecord>> = BTreeMap::new();
    for record in records {
        let key = record.top_level_dir().unwrap_or("").to_string();
        groups.entry(key).or_default().push(record);
    }

    let mut groups: Vec<(String, Vec<ChangeRecord>)> = groups.into_iter().collect();
    groups.sort_by(|(a_key, a), (b_key, b)| {
        b.len()
            .cmp(&a.len())
            .then_with(|| display_label(a_key).cmp(display_label(b_key)))
            .then_with(|| a_key.cmp(b_key))
    });

    let mut clusters = Vec::new();
    for (key, records) in groups {
        let confidence = if key.is_empty() {
            ROOT_CONFIDENCE
        } else {
            DIRECTORY_CONFIDENCE
        };
        let parts: Vec<Vec<ChangeRecord>> = split_by_skew(records, config.skew_threshold)
            .into_iter()
            .flat_map(|window| cap_size(window, config.max_files, config.max_bytes))
            .collect();
        clusters.extend(label_parts(display_label(&key), confidence, parts));
    }
    clusters
}

fn display_label(key: &str) -> &str {
    if key.is_empty() { ROOT_LABEL } else { key }
}

/// Split records into windows whose consecutive modification times are no
/// further apart than `threshold`.
///
/// Records without a modification time (deletions) join the earliest window.
/// Windows are ordered by time and each is returned in path order.
pub(crate) fn split_by_skew(records: Vec<ChangeRecord>, threshold: Duration) -> Vec<Vec<ChangeRecord>> {
    let (mut timed, untimed): (Vec<ChangeRecord>, Vec<ChangeRecord>) =
        records.into_iter().partition(|r| r.modified_at.is_some());
    timed.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.path.cmp(&b.path)));

    let mut windows: Vec<Vec<ChangeRecord>> = Vec::new();
    let mut last_time: Option<DateTime<Utc>> = None;
    for record in timed {
        let time = record.modified_at;
        let starts_window = match (last_time, time) {
            (Some(prev), Some(now)) => (now - prev)
                .to_std()
                .map(|gap| gap > threshold)
                .unwrap_or(false),
            _ => true,
        };
        if starts_window {
            windows.push(Vec::new());
        }
        if let Some(window) = windows.last_mut() {
            window.push(record);
        }
        last_time = time;
    }

    if !untimed.is_empty() {
        match windows.first_mut() {
            Some(first) => first.extend(untimed),
            None => windows.push(untimed),
        }
    }

    for window in &mut windows {
        window.sort_by(|a, b| a.path.cmp(&b.path));
    }
    windows
}

/// Chunk records (in order) so no chunk exceeds `max_files` records or
/// `max_bytes` total size. A single oversized record gets a chunk of its own.
pub(crate) fn cap_size(records: Vec<ChangeRecord>, max_files: usize, max_bytes: u64) -> Vec<Vec<ChangeRecord>> {
    let max_files = max_files.max(1);
    let mut chunks: Vec<Vec<ChangeRecord>> = Vec::new();
    let mut current: Vec<ChangeRecord> = Vec::new();
    let mut current_bytes = 0u64;

    for record in records {
        let over_bytes = current_bytes.saturating_add(record.size_bytes) > max_bytes;
        if !current.is_empty() && (current.len() >= max_files || over_bytes) {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(record.size_bytes);
        current.push(record);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Turn parts of one group into clusters, numbering them when there is more than one.
pub(crate) fn label_parts(label: &str, confidence: f32, parts: Vec<Vec<ChangeRecord>>) -> Vec<Cluster> {
    let total = parts.len();
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .enumerate()
        .map(|(i, records)| {
            if total == 1 {
                Cluster::new(label, confidence, records)
            } else {
                Cluster::new(format!("{} ({}/{})", label, i + 1, total), confidence / 2.0, records)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChangeKind;
    use chrono::TimeZone;

    fn at(path: &str, minute: u32, size: usize) -> ChangeRecord {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap();
        ChangeRecord::present(path, ChangeKind::Modified, &vec![b'x'; size], Some(time))
    }

    fn paths(records: &[ChangeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_split_by_skew_groups_close_times() {
        let windows = split_by_skew(
            vec![at("src/a.rs", 0, 1), at("src/b.rs", 2, 1), at("src/c.rs", 30, 1)],
            Duration::from_secs(5 * 60),
        );
        assert_eq!(windows.len(), 2);
        assert_eq!(paths(&windows[0]), vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(paths(&windows[1]), vec!["src/c.rs"]);
    }

    #[test]
    fn test_split_by_skew_chains_gaps() {
        // Each step is under the threshold even though the ends are far apart.
        let windows = split_by_skew(
            vec![at("a", 0, 1), at("b", 4, 1), at("c", 8, 1), at("d", 12, 1)],
            Duration::from_secs(5 * 60),
        );
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_gap_equal_to_threshold_stays_in_window() {
        let windows = split_by_skew(
            vec![at("a", 0, 1), at("b", 5, 1), at("c", 11, 1)],
            Duration::from_secs(5 * 60),
        );
        assert_eq!(windows.len(), 2);
        assert_eq!(paths(&windows[0]), vec!["a", "b"]);
    }

    #[test]
    fn test_deleted_records_join_first_window() {
        let windows = split_by_skew(
            vec![ChangeRecord::deleted("src/old.rs"), at("src/z.rs", 0, 1), at("src/y.rs", 40, 1)],
            Duration::from_secs(60),
        );
        assert_eq!(windows.len(), 2);
        assert_eq!(paths(&windows[0]), vec!["src/old.rs", "src/z.rs"]);
    }

    #[test]
    fn test_cap_size_by_count() {
        let records: Vec<_> = (0..5).map(|i| at(&format!("f{i}"), 0, 1)).collect();
        let chunks = cap_size(records, 2, u64::MAX);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_cap_size_by_bytes_keeps_oversized_file_alone() {
        let chunks = cap_size(vec![at("a", 0, 10), at("big", 0, 500), at("c", 0, 10)], 100, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(paths(&chunks[1]), vec!["big"]);
    }

    #[test]
    fn test_group_by_directory_orders_largest_first() {
        let config = ClassifierConfig::default();
        let clusters = group_by_directory(
            vec![
                at("README.md", 0, 1),
                at("docs/guide.md", 0, 1),
                at("src/a.rs", 0, 1),
                at("src/b.rs", 0, 1),
                at("tests/t.rs", 0, 1),
                at("tests/u.rs", 0, 1),
            ],
            &config,
        );
        let labels: Vec<&str> = clusters.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["src", "tests", "docs", "root"]);
        assert_eq!(clusters[3].confidence(), ROOT_CONFIDENCE);
    }

    #[test]
    fn test_split_parts_are_numbered() {
        let config = ClassifierConfig {
            max_files: 2,
            ..ClassifierConfig::default()
        };
        let clusters = group_by_directory(
            vec![at("src/a.rs", 0, 1), at("src/b.rs", 0, 1), at("src/c.rs", 0, 1)],
            &config,
        );
        let labels: Vec<&str> = clusters.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["src (1/2)", "src (2/2)"]);
        assert_eq!(clusters[0].confidence(), DIRECTORY_CONFIDENCE / 2.0);
    }
}

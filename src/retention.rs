//! Retention planning and purge execution
//!
//! A purge plan is a set of version ids selected under one of three
//! strategies. Two rules hold for every strategy: a tagged version is
//! never a candidate, and a path never drops below one non-deleted
//! version.
//!
//! Applying a plan deletes each snapshot file first (missing
//! snapshots are warnings, not failures), then removes the surviving
//! ids from the catalog in one batch, so an interrupted purge never
//! leaves rows pointing at deleted snapshots.

use crate::catalog::Catalog;
use crate::error::{Result, RewindError};
use crate::store::ContentStore;
use crate::types::FileVersion;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The three ways to select victims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStrategy {
    /// Keep the newest N untagged versions per file
    KeepLast(u32),
    /// Purge untagged versions older than the given age
    OlderThan(Duration),
    /// Purge oldest-first until total live size fits the budget
    MaxSize(u64),
}

impl std::fmt::Display for PurgeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurgeStrategy::KeepLast(n) => write!(f, "keeping last {} per file", n),
            PurgeStrategy::OlderThan(d) => write!(f, "older than {}s", d.as_secs()),
            PurgeStrategy::MaxSize(s) => write!(f, "keeping total size under {} bytes", s),
        }
    }
}

/// A selected set of versions to purge
#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    /// Victim rows, in application order
    pub victims: Vec<FileVersion>,
}

impl RetentionPlan {
    /// Whether the plan selects nothing
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    /// Number of selected versions
    pub fn len(&self) -> usize {
        self.victims.len()
    }

    /// Total bytes the plan would reclaim
    pub fn total_size(&self) -> u64 {
        self.victims.iter().map(|v| v.file_size).sum()
    }
}

/// Compute a purge plan under the given strategy
pub fn plan(catalog: &Catalog, strategy: PurgeStrategy) -> Result<RetentionPlan> {
    match strategy {
        PurgeStrategy::KeepLast(n) => plan_keep_last(catalog, n),
        PurgeStrategy::OlderThan(age) => plan_older_than(catalog, age),
        PurgeStrategy::MaxSize(budget) => plan_max_size(catalog, budget),
    }
}

fn plan_keep_last(catalog: &Catalog, keep: u32) -> Result<RetentionPlan> {
    if keep < 1 {
        return Err(RewindError::bad_state("keep-last must be at least 1"));
    }

    let mut victims = Vec::new();
    for latest in catalog.latest_of_all()? {
        // Untagged, non-deleted versions, newest first.
        let mut purgeable = Vec::new();
        for row in catalog.versions(&latest.file_path)? {
            if !row.deleted && !catalog.has_tags(row.id)? {
                purgeable.push(row);
            }
        }
        if purgeable.len() <= keep as usize {
            continue;
        }
        victims.extend(purgeable.split_off(keep as usize));
    }

    debug!(count = victims.len(), keep, "keep-last plan computed");
    Ok(RetentionPlan { victims })
}

fn plan_older_than(catalog: &Catalog, age: Duration) -> Result<RetentionPlan> {
    let cutoff = Utc::now()
        - ChronoDuration::from_std(age)
            .map_err(|_| RewindError::bad_state("older-than duration out of range"))?;

    let mut victims = Vec::new();
    for latest in catalog.latest_of_all()? {
        let live: Vec<FileVersion> = catalog
            .versions(&latest.file_path)?
            .into_iter()
            .filter(|row| !row.deleted)
            .collect();

        let mut candidates = Vec::new();
        for row in &live {
            if row.timestamp < cutoff && !catalog.has_tags(row.id)? {
                candidates.push(row.clone());
            }
        }

        if candidates.len() == live.len() {
            // Every live version aged out; the newest one stays so the
            // file keeps a restorable state.
            victims.extend(candidates.into_iter().skip(1));
        } else {
            victims.extend(candidates);
        }
    }

    debug!(count = victims.len(), "older-than plan computed");
    Ok(RetentionPlan { victims })
}

fn plan_max_size(catalog: &Catalog, budget: u64) -> Result<RetentionPlan> {
    let total = catalog.total_live_size()?;
    if total <= budget {
        return Ok(RetentionPlan::default());
    }
    let to_remove = total - budget;

    // Oldest first across the whole project.
    let mut candidates = Vec::new();
    let mut live_counts: HashMap<String, usize> = HashMap::new();
    for row in catalog.live_versions()? {
        *live_counts.entry(row.file_path.clone()).or_insert(0) += 1;
        if !catalog.has_tags(row.id)? {
            candidates.push(row);
        }
    }
    candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut victims = Vec::new();
    let mut removed = 0u64;
    for row in candidates {
        if removed >= to_remove {
            break;
        }
        match live_counts.get_mut(&row.file_path) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                removed += row.file_size;
                victims.push(row);
            }
            // Removing this one would leave the file with no versions.
            _ => continue,
        }
    }

    debug!(count = victims.len(), reclaimed = removed, "max-size plan computed");
    Ok(RetentionPlan { victims })
}

/// Execute a plan: delete snapshots, then the catalog rows in a batch
///
/// A snapshot that fails to delete keeps its catalog row and is rolled
/// into a warning; the rest of the plan completes. When `cancel` flips
/// the purge stops between ids, removing only the rows whose snapshots
/// were already handled.
pub fn apply(
    catalog: &Catalog,
    store: &ContentStore,
    plan: &RetentionPlan,
    cancel: Option<&AtomicBool>,
) -> Result<usize> {
    let mut completed_ids = Vec::with_capacity(plan.victims.len());

    for victim in &plan.victims {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                info!(done = completed_ids.len(), "purge aborted by shutdown");
                break;
            }
        }

        match store.remove(&victim.storage_path) {
            Ok(()) => completed_ids.push(victim.id),
            Err(e) => {
                warn!(
                    path = %victim.file_path,
                    version = victim.version_number,
                    error = %e,
                    "failed to delete snapshot, keeping its catalog row"
                );
            }
        }
    }

    let removed = catalog.remove_versions(&completed_ids)?;
    info!(removed, planned = plan.victims.len(), "purge applied");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project;
    use std::fs;
    use tempfile::TempDir;

    fn test_catalog() -> (Catalog, ContentStore, TempDir) {
        let temp = TempDir::new().unwrap();
        project::init_store(temp.path()).unwrap();
        let catalog = Catalog::open(temp.path()).unwrap();
        let store = ContentStore::new(temp.path());
        (catalog, store, temp)
    }

    /// Insert a row whose snapshot actually exists on disk
    fn seed(
        catalog: &Catalog,
        store: &ContentStore,
        temp: &TempDir,
        path: &str,
        n: u32,
        size: u64,
        age_days: i64,
    ) -> FileVersion {
        let abs = temp.path().join(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let content = vec![b'x'; size as usize];
        fs::write(&abs, &content).unwrap();
        let storage_path = store.store(&abs, n).unwrap();

        let row = FileVersion {
            id: 0,
            file_path: path.to_string(),
            version_number: n,
            timestamp: Utc::now() - ChronoDuration::days(age_days),
            file_hash: crate::utils::hash_data(&content),
            file_size: size,
            storage_path,
            deleted: false,
        };
        catalog.add_version(row).unwrap()
    }

    #[test]
    fn test_keep_last_protects_tags_and_newest() {
        let (catalog, store, temp) = test_catalog();
        // Seed scenario: v1 tagged, v2, v3; keep-last 1 purges only v2.
        seed(&catalog, &store, &temp, "a.txt", 1, 10, 3);
        seed(&catalog, &store, &temp, "a.txt", 2, 10, 2);
        seed(&catalog, &store, &temp, "a.txt", 3, 10, 1);
        catalog.add_tag("a.txt", 1, "stable").unwrap();

        let plan = plan_keep_last(&catalog, 1).unwrap();
        let numbers: Vec<u32> = plan.victims.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![2]);
    }

    #[test]
    fn test_keep_last_skips_small_histories() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 10, 2);
        seed(&catalog, &store, &temp, "a.txt", 2, 10, 1);

        assert!(plan_keep_last(&catalog, 2).unwrap().is_empty());
        assert!(plan_keep_last(&catalog, 5).unwrap().is_empty());
    }

    #[test]
    fn test_keep_last_zero_rejected() {
        let (catalog, _store, _temp) = test_catalog();
        assert!(matches!(
            plan_keep_last(&catalog, 0),
            Err(RewindError::BadState(_))
        ));
    }

    #[test]
    fn test_older_than_retains_newest_when_all_aged() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 5, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 5, 20);
        seed(&catalog, &store, &temp, "a.txt", 3, 5, 10);

        // All three versions are older than 5 days; the newest stays.
        let plan = plan_older_than(&catalog, Duration::from_secs(5 * 86_400)).unwrap();
        let numbers: Vec<u32> = plan.victims.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[test]
    fn test_older_than_purges_all_candidates_when_fresh_exist() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 5, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 5, 30);
        seed(&catalog, &store, &temp, "a.txt", 3, 5, 0);

        let plan = plan_older_than(&catalog, Duration::from_secs(7 * 86_400)).unwrap();
        let mut numbers: Vec<u32> = plan.victims.iter().map(|v| v.version_number).collect();
        numbers.sort();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_older_than_never_selects_tagged() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 5, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 5, 30);
        catalog.add_tag("a.txt", 1, "keep").unwrap();

        let plan = plan_older_than(&catalog, Duration::from_secs(86_400)).unwrap();
        // v1 is tagged; v2 is the only candidate, and since the
        // candidate set (1) != live count (2), it is purged outright.
        let numbers: Vec<u32> = plan.victims.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![2]);
    }

    #[test]
    fn test_max_size_within_budget_is_empty() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 100, 1);
        assert!(plan_max_size(&catalog, 1000).unwrap().is_empty());
    }

    #[test]
    fn test_max_size_reclaims_oldest_first() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 100, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 100, 20);
        seed(&catalog, &store, &temp, "a.txt", 3, 100, 10);
        // total 300; budget 150 → remove 150 → two oldest versions.

        let plan = plan_max_size(&catalog, 150).unwrap();
        let numbers: Vec<u32> = plan.victims.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(plan.total_size(), 200);
    }

    #[test]
    fn test_max_size_keeps_one_version_per_file() {
        let (catalog, store, temp) = test_catalog();
        seed(&catalog, &store, &temp, "a.txt", 1, 100, 30);
        seed(&catalog, &store, &temp, "b.txt", 1, 100, 20);

        // Budget 0 wants everything gone, but each file keeps one.
        let plan = plan_max_size(&catalog, 0).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_apply_removes_snapshots_and_rows() {
        let (catalog, store, temp) = test_catalog();
        let v1 = seed(&catalog, &store, &temp, "a.txt", 1, 10, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 10, 1);

        let plan = RetentionPlan {
            victims: vec![v1.clone()],
        };
        let removed = apply(&catalog, &store, &plan, None).unwrap();
        assert_eq!(removed, 1);

        assert!(!store.snapshot_path(&v1.storage_path).exists());
        assert!(catalog.version("a.txt", 1).unwrap().is_none());
        assert!(catalog.version("a.txt", 2).unwrap().is_some());
    }

    #[test]
    fn test_apply_missing_snapshot_is_warning() {
        let (catalog, store, temp) = test_catalog();
        let v1 = seed(&catalog, &store, &temp, "a.txt", 1, 10, 30);
        seed(&catalog, &store, &temp, "a.txt", 2, 10, 1);

        // Snapshot vanished out from under us.
        fs::remove_file(store.snapshot_path(&v1.storage_path)).unwrap();

        let plan = RetentionPlan { victims: vec![v1] };
        let removed = apply(&catalog, &store, &plan, None).unwrap();
        assert_eq!(removed, 1);
        assert!(catalog.version("a.txt", 1).unwrap().is_none());
    }

    #[test]
    fn test_apply_respects_cancellation() {
        let (catalog, store, temp) = test_catalog();
        let v1 = seed(&catalog, &store, &temp, "a.txt", 1, 10, 30);
        let v2 = seed(&catalog, &store, &temp, "a.txt", 2, 10, 20);
        seed(&catalog, &store, &temp, "a.txt", 3, 10, 1);

        let cancel = AtomicBool::new(true);
        let plan = RetentionPlan {
            victims: vec![v1, v2],
        };
        let removed = apply(&catalog, &store, &plan, Some(&cancel)).unwrap();
        assert_eq!(removed, 0);
        assert!(catalog.version("a.txt", 1).unwrap().is_some());
    }

    #[test]
    fn test_retention_safety_paths_keep_a_live_version() {
        let (catalog, store, temp) = test_catalog();
        for n in 1..=3 {
            seed(&catalog, &store, &temp, "a.txt", n, 10, 40 - n as i64);
        }
        seed(&catalog, &store, &temp, "b.txt", 1, 10, 40);

        for strategy in [
            PurgeStrategy::KeepLast(1),
            PurgeStrategy::OlderThan(Duration::from_secs(86_400)),
            PurgeStrategy::MaxSize(10),
        ] {
            let plan = plan(&catalog, strategy).unwrap();
            // Simulate the plan and check every path keeps a version.
            let victim_ids: Vec<u64> = plan.victims.iter().map(|v| v.id).collect();
            for latest in catalog.latest_of_all().unwrap() {
                let survivors = catalog
                    .versions(&latest.file_path)
                    .unwrap()
                    .into_iter()
                    .filter(|r| !r.deleted && !victim_ids.contains(&r.id))
                    .count();
                assert!(
                    survivors >= 1,
                    "strategy {:?} would strip {} bare",
                    strategy,
                    latest.file_path
                );
            }
        }
    }
}

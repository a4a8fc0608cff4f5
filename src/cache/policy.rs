use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

/// One file in the slice cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl CacheEntry {
    /// Age at `now`; files stamped in the future count as brand new.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or(Duration::ZERO)
    }
}

/// Every regular file below `root`. A missing root is an empty cache.
pub fn scan(root: &Path) -> io::Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    if !root.exists() {
        return Ok(entries);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Removed by a concurrent sweep or fetch.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                entries.push(CacheEntry {
                    path: entry.path(),
                    modified: meta.modified()?,
                    size: meta.len(),
                });
            }
        }
    }
    Ok(entries)
}

/// What a sweep should delete and when to look again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    pub delete: Vec<PathBuf>,
    pub remaining_size: u64,
    pub over_cap: bool,
    pub next_check_in: Duration,
}

/// Decide which entries to evict.
///
/// Entries older than `max_age` always go. If the rest still exceeds
/// `max_size`, the oldest go next, but never one younger than `check_wait`.
pub fn plan_eviction(
    mut entries: Vec<CacheEntry>,
    now: SystemTime,
    config: &CacheConfig,
) -> EvictionPlan {
    entries.sort_by_key(|e| e.modified);
    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    let mut delete = Vec::new();

    let (expired, mut survivors): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| e.age(now) > config.max_age);
    for e in expired {
        total -= e.size;
        delete.push(e.path);
    }

    let mut evicted = 0;
    for e in &survivors {
        if total <= config.max_size || e.age(now) < config.check_wait {
            break;
        }
        total -= e.size;
        delete.push(e.path.clone());
        evicted += 1;
    }
    survivors.drain(..evicted);

    let over_cap = total > config.max_size;
    let until_expiry = if over_cap {
        Duration::ZERO
    } else {
        survivors
            .first()
            .map(|oldest| config.max_age.saturating_sub(oldest.age(now)))
            .unwrap_or(config.max_age)
    };

    EvictionPlan {
        delete,
        remaining_size: total,
        over_cap,
        next_check_in: config.check_wait + until_expiry,
    }
}

/// Outcome of one sweep, for logs and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub remaining_size: u64,
    pub next_check_secs: u64,
    #[serde(skip)]
    pub next_check_in: Duration,
}

/// Scan the cache root and delete what [`plan_eviction`] selects.
///
/// Errors are logged, never returned.
pub fn sweep(config: &CacheConfig, now: SystemTime) -> SweepReport {
    let entries = match scan(&config.root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %config.root.display(), error = %e, "cannot scan slice cache");
            return SweepReport {
                next_check_secs: config.check_wait.as_secs(),
                next_check_in: config.check_wait,
                ..Default::default()
            };
        }
    };
    let scanned = entries.len();
    let plan = plan_eviction(entries, now, config);

    let mut deleted = 0;
    let mut failed = 0;
    for path in &plan.delete {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "evicted cache entry");
                deleted += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => deleted += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to evict cache entry");
                failed += 1;
            }
        }
    }
    if deleted > 0 || plan.over_cap {
        info!(
            deleted,
            failed,
            remaining = plan.remaining_size,
            over_cap = plan.over_cap,
            "slice cache swept"
        );
    }

    SweepReport {
        scanned,
        deleted,
        failed,
        remaining_size: plan.remaining_size,
        next_check_secs: plan.next_check_in.as_secs(),
        next_check_in: plan.next_check_in,
    }
}

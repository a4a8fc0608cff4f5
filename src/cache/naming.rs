use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::cache::scheduler::CacheScheduler;
use crate::config::CacheConfig;

/// Extension of cached alignment slices.
pub const SLICE_EXTENSION: &str = "bam";

/// Stable, unguessable file name for one cached slice.
///
/// The name is the SHA-256 of the credential token, the source file id and the
/// slice position, so two users never share a slice by accident.
pub fn slice_file_name(token: &str, source_id: &str, position: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [token, source_id, position] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}.{SLICE_EXTENSION}", hasher.finalize())
}

/// Directory of sliced alignment files with eviction running in the background.
pub struct SliceCache {
    root: PathBuf,
    scheduler: CacheScheduler,
}

impl SliceCache {
    /// Create the root directory if needed and start the eviction timer.
    pub fn open(config: CacheConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            root: config.root.clone(),
            scheduler: CacheScheduler::start(config),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a slice. Every lookup counts as a fetch for the eviction timer.
    pub fn entry_path(&self, token: &str, source_id: &str, position: &str) -> PathBuf {
        self.scheduler.notify_fetch();
        self.root.join(slice_file_name(token, source_id, position))
    }

    pub fn scheduler(&self) -> &CacheScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_slice_name_is_stable_hex() {
        let a = slice_file_name("token", "file-1", "chr1:100-200");
        let b = slice_file_name("token", "file-1", "chr1:100-200");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64 + 4);
        assert!(a.ends_with(".bam"));
        assert!(a[..64].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_slice_name_depends_on_every_part() {
        let base = slice_file_name("t", "f", "p");
        assert_ne!(base, slice_file_name("t2", "f", "p"));
        assert_ne!(base, slice_file_name("t", "f2", "p"));
        assert_ne!(base, slice_file_name("t", "f", "p2"));
        // field boundaries matter
        assert_ne!(slice_file_name("ab", "c", "p"), slice_file_name("a", "bc", "p"));
    }

    #[test]
    fn test_entry_path_schedules_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            root: dir.path().join("slices"),
            check_wait: Duration::from_secs(60),
            ..CacheConfig::default()
        };
        let cache = SliceCache::open(config).unwrap();
        assert!(cache.root().is_dir());
        assert!(cache.scheduler().next_due().is_none());
        let path = cache.entry_path("t", "f", "chr1:1-2");
        assert!(path.starts_with(cache.root()));
        assert!(cache.scheduler().next_due().is_some());
    }
}

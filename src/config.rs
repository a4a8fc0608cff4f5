use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TrackError};

/// Tunables for read-track construction.
///
/// Every field has a default, so a JSON config file only needs to list the
/// values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Hard read-count ceiling; downsampling kicks in at 110% of it.
    pub read_ceiling: u64,
    /// Canvas height budget in pixels shared by all rows of a group.
    pub max_canvas_height: u32,
    /// Rows above this count never get per-template detail boxes.
    pub max_rows_for_detail: usize,
    /// Minimum row height (px) for detail boxes.
    pub min_height_for_detail: u32,
    pub min_stack_height: u32,
    pub max_stack_height: u32,
    /// Rows taller than this get one pixel of spacing.
    pub stack_spacing_threshold: u32,
    pub min_ntwidth_qual: f64,
    pub min_ntwidth_mismatch: f64,
    pub min_ntwidth_overlap: f64,
    pub min_ntwidth_print_nt: f64,
    /// Insertions narrower than this on screen are not emitted.
    pub insertion_min_px: f64,
    pub drop_duplicates: bool,
    pub drop_supplementary: bool,
    pub cache: CacheConfig,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            read_ceiling: 7000,
            max_canvas_height: 1500,
            max_rows_for_detail: 2000,
            min_height_for_detail: 7,
            min_stack_height: 1,
            max_stack_height: 15,
            stack_spacing_threshold: 7,
            min_ntwidth_qual: 2.0,
            min_ntwidth_mismatch: 0.9,
            min_ntwidth_overlap: 0.4,
            min_ntwidth_print_nt: 7.0,
            insertion_min_px: 1.0,
            drop_duplicates: true,
            drop_supplementary: true,
            cache: CacheConfig::default(),
        }
    }
}

impl TrackConfig {
    /// Load a config from a JSON file, filling unspecified fields with defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackError::InvalidRequest(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| TrackError::InvalidRequest(format!("invalid config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the layout cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.min_stack_height == 0 || self.min_stack_height > self.max_stack_height {
            return Err(TrackError::InvalidRequest(format!(
                "stack height range {}..={} is empty",
                self.min_stack_height, self.max_stack_height
            )));
        }
        Ok(())
    }
}

/// Limits for the on-disk slice cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
    #[serde(rename = "max_age_secs", with = "secs")]
    pub max_age: Duration,
    pub max_size: u64,
    #[serde(rename = "check_wait_secs", with = "secs")]
    pub check_wait: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("bamtrack-cache"),
            max_age: Duration::from_secs(2 * 60 * 60),
            max_size: 5_000_000_000,
            check_wait: Duration::from_secs(60),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

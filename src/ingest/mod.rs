//! Pulling SAM records out of an alignment source under a read-count ceiling.

pub mod downsample;
pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

pub use downsample::DownsamplePolicy;
pub use source::{
    AlignmentSource, CommandSource, MemorySource, RecordStream, StreamStatus, TRUNCATION_MARKER,
};

use crate::alignment::RawReadRecord;
use crate::config::TrackConfig;
use crate::error::{Result, TrackError};
use crate::region::RegionSet;

/// Shared cancellation flag, checked once per record.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Record filters applied before downsampling.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub read_ceiling: u64,
    pub drop_duplicates: bool,
    pub drop_supplementary: bool,
}

impl From<&TrackConfig> for IngestOptions {
    fn from(cfg: &TrackConfig) -> Self {
        Self {
            read_ceiling: cfg.read_ceiling,
            drop_duplicates: cfg.drop_duplicates,
            drop_supplementary: cfg.drop_supplementary,
        }
    }
}

/// Counters collected while ingesting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Pre-scan count summed over regions.
    pub prescan_total: u64,
    pub malformed: usize,
    pub duplicates: usize,
    pub supplementary: usize,
    pub downsampled_out: usize,
    pub kept: usize,
}

/// Records accepted for each region, in source order.
#[derive(Debug)]
pub struct IngestOutcome {
    pub records: Vec<Vec<RawReadRecord>>,
    pub stats: IngestStats,
    pub downsample: Option<DownsamplePolicy>,
    pub truncated: bool,
}

impl IngestOutcome {
    pub fn total_records(&self) -> usize {
        self.records.iter().map(Vec::len).sum()
    }
}

/// Count, decide on downsampling, then stream every region.
pub fn ingest(
    source: &dyn AlignmentSource,
    regions: &RegionSet,
    opts: IngestOptions,
    cancel: &CancelToken,
) -> Result<IngestOutcome> {
    let mut stats = IngestStats::default();
    for region in &regions.regions {
        stats.prescan_total += source.count(region)?;
    }
    let mut downsample = DownsamplePolicy::from_counts(stats.prescan_total, opts.read_ceiling);
    if let Some(policy) = &downsample {
        info!(
            total = stats.prescan_total,
            keep = policy.keep,
            skip = policy.skip,
            expected = policy.expected_kept(stats.prescan_total),
            "downsampling reads"
        );
    }

    let mut truncated = false;
    let mut records = Vec::with_capacity(regions.len());
    for region in &regions.regions {
        let mut stream = source.stream(region)?;
        let mut accepted = Vec::new();
        let mut failure = None;
        for line in stream.by_ref() {
            if cancel.is_cancelled() {
                failure = Some(TrackError::Cancelled);
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let record = match RawReadRecord::parse(&line) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "skipping malformed record");
                    stats.malformed += 1;
                    continue;
                }
            };
            if opts.drop_duplicates && record.flags.is_duplicate() {
                stats.duplicates += 1;
                continue;
            }
            if opts.drop_supplementary && record.flags.is_supplementary() {
                stats.supplementary += 1;
                continue;
            }
            if let Some(policy) = downsample.as_mut() {
                if !policy.admit() {
                    stats.downsampled_out += 1;
                    continue;
                }
            }
            accepted.push(record);
        }

        let status = stream.finish();
        if let Some(err) = failure {
            return Err(err);
        }
        if status? == StreamStatus::Truncated {
            truncated = true;
        }
        stats.kept += accepted.len();
        debug!(region = %region, records = accepted.len(), "region ingested");
        records.push(accepted);
    }

    Ok(IngestOutcome {
        records,
        stats,
        downsample,
        truncated,
    })
}

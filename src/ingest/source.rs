use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::alignment::parse_cigar;
use crate::error::{Result, TrackError};
use crate::region::Region;

/// Stderr substring the alignment tool prints for a file missing its EOF
/// block. Reads before the damage are still valid.
pub const TRUNCATION_MARKER: &str = "EOF marker is absent";

/// How a record stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Complete,
    Truncated,
}

/// A lazy, finite, non-restartable sequence of SAM text lines.
pub trait RecordStream: Iterator<Item = Result<String>> {
    /// Stop the stream (early, if it was not drained) and report how it ended.
    fn finish(self: Box<Self>) -> Result<StreamStatus>;
}

/// Collaborator that produces SAM records for a coordinate range.
pub trait AlignmentSource {
    /// Number of records overlapping `region`.
    fn count(&self, region: &Region) -> Result<u64>;

    fn stream<'a>(&'a self, region: &Region) -> Result<Box<dyn RecordStream + 'a>>;
}

/// 1-based inclusive locus string understood by samtools-like tools.
fn locus(region: &Region) -> String {
    format!("{}:{}-{}", region.chrom, region.start + 1, region.stop)
}

/// Interpret the collected stderr of a finished tool run.
fn classify_stderr(stderr: &str, success: bool) -> Result<StreamStatus> {
    if stderr.contains(TRUNCATION_MARKER) {
        warn!("alignment source is truncated, continuing with partial data");
        return Ok(StreamStatus::Truncated);
    }
    let stderr = stderr.trim();
    if !success || !stderr.is_empty() {
        return Err(TrackError::SourceUnavailable(if stderr.is_empty() {
            "alignment source exited with an error".to_string()
        } else {
            stderr.to_string()
        }));
    }
    Ok(StreamStatus::Complete)
}

/// Runs an external alignment tool (e.g. `samtools view`) with the locus
/// appended to its arguments.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    stream_args: Vec<String>,
    count_args: Vec<String>,
}

impl CommandSource {
    pub fn new(
        program: impl Into<String>,
        stream_args: Vec<String>,
        count_args: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            stream_args,
            count_args,
        }
    }

    /// `samtools view <bam>` for records, `samtools view -c <bam>` for counts.
    pub fn samtools(bam: &Path) -> Self {
        let bam = bam.display().to_string();
        Self::new(
            "samtools",
            vec!["view".to_string(), bam.clone()],
            vec!["view".to_string(), "-c".to_string(), bam],
        )
    }

    fn spawn(&self, args: &[String], region: &Region) -> Result<Child> {
        let locus = locus(region);
        debug!(program = %self.program, %locus, "spawning alignment source");
        Command::new(&self.program)
            .args(args)
            .arg(&locus)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TrackError::SourceUnavailable(format!("failed to run {}: {e}", self.program))
            })
    }
}

impl AlignmentSource for CommandSource {
    fn count(&self, region: &Region) -> Result<u64> {
        let child = self.spawn(&self.count_args, region)?;
        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_stderr(&stderr, output.status.success())?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        stdout.parse().map_err(|e| {
            TrackError::SourceUnavailable(format!("bad count output '{stdout}': {e}"))
        })
    }

    fn stream<'a>(&'a self, region: &Region) -> Result<Box<dyn RecordStream + 'a>> {
        let mut child = self.spawn(&self.stream_args, region)?;
        let missing = |pipe: &str| {
            TrackError::SourceUnavailable(format!("no {pipe} from alignment source"))
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let mut stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        // Drain stderr concurrently so a chatty tool cannot block on a full pipe.
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });
        Ok(Box::new(CommandStream {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr_reader: Some(stderr_reader),
            drained: false,
        }))
    }
}

struct CommandStream {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_reader: Option<JoinHandle<String>>,
    drained: bool,
}

impl Iterator for CommandStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next() {
                None => {
                    self.drained = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(line)) if line.is_empty() || line.starts_with('@') => continue,
                Some(Ok(line)) => return Some(Ok(line)),
            }
        }
    }
}

impl RecordStream for CommandStream {
    fn finish(mut self: Box<Self>) -> Result<StreamStatus> {
        if !self.drained {
            debug!("stopping alignment source early");
            let _ = self.child.kill();
            let _ = self.child.wait();
            return Ok(StreamStatus::Complete);
        }
        let status = self.child.wait()?;
        let stderr = self
            .stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        classify_stderr(&stderr, status.success())
    }
}

/// SAM records held in memory, filtered per region by RNAME and POS.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    lines: Vec<String>,
    truncated: bool,
}

impl MemorySource {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            truncated: false,
        }
    }

    /// Parse SAM text, dropping header and blank lines.
    pub fn from_sam_text(text: &str) -> Self {
        Self::new(
            text.lines()
                .filter(|l| !l.trim().is_empty() && !l.starts_with('@'))
                .map(str::to_string)
                .collect(),
        )
    }

    /// Report every stream as truncated, as a damaged file would.
    pub fn with_truncation(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Whether the record's reference span overlaps `region`. Lines that do
    /// not parse are let through for the ingest loop to count as malformed.
    fn in_region(line: &str, region: &Region) -> bool {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return true;
        }
        let Ok(pos) = fields[3].parse::<u64>() else {
            return true;
        };
        if fields[2] != region.chrom {
            return false;
        }
        let span = match fields[5] {
            // unmapped reads are placed over their sequence length
            "*" => fields[9].len() as u64,
            cigar => match parse_cigar(cigar) {
                Ok(ops) => ops.iter().map(|op| u64::from(op.ref_len())).sum(),
                Err(_) => return true,
            },
        };
        let start = pos.saturating_sub(1);
        start < region.stop && start + span.max(1) > region.start
    }
}

impl AlignmentSource for MemorySource {
    fn count(&self, region: &Region) -> Result<u64> {
        Ok(self.lines.iter().filter(|l| Self::in_region(l, region)).count() as u64)
    }

    fn stream<'a>(&'a self, region: &Region) -> Result<Box<dyn RecordStream + 'a>> {
        let lines: Vec<&'a String> =
            self.lines.iter().filter(|l| Self::in_region(l, region)).collect();
        Ok(Box::new(MemoryStream {
            lines: lines.into_iter(),
            truncated: self.truncated,
        }))
    }
}

struct MemoryStream<'a> {
    lines: std::vec::IntoIter<&'a String>,
    truncated: bool,
}

impl Iterator for MemoryStream<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next().map(|l| Ok(l.clone()))
    }
}

impl RecordStream for MemoryStream<'_> {
    fn finish(self: Box<Self>) -> Result<StreamStatus> {
        Ok(if self.truncated {
            StreamStatus::Truncated
        } else {
            StreamStatus::Complete
        })
    }
}

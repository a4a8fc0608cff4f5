//! Reference bases for mismatch annotation and matcher context.

pub mod fasta;

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Result, TrackError};

pub use fasta::ReferenceGenome;

/// Anything that can return reference bases for `chrom:start-stop`
/// (1-based, inclusive), upper-cased.
pub trait ReferenceSource {
    fn fetch(&self, chrom: &str, start: u64, stop: u64) -> Result<Vec<u8>>;
}

/// Concatenate the sequence lines of a FASTA text block, upper-cased.
pub fn parse_fasta_block(text: &str) -> Vec<u8> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('>'))
        .flat_map(|line| line.bytes().map(|b| b.to_ascii_uppercase()))
        .collect()
}

/// Runs an external tool such as `samtools faidx genome.fa` with
/// `chr:start-stop` appended; the tool prints FASTA on stdout.
#[derive(Debug, Clone)]
pub struct CommandReference {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandReference {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn samtools(fasta: &Path) -> Self {
        Self::new("samtools", vec!["faidx".to_string(), fasta.display().to_string()])
    }
}

impl ReferenceSource for CommandReference {
    fn fetch(&self, chrom: &str, start: u64, stop: u64) -> Result<Vec<u8>> {
        let locus = format!("{chrom}:{start}-{stop}");
        debug!(program = %self.program.display(), %locus, "fetching reference");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&locus)
            .output()
            .map_err(|e| {
                let program = self.program.display();
                TrackError::SourceUnavailable(format!("failed to run {program}: {e}"))
            })?;
        if !output.status.success() {
            return Err(TrackError::SourceUnavailable(format!(
                "reference fetch for {locus} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_fasta_block(&String::from_utf8_lossy(&output.stdout)))
    }
}

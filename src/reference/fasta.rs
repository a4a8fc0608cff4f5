use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use noodles::fasta;
use tracing::debug;

use super::ReferenceSource;
use crate::error::{Result, TrackError};

/// One stretch of a chromosome held in memory.
#[derive(Debug, Clone)]
struct Contig {
    /// 0-based position of the first base.
    offset: u64,
    bases: Vec<u8>,
    /// A whole chromosome clips fetches at its end; a slice must contain them.
    whole: bool,
}

impl Contig {
    fn covers(&self, from: u64, stop: u64) -> bool {
        let end = self.offset + self.bases.len() as u64;
        if stop <= from || from < self.offset || from >= end {
            return false;
        }
        self.whole || stop <= end
    }
}

/// `chr17:100-200` names a slice starting at 1-based 100.
fn slice_locus(name: &str) -> Option<(String, u64)> {
    let (chrom, rest) = name.rsplit_once(':')?;
    let (start, end) = rest.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    (start > 0 && end >= start).then(|| (chrom.to_string(), start - 1))
}

/// A reference genome held in memory.
///
/// Sequences named like `>chr17:10953130-11022414` are treated as slices of
/// `chr17` and serve fetches that fall entirely inside them.
#[derive(Debug, Default)]
pub struct ReferenceGenome {
    contigs: HashMap<String, Vec<Contig>>,
}

impl ReferenceGenome {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            let path = path.display();
            TrackError::SourceUnavailable(format!("failed to open FASTA file {path}: {e}"))
        })?;
        let mut reader = fasta::io::Reader::new(BufReader::new(file));
        let sequences = reader
            .records()
            .map(|record| {
                let record = record.map_err(|e| {
                    TrackError::SourceUnavailable(format!("invalid FASTA {}: {e}", path.display()))
                })?;
                let name = String::from_utf8_lossy(record.name()).into_owned();
                Ok((name, record.sequence().as_ref().to_vec()))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        debug!(path = %path.display(), sequences = sequences.len(), "loaded reference");
        Ok(Self::from_sequences(sequences))
    }

    pub fn from_sequences(sequences: HashMap<String, Vec<u8>>) -> Self {
        let mut contigs: HashMap<String, Vec<Contig>> = HashMap::new();
        for (name, bases) in sequences {
            let (chrom, contig) = match slice_locus(&name) {
                Some((chrom, offset)) => (
                    chrom,
                    Contig {
                        offset,
                        bases,
                        whole: false,
                    },
                ),
                None => (
                    name,
                    Contig {
                        offset: 0,
                        bases,
                        whole: true,
                    },
                ),
            };
            contigs.entry(chrom).or_default().push(contig);
        }
        for list in contigs.values_mut() {
            list.sort_by_key(|c| (!c.whole, c.offset));
        }
        Self { contigs }
    }
}

impl ReferenceSource for ReferenceGenome {
    fn fetch(&self, chrom: &str, start: u64, stop: u64) -> Result<Vec<u8>> {
        let from = start.saturating_sub(1);
        let contigs = self.contigs.get(chrom).ok_or_else(|| {
            TrackError::SourceUnavailable(format!("chromosome '{chrom}' not found in reference"))
        })?;
        let contig = contigs.iter().find(|c| c.covers(from, stop)).ok_or_else(|| {
            TrackError::SourceUnavailable(format!("{chrom}:{start}-{stop} lies outside reference"))
        })?;
        let lo = (from - contig.offset) as usize;
        let hi = ((stop - contig.offset) as usize).min(contig.bases.len());
        Ok(contig.bases[lo..hi].to_ascii_uppercase())
    }
}

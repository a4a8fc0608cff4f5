use serde::Serialize;

use crate::alignment::flags::{ReadClass, ReadFlags};
use crate::alignment::record::RawReadRecord;
use crate::error::TrackError;
use crate::region::Region;

/// A single CIGAR operation with its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// Alignment match (can be sequence match or mismatch).
    Match(u32),
    /// Insertion to the reference.
    Insertion(u32),
    /// Deletion from the reference.
    Deletion(u32),
    /// Skipped region (intron).
    Skip(u32),
    /// Soft clip (bases present in read but not aligned).
    SoftClip(u32),
    /// Hard clip (bases not present in read).
    HardClip(u32),
    Pad(u32),
    /// `=`
    SequenceMatch(u32),
    /// `X`
    SequenceMismatch(u32),
}

impl CigarOp {
    pub fn len(&self) -> u32 {
        match *self {
            CigarOp::Match(n)
            | CigarOp::Insertion(n)
            | CigarOp::Deletion(n)
            | CigarOp::Skip(n)
            | CigarOp::SoftClip(n)
            | CigarOp::HardClip(n)
            | CigarOp::Pad(n)
            | CigarOp::SequenceMatch(n)
            | CigarOp::SequenceMismatch(n) => n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bases this operation consumes on the reference.
    pub fn ref_len(&self) -> u32 {
        match self {
            CigarOp::Match(n)
            | CigarOp::Deletion(n)
            | CigarOp::Skip(n)
            | CigarOp::SequenceMatch(n)
            | CigarOp::SequenceMismatch(n) => *n,
            _ => 0,
        }
    }

    /// Number of bases this operation consumes on the read.
    pub fn read_len(&self) -> u32 {
        match self {
            CigarOp::Match(n)
            | CigarOp::Insertion(n)
            | CigarOp::SoftClip(n)
            | CigarOp::SequenceMatch(n)
            | CigarOp::SequenceMismatch(n) => *n,
            _ => 0,
        }
    }

    fn is_clip(&self) -> bool {
        matches!(self, CigarOp::SoftClip(_) | CigarOp::HardClip(_))
    }
}

/// Parse a CIGAR string such as `5S40M2I10M`.
pub fn parse_cigar(cigar: &str) -> Result<Vec<CigarOp>, TrackError> {
    let mut ops = Vec::new();
    let mut len: Option<u32> = None;
    for c in cigar.chars() {
        if let Some(digit) = c.to_digit(10) {
            let acc = len.unwrap_or(0);
            len = Some(
                acc.checked_mul(10)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or_else(|| {
                        TrackError::MalformedRecord(format!("CIGAR length overflow in '{cigar}'"))
                    })?,
            );
            continue;
        }
        let n = len.take().ok_or_else(|| {
            TrackError::MalformedRecord(format!("CIGAR operator without length in '{cigar}'"))
        })?;
        let op = match c {
            'M' => CigarOp::Match(n),
            'I' => CigarOp::Insertion(n),
            'D' => CigarOp::Deletion(n),
            'N' => CigarOp::Skip(n),
            'S' => CigarOp::SoftClip(n),
            'H' => CigarOp::HardClip(n),
            'P' => CigarOp::Pad(n),
            '=' => CigarOp::SequenceMatch(n),
            'X' => CigarOp::SequenceMismatch(n),
            other => {
                return Err(TrackError::MalformedRecord(format!(
                    "unknown CIGAR operator '{other}' in '{cigar}'"
                )))
            }
        };
        ops.push(op);
    }
    if len.is_some() {
        return Err(TrackError::MalformedRecord(format!("dangling length in CIGAR '{cigar}'")));
    }
    Ok(ops)
}

/// Kind of a drawable alignment box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxOp {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Pad,
    Mismatch,
}

impl BoxOp {
    /// Whether boxes of this kind carry read letters.
    pub fn has_sequence(&self) -> bool {
        matches!(self, BoxOp::Match | BoxOp::Insertion | BoxOp::SoftClip | BoxOp::Mismatch)
    }

    /// Whether the box occupies reference positions on screen.
    pub fn spans_reference(&self) -> bool {
        !matches!(self, BoxOp::Insertion | BoxOp::Pad)
    }
}

/// One contiguous operator interval of a segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignBox {
    pub op: BoxOp,
    /// 0-based reference start. Leading clips may start before the chromosome.
    pub start: i64,
    pub len: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qual: Option<Vec<u8>>,
}

impl AlignBox {
    fn new(op: BoxOp, start: i64, len: u32, seq_offset: Option<usize>) -> Self {
        Self {
            op,
            start,
            len,
            seq_offset,
            seq: None,
            qual: None,
        }
    }

    /// Right edge used for on-screen extent.
    pub fn end(&self) -> i64 {
        if self.op.spans_reference() {
            self.start + self.len as i64
        } else {
            self.start
        }
    }
}

/// Where the mate of a paired read sits, kept when requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatePosition {
    pub chrom: String,
    /// 0-based.
    pub pos: u64,
}

/// Parsed geometry of one alignment record.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub qname: String,
    /// 0-based alignment start.
    pub start: i64,
    /// Rightmost consumed reference coordinate, exclusive.
    pub stop: i64,
    pub boxes: Vec<AlignBox>,
    pub forward: bool,
    pub region_index: usize,
    pub flags: ReadFlags,
    pub class: ReadClass,
    pub mapq: u8,
    pub tlen: i64,
    pub unmapped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate: Option<MatePosition>,
    pub x1: f64,
    pub x2: f64,
    #[serde(skip)]
    pub(crate) seq: String,
    #[serde(skip)]
    pub(crate) qual: Vec<u8>,
}

impl Segment {
    pub fn sequence(&self) -> &str {
        &self.seq
    }

    /// Copy sequence (and optionally quality) slices onto the boxes, then drop
    /// the raw strings.
    pub fn materialize(&mut self, with_qual: bool) {
        for b in &mut self.boxes {
            let Some(offset) = b.seq_offset else { continue };
            if !b.op.has_sequence() {
                continue;
            }
            let end = offset + b.len as usize;
            b.seq = self.seq.get(offset..end).map(str::to_string);
            if with_qual {
                b.qual = self.qual.get(offset..end).map(<[u8]>::to_vec);
            }
        }
        self.seq = String::new();
        self.qual = Vec::new();
    }

    /// Re-establish ascending box order after boxes were appended.
    pub(crate) fn sort_boxes(&mut self) {
        self.boxes.sort_by_key(|b| b.start);
    }
}

/// Switches controlling which boxes survive parsing.
#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    /// Keep boxes outside the view window.
    pub keep_all_boxes: bool,
    pub keep_mate_position: bool,
    /// Parse unmapped records instead of dropping them.
    pub keep_unmapped: bool,
    pub insertion_min_px: f64,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            keep_all_boxes: false,
            keep_mate_position: false,
            keep_unmapped: false,
            insertion_min_px: 1.0,
        }
    }
}

/// Result of parsing one record against a view window.
#[derive(Debug)]
pub enum SegmentOutcome {
    Parsed(Segment),
    /// The read is unmapped and unmapped reads were not requested.
    Unmapped,
    /// No box falls inside the window.
    Invisible,
}

/// Turn one SAM record into a [`Segment`] for `region`.
pub fn parse_segment(
    record: &RawReadRecord,
    region: &Region,
    region_index: usize,
    opts: &SegmentOptions,
) -> Result<SegmentOutcome, TrackError> {
    let unmapped = record.flags.is_unmapped();
    if unmapped && !opts.keep_unmapped {
        return Ok(SegmentOutcome::Unmapped);
    }

    let win_start = region.start as i64;
    let win_stop = region.stop as i64;
    let overlaps = |a: i64, b: i64| opts.keep_all_boxes || (a < win_stop && b > win_start);
    let inside = |p: i64| p >= win_start && p < win_stop;

    let start = record.start() as i64;
    let mut boxes = Vec::new();
    let mut ref_pos = start;

    if unmapped || record.cigar == "*" {
        if !unmapped {
            return Err(TrackError::MalformedRecord(format!(
                "{}: mapped record without CIGAR",
                record.qname
            )));
        }
        // SAM places an unmapped mate at its partner's position.
        let len = record.seq.len() as u32;
        if len > 0 && overlaps(start, start + len as i64) {
            boxes.push(AlignBox::new(BoxOp::Match, start, len, Some(0)));
        }
        ref_pos += len as i64;
    } else {
        let ops = parse_cigar(&record.cigar)?;
        let leading_clip: i64 = ops
            .iter()
            .take_while(|op| op.is_clip())
            .map(|op| op.len() as i64)
            .sum();
        // Leading clips end where the alignment starts; trailing clips follow
        // the alignment end and each other.
        let mut lead_cursor = start - leading_clip;
        let mut trail_cursor = start;
        let mut seen_aligned = false;
        let mut seq_cursor = 0usize;

        for op in &ops {
            if op.is_empty() {
                continue;
            }
            let len = op.len();
            let span = len as i64;
            match op {
                CigarOp::Match(_) | CigarOp::SequenceMatch(_) | CigarOp::SequenceMismatch(_) => {
                    let kind = if matches!(op, CigarOp::SequenceMismatch(_)) {
                        BoxOp::Mismatch
                    } else {
                        BoxOp::Match
                    };
                    if overlaps(ref_pos, ref_pos + span) {
                        boxes.push(AlignBox::new(kind, ref_pos, len, Some(seq_cursor)));
                    }
                    ref_pos += span;
                    seq_cursor += len as usize;
                    seen_aligned = true;
                }
                CigarOp::Insertion(_) => {
                    let wide_enough = len as f64 * region.ntwidth >= opts.insertion_min_px;
                    if opts.keep_all_boxes || (inside(ref_pos) && wide_enough) {
                        boxes.push(AlignBox::new(BoxOp::Insertion, ref_pos, len, Some(seq_cursor)));
                    }
                    seq_cursor += len as usize;
                    seen_aligned = true;
                }
                CigarOp::Deletion(_) | CigarOp::Skip(_) => {
                    let kind = if matches!(op, CigarOp::Deletion(_)) {
                        BoxOp::Deletion
                    } else {
                        BoxOp::Skip
                    };
                    if opts.keep_all_boxes || inside(ref_pos) || inside(ref_pos + span - 1) {
                        boxes.push(AlignBox::new(kind, ref_pos, len, None));
                    }
                    ref_pos += span;
                    seen_aligned = true;
                }
                CigarOp::SoftClip(_) | CigarOp::HardClip(_) => {
                    let (kind, offset) = if matches!(op, CigarOp::SoftClip(_)) {
                        (BoxOp::SoftClip, Some(seq_cursor))
                    } else {
                        (BoxOp::HardClip, None)
                    };
                    let box_start = if seen_aligned {
                        trail_cursor = trail_cursor.max(ref_pos);
                        let s = trail_cursor;
                        trail_cursor += span;
                        s
                    } else {
                        let s = lead_cursor;
                        lead_cursor += span;
                        s
                    };
                    if overlaps(box_start, box_start + span) {
                        boxes.push(AlignBox::new(kind, box_start, len, offset));
                    }
                    if kind == BoxOp::SoftClip {
                        seq_cursor += len as usize;
                    }
                }
                CigarOp::Pad(_) => {
                    if opts.keep_all_boxes {
                        boxes.push(AlignBox::new(BoxOp::Pad, ref_pos, len, None));
                    }
                }
            }
        }
    }

    if boxes.is_empty() {
        return Ok(SegmentOutcome::Invisible);
    }

    let x1 = region.scale(boxes[0].start as f64);
    let last_end = boxes.iter().map(AlignBox::end).max().unwrap_or(boxes[0].start);
    let x2 = f64::max(x1, region.scale(last_end as f64));

    let mate = if opts.keep_mate_position
        && record.flags.is_paired()
        && !record.flags.mate_unmapped()
    {
        let chrom = match record.rnext.as_str() {
            "=" => record.rname.clone(),
            other => other.to_string(),
        };
        Some(MatePosition {
            chrom,
            pos: record.pnext.saturating_sub(1),
        })
    } else {
        None
    };

    Ok(SegmentOutcome::Parsed(Segment {
        qname: record.qname.clone(),
        start,
        stop: ref_pos,
        boxes,
        forward: !record.flags.is_reverse(),
        region_index,
        flags: record.flags,
        class: ReadClass::classify(record.flags, &record.rnext, &region.chrom),
        mapq: record.mapq,
        tlen: record.tlen,
        unmapped,
        mate,
        x1,
        x2,
        seq: record.seq.clone(),
        qual: record.qual.clone(),
    }))
}

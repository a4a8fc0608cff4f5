use crate::alignment::cigar::{AlignBox, BoxOp, Segment};

/// Reference bases for one view region, upper-cased.
#[derive(Debug, Clone)]
pub struct RegionReference {
    /// 0-based position of `bases[0]`.
    pub start: i64,
    pub bases: Vec<u8>,
}

impl RegionReference {
    pub fn new(start: i64, bases: Vec<u8>) -> Self {
        Self {
            start,
            bases: bases.to_ascii_uppercase(),
        }
    }

    fn base_at(&self, pos: i64) -> Option<u8> {
        let idx = usize::try_from(pos - self.start).ok()?;
        self.bases.get(idx).copied()
    }
}

/// Append a 1-bp mismatch box for every read base in a match box that differs
/// from the reference. Returns the number of mismatches found.
pub fn annotate_segment(segment: &mut Segment, reference: &RegionReference) -> usize {
    let read = segment.sequence().as_bytes();
    let mut found = Vec::new();
    for b in segment.boxes.iter().filter(|b| b.op == BoxOp::Match) {
        let Some(offset) = b.seq_offset else { continue };
        for i in 0..b.len as usize {
            let Some(&base) = read.get(offset + i) else { break };
            let pos = b.start + i as i64;
            let Some(ref_base) = reference.base_at(pos) else { continue };
            if !base.eq_ignore_ascii_case(&ref_base) {
                found.push(AlignBox {
                    op: BoxOp::Mismatch,
                    start: pos,
                    len: 1,
                    seq_offset: Some(offset + i),
                    seq: None,
                    qual: None,
                });
            }
        }
    }
    let count = found.len();
    if count > 0 {
        segment.boxes.extend(found);
        segment.sort_boxes();
    }
    count
}

/// Annotate every segment drawn in `region_index`.
pub fn annotate_region<'a>(
    segments: impl IntoIterator<Item = &'a mut Segment>,
    region_index: usize,
    reference: &RegionReference,
) -> usize {
    segments
        .into_iter()
        .filter(|s| s.region_index == region_index)
        .map(|s| annotate_segment(s, reference))
        .sum()
}

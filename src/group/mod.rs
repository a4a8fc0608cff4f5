//! Templates (reads or read pairs) and the groups that partition them.

pub mod assemble;
pub mod matcher;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

pub use assemble::{assemble, Assembly, GroupMode, Matchers, RecordGroup, DEFAULT_GROUP};
pub use matcher::{
    Breakend, CommandStructuralMatcher, CommandVariantMatcher, StructuralEvent, StructuralMatcher,
    StructuralPartition, StructuralQuery, Variant, VariantMatcher, VariantPartition, VariantQuery,
};

use crate::alignment::{parse_segment, Segment, SegmentOptions, SegmentOutcome};
use crate::region::Region;

/// One physical read or read pair.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    /// One or two segments, in the order they were read.
    pub segments: Vec<Segment>,
    pub x1: f64,
    pub x2: f64,
    /// Row index; row-local until the group is finalized.
    pub row: usize,
    /// Absolute pixel offset, set at finalization.
    pub y: u32,
    pub height_multiplier: u32,
    /// Paired overlap: the second segment is drawn one row lower.
    pub second_segment_below: bool,
}

impl Template {
    pub fn new(segment: Segment) -> Self {
        Self {
            x1: segment.x1,
            x2: segment.x2,
            segments: vec![segment],
            row: 0,
            y: 0,
            height_multiplier: 1,
            second_segment_below: false,
        }
    }

    pub fn qname(&self) -> &str {
        &self.segments[0].qname
    }

    pub fn is_full(&self) -> bool {
        self.segments.len() >= 2
    }

    pub fn push(&mut self, segment: Segment) {
        self.x1 = self.x1.min(segment.x1);
        self.x2 = self.x2.max(segment.x2);
        self.segments.push(segment);
    }

    /// Segments in different regions.
    pub fn is_multi_region(&self) -> bool {
        let first = self.segments[0].region_index;
        self.segments.iter().any(|s| s.region_index != first)
    }

    /// Index of the rightmost region this template touches.
    pub fn last_region(&self) -> usize {
        self.segments.iter().map(|s| s.region_index).max().unwrap_or(0)
    }

    pub fn is_discordant(&self) -> bool {
        self.segments.iter().any(|s| s.class.is_discordant())
    }

    /// Whether the two segments collide on screen.
    pub fn segments_overlap(&self) -> bool {
        match self.segments.as_slice() {
            [a, b] => a.x1 < b.x2 && b.x1 < a.x2,
            _ => false,
        }
    }
}

/// Hover rectangle for one template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateBox {
    pub qname: String,
    pub x1: f64,
    pub x2: f64,
    pub y: u32,
    pub height: u32,
}

/// A classification bucket of templates with its own layout.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub label: String,
    /// Private region copies; rendering flags are per group.
    pub regions: Vec<Region>,
    pub templates: Vec<Template>,
    /// Height multiplier of each stack row.
    pub rows: Vec<u32>,
    pub stack_height: u32,
    pub stack_spacing: u32,
    pub messages: Vec<String>,
    pub allow_partial_stack: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_boxes: Option<Vec<TemplateBox>>,
}

impl Group {
    pub fn new(label: impl Into<String>, regions: &[Region], templates: Vec<Template>) -> Self {
        Self {
            label: label.into(),
            regions: regions.to_vec(),
            templates,
            rows: Vec::new(),
            stack_height: 0,
            stack_spacing: 0,
            messages: Vec::new(),
            allow_partial_stack: false,
            template_boxes: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Sum of row height multipliers.
    pub fn weighted_rows(&self) -> u32 {
        self.rows.iter().sum()
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.templates.iter_mut().flat_map(|t| t.segments.iter_mut())
    }
}

/// `"N read(s) supporting <subject>"`.
pub fn support_message(count: usize, subject: &str) -> String {
    let noun = if count == 1 { "read" } else { "reads" };
    format!("{count} {noun} supporting {subject}")
}

/// Records that did not become segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    /// No box inside the view.
    pub invisible: usize,
    pub unmapped: usize,
    pub malformed: usize,
}

impl SegmentStats {
    pub fn add(&mut self, other: SegmentStats) {
        self.invisible += other.invisible;
        self.unmapped += other.unmapped;
        self.malformed += other.malformed;
    }
}

/// Parse the records of one group and assemble them into templates.
///
/// In paired mode records sharing a qname join the same template until it
/// holds two segments; a further record with that qname opens a new one.
pub fn build_templates(
    records: &RecordGroup,
    regions: &[Region],
    paired: bool,
    opts: &SegmentOptions,
) -> (Vec<Template>, SegmentStats) {
    let mut stats = SegmentStats::default();
    let mut templates: Vec<Template> = Vec::new();
    let mut open: HashMap<String, usize> = HashMap::new();

    for (region_index, record) in &records.records {
        let Some(region) = regions.get(*region_index) else { continue };
        let segment = match parse_segment(record, region, *region_index, opts) {
            Ok(SegmentOutcome::Parsed(segment)) => segment,
            Ok(SegmentOutcome::Unmapped) => {
                stats.unmapped += 1;
                continue;
            }
            Ok(SegmentOutcome::Invisible) => {
                stats.invisible += 1;
                continue;
            }
            Err(e) => {
                debug!(error = %e, qname = %record.qname, "dropping record");
                stats.malformed += 1;
                continue;
            }
        };
        if paired {
            if let Some(&idx) = open.get(&segment.qname) {
                if !templates[idx].is_full() {
                    templates[idx].push(segment);
                    continue;
                }
            }
            open.insert(segment.qname.clone(), templates.len());
        }
        templates.push(Template::new(segment));
    }
    (templates, stats)
}

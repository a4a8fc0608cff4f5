//! One read-track request from region list to finished layout.

use serde::Serialize;
use tracing::{debug, info};

use crate::alignment::{annotate_region, RegionReference, SegmentOptions};
use crate::config::TrackConfig;
use crate::error::{Result, TrackError};
use crate::group::{
    assemble, build_templates, support_message, Group, GroupMode, Matchers, SegmentStats,
    StructuralMatcher, VariantMatcher,
};
use crate::ingest::{
    ingest, AlignmentSource, CancelToken, DownsamplePolicy, IngestOptions, IngestStats,
};
use crate::layout::{
    apply_window, compute_heights, finalize, stack_group, LayoutParams, RowWindow, StackParams,
};
use crate::reference::ReferenceSource;
use crate::region::{Region, RegionRequest, RegionSet};

/// Everything the caller asks for in one request.
#[derive(Debug, Clone, Default)]
pub struct TrackRequest {
    pub regions: Vec<RegionRequest>,
    /// Assemble read pairs into templates by qname.
    pub paired: bool,
    pub mode: GroupMode,
    /// Only lay out these rows.
    pub rows: Option<RowWindow>,
    /// Only return the group with this label.
    pub only_group: Option<String>,
    pub keep_all_boxes: bool,
    pub keep_mate_position: bool,
    pub keep_unmapped: bool,
    /// Fail with `SourceTruncated` instead of returning a flagged partial track.
    pub fail_on_truncation: bool,
}

impl TrackRequest {
    pub fn new(regions: Vec<RegionRequest>) -> Self {
        Self {
            regions,
            ..Default::default()
        }
    }
}

/// Finished geometry for the renderer.
#[derive(Debug, Serialize)]
pub struct TrackLayout {
    pub regions: Vec<Region>,
    pub groups: Vec<Group>,
    /// The alignment source ended early; reads past the damage are missing.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsample: Option<DownsamplePolicy>,
    pub ingest: IngestStats,
    pub segments: SegmentStats,
    pub mismatches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allele_stats: Option<serde_json::Value>,
}

impl TrackLayout {
    pub fn template_count(&self) -> usize {
        self.groups.iter().map(|g| g.templates.len()).sum()
    }
}

/// Builds read tracks from an alignment source and optional collaborators.
pub struct TrackEngine {
    source: Box<dyn AlignmentSource>,
    reference: Option<Box<dyn ReferenceSource>>,
    variant_matcher: Option<Box<dyn VariantMatcher>>,
    structural_matcher: Option<Box<dyn StructuralMatcher>>,
    config: TrackConfig,
}

impl TrackEngine {
    pub fn new(source: Box<dyn AlignmentSource>, config: TrackConfig) -> Self {
        Self {
            source,
            reference: None,
            variant_matcher: None,
            structural_matcher: None,
            config,
        }
    }

    /// Enables mismatch annotation and gives matchers reference context.
    pub fn with_reference(mut self, reference: Box<dyn ReferenceSource>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_variant_matcher(mut self, matcher: Box<dyn VariantMatcher>) -> Self {
        self.variant_matcher = Some(matcher);
        self
    }

    pub fn with_structural_matcher(mut self, matcher: Box<dyn StructuralMatcher>) -> Self {
        self.structural_matcher = Some(matcher);
        self
    }

    fn fetch_references(
        &self,
        regions: &RegionSet,
        mode: &GroupMode,
    ) -> Result<Vec<Option<RegionReference>>> {
        let Some(reference) = &self.reference else {
            return Ok(vec![None; regions.len()]);
        };
        regions
            .regions
            .iter()
            .map(|region| {
                let wanted =
                    mode.is_classified() || region.ntwidth >= self.config.min_ntwidth_mismatch;
                if !wanted {
                    return Ok(None);
                }
                let bases = reference.fetch(&region.chrom, region.start + 1, region.stop)?;
                Ok(Some(RegionReference::new(region.start as i64, bases)))
            })
            .collect()
    }

    /// Run the whole pipeline for one request.
    pub fn render(&self, request: &TrackRequest, cancel: &CancelToken) -> Result<TrackLayout> {
        self.config.validate()?;
        let regions = RegionSet::resolve(&request.regions)?;
        info!(
            regions = regions.len(),
            paired = request.paired,
            classified = request.mode.is_classified(),
            "building read track"
        );

        let opts = IngestOptions::from(&self.config);
        let outcome = ingest(self.source.as_ref(), &regions, opts, cancel)?;
        if outcome.total_records() == 0 {
            return Err(TrackError::NoReadsInRange);
        }
        let truncated = outcome.truncated;
        if truncated && request.fail_on_truncation {
            return Err(TrackError::SourceTruncated);
        }
        let downsample = outcome.downsample;
        let ingest_stats = outcome.stats;

        let references = self.fetch_references(&regions, &request.mode)?;
        let reference_text: Vec<Option<&str>> = references
            .iter()
            .map(|r| r.as_ref().and_then(|r| std::str::from_utf8(&r.bases).ok()))
            .collect();
        let matchers = Matchers {
            variant: self.variant_matcher.as_deref(),
            structural: self.structural_matcher.as_deref(),
        };
        let assembly = assemble(
            outcome.records,
            &regions.regions,
            &reference_text,
            &request.mode,
            matchers,
        )?;

        let segment_opts = SegmentOptions {
            keep_all_boxes: request.keep_all_boxes,
            keep_mate_position: request.keep_mate_position,
            keep_unmapped: request.keep_unmapped,
            insertion_min_px: self.config.insertion_min_px,
        };
        let mut segment_stats = SegmentStats::default();
        let mut groups = Vec::with_capacity(assembly.groups.len());
        for record_group in &assembly.groups {
            let (templates, stats) =
                build_templates(record_group, &regions.regions, request.paired, &segment_opts);
            segment_stats.add(stats);
            if templates.is_empty() {
                debug!(label = %record_group.label, "dropping empty group");
                continue;
            }
            let mut group = Group::new(record_group.label.clone(), &regions.regions, templates);
            if let Some(subject) = &record_group.subject {
                group.messages.push(support_message(group.templates.len(), subject));
            }
            groups.push(group);
        }

        let mut mismatches = 0;
        for (index, reference) in references.iter().enumerate() {
            let Some(reference) = reference else { continue };
            if regions.regions[index].ntwidth < self.config.min_ntwidth_mismatch {
                continue;
            }
            for group in &mut groups {
                mismatches += annotate_region(group.segments_mut(), index, reference);
            }
        }
        drop(reference_text);
        drop(references);

        if let Some(label) = &request.only_group {
            groups.retain(|g| &g.label == label);
            if groups.is_empty() {
                return Err(TrackError::GroupNotFound(label.clone()));
            }
        }
        if groups.is_empty() {
            return Err(TrackError::NoReadsInRange);
        }

        let stack_params = StackParams {
            paired: request.paired,
            insertion_order: request.mode.is_classified(),
            spacing: regions.read_spacing(),
            min_ntwidth_overlap: self.config.min_ntwidth_overlap,
        };
        let layout_params = LayoutParams::from(&self.config);
        let group_count = groups.len();
        for group in &mut groups {
            stack_group(group, &stack_params);
            compute_heights(group, &layout_params, group_count);
            if let Some(window) = request.rows {
                apply_window(group, window);
            }
            finalize(group, &layout_params, request.rows.is_some());

            let Group { templates, regions: group_regions, .. } = &mut *group;
            for segment in templates.iter_mut().flat_map(|t| t.segments.iter_mut()) {
                let with_qual = group_regions
                    .get(segment.region_index)
                    .is_some_and(|r| r.to_show_qual);
                segment.materialize(with_qual);
            }
            debug!(
                label = %group.label,
                templates = group.templates.len(),
                rows = group.rows.len(),
                stack_height = group.stack_height,
                "group laid out"
            );
        }

        let layout = TrackLayout {
            regions: regions.regions,
            groups,
            truncated,
            downsample,
            ingest: ingest_stats,
            segments: segment_stats,
            mismatches,
            allele_stats: assembly.allele_stats,
        };
        info!(
            groups = layout.groups.len(),
            templates = layout.template_count(),
            truncated = layout.truncated,
            "read track ready"
        );
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemorySource;
    use std::collections::HashMap;

    fn read(qname: &str, flag: u16, pos: u64, cigar: &str, seq: &str) -> String {
        format!("{qname}\t{flag}\tchr1\t{pos}\t60\t{cigar}\t=\t{pos}\t0\t{seq}\t*")
    }

    fn engine(lines: Vec<String>) -> TrackEngine {
        TrackEngine::new(Box::new(MemorySource::new(lines)), TrackConfig::default())
    }

    fn request(width: u32) -> TrackRequest {
        TrackRequest::new(vec![RegionRequest::new("chr1", 1000, 1100, width)])
    }

    #[test]
    fn test_no_reads_in_range() {
        let err = engine(vec![]).render(&request(100), &CancelToken::new()).unwrap_err();
        assert!(err.is_empty_result());
    }

    #[test]
    fn test_invalid_region_rejected_before_io() {
        let req = TrackRequest::new(vec![RegionRequest::new("chr1", 10, 5, 100)]);
        let err = engine(vec![]).render(&req, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, TrackError::InvalidRegion(_)));
    }

    #[test]
    fn test_mismatches_annotated_with_reference() {
        let mut seqs = HashMap::new();
        seqs.insert("chr1".to_string(), "ACGT".repeat(600).into_bytes());
        let reference = crate::reference::ReferenceGenome::from_sequences(seqs);
        // reference at 0-based 1000.. is ACGT...; the read has one substitution
        let engine =
            engine(vec![read("r", 0, 1001, "8M", "ACGTTCGT")]).with_reference(Box::new(reference));
        let layout = engine.render(&request(1000), &CancelToken::new()).unwrap();
        assert_eq!(layout.mismatches, 1);
        let segment = &layout.groups[0].templates[0].segments[0];
        let mismatch = segment
            .boxes
            .iter()
            .find(|b| b.op == crate::alignment::BoxOp::Mismatch)
            .unwrap();
        assert_eq!(mismatch.start, 1004);
        assert_eq!(mismatch.seq.as_deref(), Some("T"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackConfig {
            min_stack_height: 20,
            max_stack_height: 10,
            ..TrackConfig::default()
        };
        let engine = TrackEngine::new(Box::new(MemorySource::new(vec![])), config);
        let err = engine.render(&request(100), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, TrackError::InvalidRequest(_)));
    }

    #[test]
    fn test_group_not_found() {
        let mut req = request(100);
        req.only_group = Some("supportAlt0".to_string());
        let err = engine(vec![read("r", 0, 1001, "8M", "ACGTACGT")])
            .render(&req, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TrackError::GroupNotFound(label) if label == "supportAlt0"));
    }

    #[test]
    fn test_only_invisible_reads() {
        let err = engine(vec![read("r", 0, 1001, "1H", "*")])
            .render(&request(100), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, TrackError::NoReadsInRange));
    }

    #[test]
    fn test_materialized_sequences() {
        let layout = engine(vec![read("r", 0, 1011, "2S6M", "TTACGTAC")])
            .render(&request(1000), &CancelToken::new())
            .unwrap();
        let boxes = &layout.groups[0].templates[0].segments[0].boxes;
        assert_eq!(boxes[0].seq.as_deref(), Some("TT"));
        assert_eq!(boxes[1].seq.as_deref(), Some("ACGTAC"));
        assert!(layout.groups[0].regions[0].to_print_nt);
        let json = serde_json::to_value(&layout).unwrap();
        assert_eq!(json["groups"][0]["label"], "all");
    }
}

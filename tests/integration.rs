//! End-to-end tests: SAM text in, finished read-track layout out.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use bamtrack::alignment::BoxOp;
use bamtrack::cache::{plan_eviction, sweep, CacheEntry};
use bamtrack::group::{
    Breakend, GroupMode, StructuralEvent, StructuralMatcher, StructuralPartition, StructuralQuery,
    Variant, VariantMatcher, VariantPartition, VariantQuery,
};
use bamtrack::ingest::{CancelToken, MemorySource};
use bamtrack::layout::RowWindow;
use bamtrack::region::RegionRequest;
use bamtrack::{
    CacheConfig, Result, TrackConfig, TrackEngine, TrackError, TrackLayout, TrackRequest,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sam(qname: &str, flag: u16, chrom: &str, pos: u64, cigar: &str, len: usize) -> String {
    format!("{qname}\t{flag}\t{chrom}\t{pos}\t60\t{cigar}\t=\t{pos}\t0\t{}\t*", "A".repeat(len))
}

fn engine(lines: Vec<String>) -> TrackEngine {
    TrackEngine::new(Box::new(MemorySource::new(lines)), TrackConfig::default())
}

fn chr1_request() -> TrackRequest {
    TrackRequest::new(vec![RegionRequest::new("chr1", 1000, 2000, 500)])
}

fn render(engine: &TrackEngine, request: &TrackRequest) -> TrackLayout {
    engine.render(request, &CancelToken::new()).unwrap()
}

fn assert_rows_do_not_collide(layout: &TrackLayout, spacing: f64) {
    for group in &layout.groups {
        for (i, a) in group.templates.iter().enumerate() {
            for b in group.templates.iter().skip(i + 1) {
                if a.row == b.row {
                    assert!(
                        a.x2 + spacing <= b.x1 || b.x2 + spacing <= a.x1,
                        "{} [{}, {}] and {} [{}, {}] share row {}",
                        a.qname(),
                        a.x1,
                        a.x2,
                        b.qname(),
                        b.x1,
                        b.x2,
                        a.row
                    );
                }
            }
        }
    }
}

/// A deterministic pseudo-random read set.
fn scattered_reads(n: u64) -> Vec<String> {
    let mut state = 0x2545_f491_u64;
    (0..n)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let pos = 1001 + (state >> 33) % 950;
            let len = 10 + (state >> 20) % 40;
            sam(&format!("r{i}"), 0, "chr1", pos, &format!("{len}M"), len as usize)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_a_non_overlapping_reads_share_one_row() {
    let engine = engine(vec![
        sam("a", 0, "chr1", 1010, "50M", 50),
        sam("b", 0, "chr1", 1100, "50M", 50),
        sam("c", 0, "chr1", 1200, "50M", 50),
    ]);
    let layout = render(&engine, &chr1_request());
    assert_eq!(layout.groups.len(), 1);
    let group = &layout.groups[0];
    assert_eq!(group.label, "all");
    assert_eq!(group.templates.len(), 3);
    assert!(group.templates.iter().all(|t| t.row == 0));
    assert_eq!(group.rows.len(), 1);
    assert!(group.messages.is_empty());
}

#[test]
fn test_scenario_b_colliding_reads_stack() {
    let engine = engine(vec![
        sam("a", 0, "chr1", 1100, "50M", 50),
        sam("b", 0, "chr1", 1100, "50M", 50),
    ]);
    let layout = render(&engine, &chr1_request());
    let group = &layout.groups[0];
    let rows: Vec<usize> = group.templates.iter().map(|t| t.row).collect();
    assert_eq!(rows, vec![0, 1]);
    assert_eq!(group.rows.len(), 2);
    // two rows of 15px plus 1px spacing
    assert_eq!(group.stack_height, 15);
    assert_eq!(group.templates[1].y, 16);
}

#[test]
fn test_scenario_c_downsampling() {
    let lines = (0..8000u64)
        .map(|i| sam(&format!("r{i}"), 0, "chr1", 1001 + i % 900, "20M", 20))
        .collect();
    let engine = engine(lines);
    let layout = render(&engine, &chr1_request());
    let policy = layout.downsample.as_ref().unwrap();
    assert_eq!((policy.keep, policy.skip), (10, 1));
    assert_eq!(layout.template_count(), 7273);
    assert_eq!(layout.ingest.prescan_total, 8000);
    assert_eq!(layout.ingest.downsampled_out, 727);

    // identical input gives identical output
    let again = render(&engine, &chr1_request());
    let names = |l: &TrackLayout| -> Vec<String> {
        l.groups[0].templates.iter().map(|t| t.qname().to_string()).collect()
    };
    assert_eq!(names(&layout), names(&again));
}

#[test]
fn test_under_ceiling_not_downsampled() {
    let engine = engine(scattered_reads(500));
    let layout = render(&engine, &chr1_request());
    assert!(layout.downsample.is_none());
    assert_eq!(layout.template_count(), 500);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_stacking_non_overlap_single_end() {
    let engine = engine(scattered_reads(1500));
    let request = chr1_request();
    let layout = render(&engine, &request);
    // 5bp at 0.5px/bp
    assert_rows_do_not_collide(&layout, 2.5);
}

#[test]
fn test_stacking_non_overlap_paired() {
    let mut lines = Vec::new();
    for i in 0..300u64 {
        let pos = 1001 + (i * 31) % 800;
        let mate = pos + 40 + (i % 5) * 30;
        lines.push(sam(&format!("p{i}"), 0x1 | 0x2 | 0x20 | 0x40, "chr1", pos, "30M", 30));
        lines.push(sam(&format!("p{i}"), 0x1 | 0x2 | 0x10 | 0x80, "chr1", mate, "30M", 30));
    }
    let engine = engine(lines);
    let mut request = chr1_request();
    request.paired = true;
    let layout = render(&engine, &request);
    assert_eq!(layout.template_count(), 300);
    assert!(layout.groups[0].templates.iter().all(|t| t.segments.len() == 2));
    assert_rows_do_not_collide(&layout, 2.5);
}

#[test]
fn test_multi_region_layout() {
    let engine = engine(vec![
        sam("span", 0x1 | 0x20 | 0x40, "chr1", 1801, "30M", 30),
        sam("span", 0x1 | 0x10 | 0x80, "chr7", 5101, "30M", 30),
        sam("solo", 0, "chr1", 1101, "30M", 30),
        sam("other", 0, "chr7", 5501, "30M", 30),
    ]);
    let mut request = TrackRequest::new(vec![
        RegionRequest::new("chr1", 1000, 2000, 500),
        RegionRequest::new("chr7", 5000, 6000, 500),
    ]);
    request.paired = true;
    let layout = render(&engine, &request);
    assert_eq!(layout.regions[1].x, 510.0);
    let group = &layout.groups[0];
    assert_eq!(group.templates[0].qname(), "span");
    assert!(group.templates[0].is_multi_region());
    assert_eq!(group.templates.len(), 3);
    assert_rows_do_not_collide(&layout, 2.5);
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Splits reads three ways by the number in their name.
struct ParityMatcher;

impl VariantMatcher for ParityMatcher {
    fn classify(&self, query: &VariantQuery<'_>) -> Result<VariantPartition> {
        let mut refs = Vec::new();
        let mut alts = Vec::new();
        for line in &query.reads {
            let qname = line.split('\t').next().unwrap().to_string();
            let n: u32 = qname.trim_start_matches('r').parse().unwrap();
            match n % 3 {
                0 => alts.push(qname),
                1 => refs.push(qname),
                _ => {}
            }
        }
        Ok(VariantPartition {
            groups: [("supportAlt0".to_string(), alts), ("supportRef".to_string(), refs)]
                .into_iter()
                .collect(),
            allele_stats: Some(serde_json::json!([{"allele": "G", "forward": 3, "reverse": 1}])),
        })
    }
}

#[test]
fn test_variant_partition_invariant() {
    let lines: Vec<String> = (0..30u64)
        .map(|i| sam(&format!("r{i}"), 0, "chr1", 1401 + i, "50M", 50))
        .collect();
    let engine = engine(lines).with_variant_matcher(Box::new(ParityMatcher));
    let mut request = chr1_request();
    request.mode = GroupMode::Variant {
        variant: Variant {
            chrom: "chr1".to_string(),
            pos: 1430,
            reference: "A".to_string(),
            alts: vec!["G".to_string()],
        },
        allele_sequences: Vec::new(),
    };
    let layout = render(&engine, &request);

    let labels: Vec<&str> = layout.groups.iter().map(|g| g.label.as_str()).collect();
    assert_eq!(labels, vec!["supportRef", "supportAlt0", "supportNone"]);
    assert_eq!(layout.groups[0].messages, vec!["10 reads supporting reference allele"]);
    assert_eq!(layout.groups[1].messages, vec!["10 reads supporting alternative allele G"]);

    let mut seen = HashSet::new();
    for group in &layout.groups {
        for t in &group.templates {
            assert!(seen.insert(t.qname().to_string()), "{} in two groups", t.qname());
        }
    }
    assert_eq!(seen.len(), 30);

    // insertion order, one template per row
    let g = &layout.groups[0];
    assert!(g.templates.iter().enumerate().all(|(i, t)| t.row == i));
    assert!(layout.allele_stats.is_some());
}

struct SpanMatcher;

impl StructuralMatcher for SpanMatcher {
    fn classify(&self, query: &StructuralQuery<'_>) -> Result<StructuralPartition> {
        let names = |i: usize| -> HashSet<String> {
            query.regions[i]
                .reads
                .iter()
                .map(|l| l.split('\t').next().unwrap().to_string())
                .collect()
        };
        let (left, right) = (names(0), names(1));
        Ok(StructuralPartition {
            multi: left.intersection(&right).cloned().collect(),
            single: Vec::new(),
        })
    }
}

#[test]
fn test_structural_event_groups() {
    let engine = engine(vec![
        sam("fusion", 0x1 | 0x40, "chr1", 1901, "30M", 30),
        sam("fusion", 0x1 | 0x80, "chr7", 5051, "30M", 30),
        sam("normal", 0x1 | 0x2 | 0x20, "chr1", 1501, "30M", 30),
    ])
    .with_structural_matcher(Box::new(SpanMatcher));
    let mut request = TrackRequest::new(vec![
        RegionRequest::new("chr1", 1000, 2000, 500),
        RegionRequest::new("chr7", 5000, 6000, 500),
    ]);
    request.paired = true;
    request.mode = GroupMode::Structural(StructuralEvent {
        left: Breakend {
            chrom: "chr1".to_string(),
            pos: 1950,
            forward: true,
        },
        right: Breakend {
            chrom: "chr7".to_string(),
            pos: 5050,
            forward: true,
        },
    });
    let layout = render(&engine, &request);
    assert_eq!(layout.groups.len(), 2);
    assert_eq!(layout.groups[0].messages, vec!["1 read supporting the structural event"]);
    assert_eq!(layout.groups[1].messages, vec!["1 read supporting reference"]);
    // budget is halved for two groups
    assert_eq!(layout.groups[0].stack_height, 15);
}

#[test]
fn test_structural_event_needs_two_regions() {
    let engine = engine(vec![sam("a", 0, "chr1", 1101, "30M", 30)])
        .with_structural_matcher(Box::new(SpanMatcher));
    let mut request = chr1_request();
    request.mode = GroupMode::Structural(StructuralEvent {
        left: Breakend {
            chrom: "chr1".to_string(),
            pos: 1,
            forward: true,
        },
        right: Breakend {
            chrom: "chr1".to_string(),
            pos: 2,
            forward: true,
        },
    });
    let err = engine.render(&request, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, TrackError::InvalidRequest(_)));
}

// ---------------------------------------------------------------------------
// Windowing and errors
// ---------------------------------------------------------------------------

#[test]
fn test_partial_stack_window() {
    let lines = (0..40u64).map(|i| sam(&format!("r{i}"), 0, "chr1", 1101, "50M", 50)).collect();
    let engine = engine(lines);
    let mut request = chr1_request();
    request.rows = Some(RowWindow::new(10, 14).unwrap());
    let layout = render(&engine, &request);
    let group = &layout.groups[0];
    assert_eq!(group.templates.len(), 5);
    let rows: Vec<usize> = group.templates.iter().map(|t| t.row).collect();
    assert_eq!(rows, vec![0, 1, 2, 3, 4]);
    assert!(!group.allow_partial_stack);
    assert_eq!(group.template_boxes.as_ref().map(Vec::len), Some(5));
}

#[test]
fn test_partial_stack_window_past_last_row() {
    // Boundary: the window selects nothing; the group is kept, empty, not paginated.
    let engine = engine(vec![sam("a", 0, "chr1", 1101, "50M", 50)]);
    let mut request = chr1_request();
    request.rows = Some(RowWindow::new(5, 9).unwrap());
    let layout = render(&engine, &request);
    let group = &layout.groups[0];
    assert!(group.templates.is_empty());
    assert!(group.rows.is_empty());
    assert!(!group.allow_partial_stack);
    assert_eq!(group.template_boxes.as_deref(), Some(&[][..]));
}

#[test]
fn test_truncated_source_is_flagged() {
    let source =
        MemorySource::new(vec![sam("a", 0, "chr1", 1101, "50M", 50)]).with_truncation(true);
    let engine = TrackEngine::new(Box::new(source), TrackConfig::default());
    let layout = render(&engine, &chr1_request());
    assert!(layout.truncated);
    assert_eq!(layout.template_count(), 1);
}

#[test]
fn test_truncated_source_rejected_when_strict() {
    let source =
        MemorySource::new(vec![sam("a", 0, "chr1", 1101, "50M", 50)]).with_truncation(true);
    let engine = TrackEngine::new(Box::new(source), TrackConfig::default());
    let mut request = chr1_request();
    request.fail_on_truncation = true;
    let err = engine.render(&request, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, TrackError::SourceTruncated));
}

#[test]
fn test_open_ended_row_window() {
    let lines = (0..6u64).map(|i| sam(&format!("r{i}"), 0, "chr1", 1101, "50M", 50)).collect();
    let engine = engine(lines);
    let mut request = chr1_request();
    request.rows = Some(RowWindow::new(2, usize::MAX).unwrap());
    let layout = render(&engine, &request);
    let group = &layout.groups[0];
    assert_eq!(group.templates.len(), 4);
    assert_eq!(group.rows.len(), 4);
}

#[test]
fn test_malformed_and_invisible_counted() {
    let engine = engine(vec![
        sam("ok", 0, "chr1", 1101, "50M", 50),
        "short\tline".to_string(),
        sam("far", 0, "chr1", 1, "50M", 50),
        sam("spliced", 0, "chr1", 501, "10M2000N10M", 20),
        sam("dup", 0x400, "chr1", 1101, "50M", 50),
    ]);
    let layout = render(&engine, &chr1_request());
    assert_eq!(layout.template_count(), 1);
    assert_eq!(layout.ingest.malformed, 1);
    assert_eq!(layout.ingest.duplicates, 1);
    assert_eq!(layout.segments.invisible, 1);
}

#[test]
fn test_reads_left_of_window_do_not_trigger_downsampling() {
    let mut lines: Vec<String> = (0..8000u64)
        .map(|i| sam(&format!("early{i}"), 0, "chr1", 1 + i % 900, "50M", 50))
        .collect();
    lines.extend((0..100u64).map(|i| sam(&format!("r{i}"), 0, "chr1", 1001 + i * 9, "50M", 50)));
    let layout = render(&engine(lines), &chr1_request());
    assert_eq!(layout.ingest.prescan_total, 100);
    assert!(layout.downsample.is_none());
    assert_eq!(layout.template_count(), 100);
    assert_eq!(layout.segments.invisible, 0);
}

#[test]
fn test_empty_range_is_user_facing() {
    let engine = engine(vec![sam("elsewhere", 0, "chr2", 1101, "50M", 50)]);
    let err = engine.render(&chr1_request(), &CancelToken::new()).unwrap_err();
    assert!(err.is_empty_result());
}

#[test]
fn test_cancelled_request() {
    let engine = engine(vec![sam("a", 0, "chr1", 1101, "50M", 50)]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine.render(&chr1_request(), &cancel).unwrap_err();
    assert!(matches!(err, TrackError::Cancelled));
}

#[test]
fn test_json_output_shape() {
    let engine = engine(vec![sam("a", 0, "chr1", 1101, "5S45M", 50)]);
    let layout = render(&engine, &chr1_request());
    let json = serde_json::to_value(&layout).unwrap();
    let boxes = &json["groups"][0]["templates"][0]["segments"][0]["boxes"];
    assert_eq!(boxes[0]["op"], "softclip");
    assert_eq!(boxes[1]["op"], "match");
    assert_eq!(layout.groups[0].templates[0].segments[0].boxes[1].op, BoxOp::Match);
    assert_eq!(json["truncated"], false);
}

// ---------------------------------------------------------------------------
// Slice cache
// ---------------------------------------------------------------------------

#[test]
fn test_cache_eviction_boundary() {
    let config = CacheConfig {
        root: PathBuf::from("/unused"),
        max_age: Duration::from_secs(7200),
        max_size: 100,
        check_wait: Duration::from_secs(60),
    };
    let now = SystemTime::now();
    let entry = |name: &str, age_secs: u64| CacheEntry {
        path: PathBuf::from(name),
        modified: now - Duration::from_secs(age_secs),
        size: 80,
    };
    // Over the cap by one file; the older one is still inside check_wait.
    let plan = plan_eviction(vec![entry("new", 10), entry("newer", 5)], now, &config);
    assert!(plan.delete.is_empty());
    assert!(plan.over_cap);
    assert_eq!(plan.next_check_in, config.check_wait);

    // Once it is old enough it goes, and only it.
    let plan = plan_eviction(vec![entry("old", 61), entry("newer", 5)], now, &config);
    assert_eq!(plan.delete, vec![PathBuf::from("old")]);
    assert!(!plan.over_cap);
}

#[test]
fn test_cache_sweep_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.bam", "b.bam", "c.bam"] {
        std::fs::write(dir.path().join(name), vec![0u8; 400]).unwrap();
    }
    let config = CacheConfig {
        root: dir.path().to_path_buf(),
        max_age: Duration::from_secs(7200),
        max_size: 1000,
        check_wait: Duration::from_secs(60),
    };
    // Two minutes from now all three are eligible; one must go.
    let report = sweep(&config, SystemTime::now() + Duration::from_secs(120));
    assert_eq!(report.scanned, 3);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.remaining_size, 800);
    let left = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(left, 2);
}

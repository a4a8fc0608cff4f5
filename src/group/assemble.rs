use std::collections::HashMap;

use tracing::info;

use crate::alignment::RawReadRecord;
use crate::error::{Result, TrackError};
use crate::group::matcher::{
    StructuralEvent, StructuralMatcher, StructuralQuery, StructuralRegionReads, Variant,
    VariantMatcher, VariantQuery,
};
use crate::region::Region;

/// Label of the single group built when no classification is requested.
pub const DEFAULT_GROUP: &str = "all";
pub const SUPPORT_REF: &str = "supportRef";
pub const SUPPORT_ALT_PREFIX: &str = "supportAlt";
pub const SUPPORT_AMBIGUOUS: &str = "supportAmbiguous";
pub const SUPPORT_NONE: &str = "supportNone";
pub const SUPPORT_EVENT: &str = "supportEvent";

/// How templates are split into groups.
#[derive(Debug, Clone, Default)]
pub enum GroupMode {
    #[default]
    Default,
    Variant {
        variant: Variant,
        /// Allele sequences from an earlier classification, if any.
        allele_sequences: Vec<String>,
    },
    Structural(StructuralEvent),
}

impl GroupMode {
    /// Classification modes keep templates in insertion order.
    pub fn is_classified(&self) -> bool {
        !matches!(self, GroupMode::Default)
    }
}

/// Matchers available to the assembler.
#[derive(Clone, Copy, Default)]
pub struct Matchers<'a> {
    pub variant: Option<&'a dyn VariantMatcher>,
    pub structural: Option<&'a dyn StructuralMatcher>,
}

/// Records of one group, tagged with the index of the region they were read from.
#[derive(Debug, Clone)]
pub struct RecordGroup {
    pub label: String,
    /// What the group's reads support, for the message header.
    pub subject: Option<String>,
    pub records: Vec<(usize, RawReadRecord)>,
}

#[derive(Debug)]
pub struct Assembly {
    pub groups: Vec<RecordGroup>,
    /// Passed through from the variant matcher untouched.
    pub allele_stats: Option<serde_json::Value>,
}

/// Partition per-region records into labeled groups.
///
/// The partition is by qname, so every template lands in exactly one group.
/// Templates a matcher did not mention go to the fallback group of the mode.
pub fn assemble(
    records: Vec<Vec<RawReadRecord>>,
    regions: &[Region],
    references: &[Option<&str>],
    mode: &GroupMode,
    matchers: Matchers<'_>,
) -> Result<Assembly> {
    let (labels, assignment, allele_stats) = match mode {
        GroupMode::Default => {
            let labels = vec![(DEFAULT_GROUP.to_string(), None)];
            (labels, HashMap::new(), None)
        }
        GroupMode::Variant {
            variant,
            allele_sequences,
        } => {
            if regions.len() != 1 {
                return Err(TrackError::InvalidRequest(format!(
                    "variant classification needs exactly one region, got {}",
                    regions.len()
                )));
            }
            let matcher = matchers.variant.ok_or_else(|| {
                TrackError::InvalidRequest("no variant matcher configured".to_string())
            })?;
            let query = VariantQuery {
                variant,
                region: &regions[0],
                reference: references.first().copied().flatten(),
                allele_sequences,
                reads: records.iter().flatten().map(|r| r.line.as_str()).collect(),
            };
            let partition = matcher.classify(&query)?;
            let mut named: Vec<(String, Vec<String>)> = partition.groups.into_iter().collect();
            if !named.iter().any(|(label, _)| label == SUPPORT_NONE) {
                named.push((SUPPORT_NONE.to_string(), Vec::new()));
            }
            named.sort_by(|(a, _), (b, _)| {
                variant_rank(a).cmp(&variant_rank(b)).then_with(|| a.cmp(b))
            });
            let (labels, assignment) =
                index_partition(named, |label| variant_subject(label, variant));
            (labels, assignment, partition.allele_stats)
        }
        GroupMode::Structural(event) => {
            if regions.len() != 2 {
                return Err(TrackError::InvalidRequest(format!(
                    "structural event classification needs exactly two regions, got {}",
                    regions.len()
                )));
            }
            let matcher = matchers.structural.ok_or_else(|| {
                TrackError::InvalidRequest("no structural matcher configured".to_string())
            })?;
            let query = StructuralQuery {
                event,
                regions: regions
                    .iter()
                    .enumerate()
                    .map(|(i, region)| StructuralRegionReads {
                        region,
                        reference: references.get(i).copied().flatten(),
                        reads: records
                            .get(i)
                            .map(|rs| rs.iter().map(|r| r.line.as_str()).collect())
                            .unwrap_or_default(),
                    })
                    .collect(),
            };
            let partition = matcher.classify(&query)?;
            let named = vec![
                (SUPPORT_EVENT.to_string(), partition.multi),
                (SUPPORT_REF.to_string(), partition.single),
            ];
            let (labels, assignment) = index_partition(named, |label| {
                if label == SUPPORT_EVENT {
                    "the structural event".to_string()
                } else {
                    "reference".to_string()
                }
            });
            (labels, assignment, None)
        }
    };

    // The last label is the fallback: supportNone, supportRef or the default group.
    let fallback = labels.len() - 1;
    let fallback = match mode {
        GroupMode::Variant { .. } => {
            labels.iter().position(|(l, _)| l == SUPPORT_NONE).unwrap_or(fallback)
        }
        GroupMode::Structural(_) => {
            labels.iter().position(|(l, _)| l == SUPPORT_REF).unwrap_or(fallback)
        }
        GroupMode::Default => 0,
    };

    let mut groups: Vec<RecordGroup> = labels
        .into_iter()
        .map(|(label, subject)| RecordGroup {
            label,
            subject,
            records: Vec::new(),
        })
        .collect();
    for (region_index, region_records) in records.into_iter().enumerate() {
        for record in region_records {
            let idx = assignment.get(&record.qname).copied().unwrap_or(fallback);
            groups[idx].records.push((region_index, record));
        }
    }
    groups.retain(|g| !g.records.is_empty());
    info!(groups = groups.len(), "assembled read groups");

    Ok(Assembly { groups, allele_stats })
}

type Labels = Vec<(String, Option<String>)>;

/// Number the labels in order and map every qname to its first label.
fn index_partition(
    named: Vec<(String, Vec<String>)>,
    subject: impl Fn(&str) -> String,
) -> (Labels, HashMap<String, usize>) {
    let mut labels = Vec::with_capacity(named.len());
    let mut assignment = HashMap::new();
    for (idx, (label, qnames)) in named.into_iter().enumerate() {
        for qname in qnames {
            assignment.entry(qname).or_insert(idx);
        }
        let subject = subject(&label);
        labels.push((label, Some(subject)));
    }
    (labels, assignment)
}

/// Presentation order: reference, alternates by index, ambiguous, none.
fn variant_rank(label: &str) -> u64 {
    match label {
        SUPPORT_REF => 0,
        SUPPORT_AMBIGUOUS => u64::MAX - 1,
        SUPPORT_NONE => u64::MAX,
        other => match other.strip_prefix(SUPPORT_ALT_PREFIX).and_then(|n| n.parse::<u64>().ok()) {
            Some(n) => n.saturating_add(1),
            None => u64::MAX - 2,
        },
    }
}

fn variant_subject(label: &str, variant: &Variant) -> String {
    match label {
        SUPPORT_REF => "reference allele".to_string(),
        SUPPORT_AMBIGUOUS => "ambiguous alleles".to_string(),
        SUPPORT_NONE => "neither allele".to_string(),
        other => match other
            .strip_prefix(SUPPORT_ALT_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
        {
            Some(n) => match variant.alts.get(n) {
                Some(alt) => format!("alternative allele {alt}"),
                None => format!("alternative allele {}", n + 1),
            },
            None => other.to_string(),
        },
    }
}

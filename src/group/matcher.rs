//! External read classifiers that split templates into support groups.
//!
//! Both matchers are separate programs. They receive one JSON document on stdin
//! and answer with tab-tagged lines on stdout.

use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrackError};
use crate::region::Region;

/// A single-nucleotide or indel variant, 0-based position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    pub pos: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub alts: Vec<String>,
}

/// One end of a structural event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakend {
    pub chrom: String,
    pub pos: u64,
    #[serde(default)]
    pub forward: bool,
}

/// A fusion or other rearrangement joining two regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralEvent {
    pub left: Breakend,
    pub right: Breakend,
}

/// What the variant matcher gets to see.
#[derive(Debug, Serialize)]
pub struct VariantQuery<'a> {
    pub variant: &'a Variant,
    pub region: &'a Region,
    /// Reference bases of `region`, when available.
    pub reference: Option<&'a str>,
    /// Allele sequences from an earlier classification of the same variant.
    pub allele_sequences: &'a [String],
    /// Raw SAM lines.
    pub reads: Vec<&'a str>,
}

/// Reads and reference of one side of a structural event.
#[derive(Debug, Serialize)]
pub struct StructuralRegionReads<'a> {
    pub region: &'a Region,
    pub reference: Option<&'a str>,
    pub reads: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct StructuralQuery<'a> {
    pub event: &'a StructuralEvent,
    pub regions: Vec<StructuralRegionReads<'a>>,
}

/// Variant matcher answer: qnames per support label plus opaque allele statistics.
#[derive(Debug, Clone, Default)]
pub struct VariantPartition {
    pub groups: HashMap<String, Vec<String>>,
    pub allele_stats: Option<serde_json::Value>,
}

/// Structural matcher answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralPartition {
    /// Templates spanning both regions.
    pub multi: Vec<String>,
    /// Templates confined to one region.
    pub single: Vec<String>,
}

pub trait VariantMatcher {
    fn classify(&self, query: &VariantQuery<'_>) -> Result<VariantPartition>;
}

pub trait StructuralMatcher {
    fn classify(&self, query: &StructuralQuery<'_>) -> Result<StructuralPartition>;
}

fn matcher_error(what: &str, detail: impl std::fmt::Display) -> TrackError {
    TrackError::MatcherFailed(format!("{what}: {detail}"))
}

/// Run `program args..`, feed `input` on stdin and return stdout.
fn run_matcher(program: &str, args: &[String], input: Vec<u8>) -> Result<String> {
    debug!(program, bytes = input.len(), "running matcher");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| matcher_error(program, e))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| matcher_error(program, "stdin unavailable"))?;
    // Write from a separate thread; the matcher may start answering before it
    // has read everything.
    let writer = std::thread::spawn(move || stdin.write_all(&input));
    let output = child.wait_with_output().map_err(|e| matcher_error(program, e))?;
    let written = writer.join();
    if !output.status.success() {
        return Err(matcher_error(
            program,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    match written {
        Ok(Ok(())) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Ok(Err(e)) => Err(matcher_error(program, e)),
        Err(_) => Err(matcher_error(program, "stdin writer panicked")),
    }
}

/// Parse `partition\t{...}` and `alleles\t...` lines.
pub fn parse_variant_output(text: &str) -> Result<VariantPartition> {
    let mut groups = None;
    let mut allele_stats = None;
    for line in text.lines() {
        let Some((tag, body)) = line.split_once('\t') else { continue };
        match tag {
            "partition" => {
                groups = Some(
                    serde_json::from_str(body).map_err(|e| matcher_error("partition line", e))?,
                );
            }
            "alleles" => {
                allele_stats = Some(
                    serde_json::from_str(body).map_err(|e| matcher_error("alleles line", e))?,
                );
            }
            _ => {}
        }
    }
    let groups = groups.ok_or_else(|| matcher_error("variant matcher", "no partition line"))?;
    Ok(VariantPartition { groups, allele_stats })
}

/// Parse `multi\t[...]` and `single\t[...]` lines.
pub fn parse_structural_output(text: &str) -> Result<StructuralPartition> {
    let mut multi = None;
    let mut single = None;
    for line in text.lines() {
        let Some((tag, body)) = line.split_once('\t') else { continue };
        let slot = match tag {
            "multi" => &mut multi,
            "single" => &mut single,
            _ => continue,
        };
        *slot = Some(
            serde_json::from_str::<Vec<String>>(body).map_err(|e| matcher_error(tag, e))?,
        );
    }
    match (multi, single) {
        (Some(multi), Some(single)) => Ok(StructuralPartition { multi, single }),
        _ => Err(matcher_error("structural matcher", "expected both multi and single lines")),
    }
}

/// Variant matcher run as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandVariantMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandVariantMatcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl VariantMatcher for CommandVariantMatcher {
    fn classify(&self, query: &VariantQuery<'_>) -> Result<VariantPartition> {
        let input = serde_json::to_vec(query).map_err(|e| matcher_error("variant query", e))?;
        parse_variant_output(&run_matcher(&self.program, &self.args, input)?)
    }
}

/// Structural event matcher run as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandStructuralMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandStructuralMatcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl StructuralMatcher for CommandStructuralMatcher {
    fn classify(&self, query: &StructuralQuery<'_>) -> Result<StructuralPartition> {
        let input = serde_json::to_vec(query).map_err(|e| matcher_error("structural query", e))?;
        parse_structural_output(&run_matcher(&self.program, &self.args, input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variant_output() {
        let text = "log line\n\
partition\t{\"supportRef\":[\"a\",\"b\"],\"supportAlt0\":[\"c\"]}\n\
alleles\t[{\"allele\":\"A\",\"f\":1,\"r\":2}]\n";
        let out = parse_variant_output(text).unwrap();
        assert_eq!(out.groups["supportRef"], vec!["a", "b"]);
        assert_eq!(out.groups["supportAlt0"], vec!["c"]);
        assert_eq!(out.allele_stats.unwrap()[0]["r"], 2);
    }

    #[test]
    fn test_variant_output_requires_partition() {
        let err = parse_variant_output("alleles\t[]\n").unwrap_err();
        assert!(matches!(err, TrackError::MatcherFailed(_)));
        assert!(parse_variant_output("partition\tnot json\n").is_err());
    }

    #[test]
    fn test_parse_structural_output() {
        let out = parse_structural_output("multi\t[\"x\"]\nsingle\t[\"y\",\"z\"]\n").unwrap();
        assert_eq!(out.multi, vec!["x"]);
        assert_eq!(out.single, vec!["y", "z"]);
        assert!(parse_structural_output("multi\t[]\n").is_err());
    }

    #[test]
    fn test_variant_json_field_names() {
        let v: Variant =
            serde_json::from_str(r#"{"chrom":"chr1","pos":100,"ref":"A","alts":["G"]}"#).unwrap();
        assert_eq!(v.reference, "A");
        assert_eq!(serde_json::to_value(&v).unwrap()["ref"], "A");
    }

    #[test]
    fn test_command_matcher_round_trip() {
        // drain the query, then answer with fixed tags
        let script = "cat > /dev/null; printf 'multi\\t[\"q1\"]\\nsingle\\t[]\\n'".to_string();
        let matcher = CommandStructuralMatcher::new("sh", vec!["-c".to_string(), script]);
        let event = StructuralEvent {
            left: Breakend {
                chrom: "chr1".into(),
                pos: 10,
                forward: true,
            },
            right: Breakend {
                chrom: "chr2".into(),
                pos: 20,
                forward: false,
            },
        };
        let query = StructuralQuery {
            event: &event,
            regions: vec![],
        };
        let out = matcher.classify(&query).unwrap();
        assert_eq!(out.multi, vec!["q1"]);
        assert!(out.single.is_empty());
    }

    #[test]
    fn test_command_matcher_failure() {
        let script = "echo boom >&2; exit 3".to_string();
        let matcher = CommandVariantMatcher::new("sh", vec!["-c".to_string(), script]);
        let variant = Variant {
            chrom: "chr1".into(),
            pos: 5,
            reference: "A".into(),
            alts: vec!["T".into()],
        };
        let region = Region::new("chr1", 0, 10, 10).unwrap();
        let query = VariantQuery {
            variant: &variant,
            region: &region,
            reference: None,
            allele_sequences: &[],
            reads: vec![],
        };
        match matcher.classify(&query) {
            Err(TrackError::MatcherFailed(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }
}

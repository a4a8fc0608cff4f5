use crate::alignment::flags::ReadFlags;
use crate::error::TrackError;

/// Number of mandatory SAM columns.
const SAM_FIELDS: usize = 11;

/// One SAM text record as emitted by the alignment source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReadRecord {
    pub qname: String,
    pub flags: ReadFlags,
    pub rname: String,
    /// 1-based leftmost mapping position.
    pub pos: u64,
    pub mapq: u8,
    pub cigar: String,
    pub rnext: String,
    pub pnext: u64,
    pub tlen: i64,
    pub seq: String,
    /// Phred+33 quality string, empty when the record has `*`.
    pub qual: Vec<u8>,
    /// The unparsed line, kept for external matchers.
    pub line: String,
}

impl RawReadRecord {
    pub fn parse(line: &str) -> Result<Self, TrackError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < SAM_FIELDS {
            return Err(TrackError::MalformedRecord(format!(
                "expected at least {SAM_FIELDS} fields, got {}",
                fields.len()
            )));
        }
        let qname = fields[0].to_string();
        let flag: u16 = parse_field(fields[1], "FLAG", &qname)?;
        let pos: i64 = parse_field(fields[3], "POS", &qname)?;
        if pos <= 0 {
            return Err(TrackError::MalformedRecord(format!(
                "{qname}: non-positive start {pos}"
            )));
        }
        let mapq: u8 = parse_field(fields[4], "MAPQ", &qname)?;
        let pnext: u64 = parse_field(fields[7], "PNEXT", &qname)?;
        let tlen: i64 = parse_field(fields[8], "TLEN", &qname)?;
        let qual = match fields[10] {
            "*" => Vec::new(),
            q => q.bytes().map(|b| b.saturating_sub(33)).collect(),
        };
        let seq = match fields[9] {
            "*" => String::new(),
            s => s.to_string(),
        };

        Ok(Self {
            qname,
            flags: ReadFlags::from_bits(flag),
            rname: fields[2].to_string(),
            pos: pos as u64,
            mapq,
            cigar: fields[5].to_string(),
            rnext: fields[6].to_string(),
            pnext,
            tlen,
            seq,
            qual,
            line: line.to_string(),
        })
    }

    /// 0-based alignment start.
    pub fn start(&self) -> u64 {
        self.pos - 1
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, name: &str, qname: &str) -> Result<T, TrackError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| TrackError::MalformedRecord(format!("{qname}: bad {name} '{value}': {e}")))
}

pub mod cigar;
pub mod flags;
pub mod mismatch;
pub mod record;

pub use cigar::{
    parse_cigar, parse_segment, AlignBox, BoxOp, CigarOp, MatePosition, Segment, SegmentOptions,
    SegmentOutcome,
};
pub use flags::{ReadClass, ReadFlags};
pub use mismatch::{annotate_region, annotate_segment, RegionReference};
pub use record::RawReadRecord;

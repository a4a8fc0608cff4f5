use noodles::sam::alignment::record::Flags;
use serde::{Serialize, Serializer};

/// SAM flag bitfield with the predicates the track layout cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFlags(Flags);

impl ReadFlags {
    pub fn from_bits(bits: u16) -> Self {
        Self(Flags::from(bits))
    }

    pub fn bits(&self) -> u16 {
        self.0.bits()
    }

    pub fn is_paired(&self) -> bool {
        self.0.is_segmented()
    }

    pub fn is_proper_pair(&self) -> bool {
        self.0.is_properly_segmented()
    }

    pub fn is_unmapped(&self) -> bool {
        self.0.is_unmapped()
    }

    pub fn mate_unmapped(&self) -> bool {
        self.0.is_mate_unmapped()
    }

    pub fn is_reverse(&self) -> bool {
        self.0.is_reverse_complemented()
    }

    pub fn mate_reverse(&self) -> bool {
        self.0.is_mate_reverse_complemented()
    }

    pub fn is_duplicate(&self) -> bool {
        self.0.is_duplicate()
    }

    pub fn is_supplementary(&self) -> bool {
        self.0.is_supplementary()
    }
}

impl Serialize for ReadFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

/// Discordance markers derived from the flag bits, RNEXT and the view chromosome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadClass {
    pub mate_unmapped: bool,
    pub mate_on_other_chr: bool,
    pub wrong_orientation: bool,
    pub wrong_insert_size: bool,
}

impl ReadClass {
    /// Classify one record. Single-end records are never discordant.
    pub fn classify(flags: ReadFlags, rnext: &str, view_chrom: &str) -> Self {
        let mut class = ReadClass::default();
        if !flags.is_paired() {
            return class;
        }
        if flags.mate_unmapped() {
            class.mate_unmapped = true;
        } else if rnext != "=" && rnext != "*" && rnext != view_chrom {
            class.mate_on_other_chr = true;
        } else if flags.is_reverse() == flags.mate_reverse() {
            class.wrong_orientation = true;
        } else if !flags.is_proper_pair() {
            class.wrong_insert_size = true;
        }
        class
    }

    pub fn is_discordant(&self) -> bool {
        self.mate_unmapped
            || self.mate_on_other_chr
            || self.wrong_orientation
            || self.wrong_insert_size
    }
}

use serde::Serialize;

/// Records kept per downsampling cycle.
pub const KEEP_PER_CYCLE: u64 = 10;

/// Deterministic keep/skip throttle.
///
/// Within every cycle of `keep + skip` admitted records, the first `keep` pass
/// and the remaining `skip` are dropped, so identical input always yields
/// identical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownsamplePolicy {
    pub keep: u64,
    pub skip: u64,
    #[serde(skip)]
    pointer: u64,
}

impl DownsamplePolicy {
    pub fn new(keep: u64, skip: u64) -> Option<Self> {
        (keep + skip > 0).then_some(Self { keep, skip, pointer: 0 })
    }

    /// Build a policy from the pre-scan read count, or `None` when `total`
    /// stays under 110% of `ceiling`.
    pub fn from_counts(total: u64, ceiling: u64) -> Option<Self> {
        let ceiling_f = ceiling as f64;
        if ceiling == 0 || (total as f64) < ceiling_f * 1.1 {
            return None;
        }
        let unit = (total - ceiling) as f64 / (ceiling_f * 0.1);
        Self::new(KEEP_PER_CYCLE, unit.floor() as u64)
    }

    /// Decide whether the next record is kept.
    pub fn admit(&mut self) -> bool {
        let slot = self.pointer;
        self.pointer += 1;
        if self.pointer >= self.keep + self.skip {
            self.pointer = 0;
        }
        slot < self.keep
    }

    /// Expected number of records kept out of `total`.
    pub fn expected_kept(&self, total: u64) -> u64 {
        let cycle = self.keep + self.skip;
        let full = total / cycle;
        let rest = total % cycle;
        full * self.keep + rest.min(self.keep)
    }
}

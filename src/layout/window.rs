use std::fmt;
use std::str::FromStr;

use crate::error::TrackError;
use crate::group::Group;

/// Inclusive range of stack rows requested by a paginating caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub start: usize,
    pub stop: usize,
}

impl RowWindow {
    pub fn new(start: usize, stop: usize) -> Result<Self, TrackError> {
        if start > stop {
            return Err(TrackError::InvalidRequest(format!(
                "row window start ({start}) is after stop ({stop})"
            )));
        }
        Ok(Self { start, stop })
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.start && row <= self.stop
    }
}

impl FromStr for RowWindow {
    type Err = TrackError;

    /// Parses `start-stop`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop) = s.split_once('-').ok_or_else(|| {
            TrackError::InvalidRequest(format!("expected 'start-stop', got '{s}'"))
        })?;
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| TrackError::InvalidRequest(format!("invalid row '{v}': {e}")))
        };
        Self::new(parse(start)?, parse(stop)?)
    }
}

impl fmt::Display for RowWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.stop)
    }
}

/// Keep only rows inside `window`, renumbered from zero.
///
/// The group no longer offers partial stacking afterwards, even when it has no
/// rows at all.
pub fn apply_window(group: &mut Group, window: RowWindow) {
    group.templates.retain(|t| window.contains(t.row));
    for t in &mut group.templates {
        t.row -= window.start;
    }
    group.rows = if window.start < group.rows.len() {
        let end = window.stop.saturating_add(1).min(group.rows.len());
        group.rows[window.start..end].to_vec()
    } else {
        Vec::new()
    };
    group.allow_partial_stack = false;
}

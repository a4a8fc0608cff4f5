use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Horizontal gap in pixels between adjacent regions of a multi-region view.
pub const REGION_GAP_PX: f64 = 10.0;

/// A requested view window, `chr:start-stop` with 0-based half-open coordinates,
/// rendered into `width` pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionRequest {
    pub chrom: String,
    pub start: u64,
    pub stop: u64,
    pub width: u32,
}

impl RegionRequest {
    pub fn new(chrom: impl Into<String>, start: u64, stop: u64, width: u32) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            stop,
            width,
        }
    }

    /// Parse `chr:start-stop` and attach a pixel width.
    pub fn parse_with_width(s: &str, width: u32) -> Result<Self, TrackError> {
        let malformed =
            || TrackError::InvalidRegion(format!("expected 'chr:start-stop', got '{s}'"));
        let (chrom, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (start_str, stop_str) = rest.split_once('-').ok_or_else(malformed)?;
        let start: u64 = parse_coordinate(start_str)?;
        let stop: u64 = parse_coordinate(stop_str)?;
        Ok(Self::new(chrom, start, stop, width))
    }
}

fn parse_coordinate(s: &str) -> Result<u64, TrackError> {
    s.trim()
        .replace(',', "")
        .parse()
        .map_err(|e| TrackError::InvalidRegion(format!("invalid coordinate '{s}': {e}")))
}

impl fmt::Display for RegionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.stop)
    }
}

/// A resolved view window with its linear bp -> pixel mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub stop: u64,
    pub width: u32,
    /// Left edge of this region on the shared canvas.
    pub x: f64,
    /// Pixels per base.
    pub ntwidth: f64,
    /// Per-group rendering flag: individual bases are wide enough to print letters.
    pub to_print_nt: bool,
    /// Per-group rendering flag: base qualities are rendered.
    pub to_show_qual: bool,
}

impl Region {
    pub fn new(
        chrom: impl Into<String>,
        start: u64,
        stop: u64,
        width: u32,
    ) -> Result<Self, TrackError> {
        let chrom = chrom.into();
        if chrom.is_empty() {
            return Err(TrackError::InvalidRegion("empty chromosome name".to_string()));
        }
        if start >= stop {
            return Err(TrackError::InvalidRegion(format!(
                "start ({start}) must be less than stop ({stop})"
            )));
        }
        if width == 0 {
            return Err(TrackError::InvalidRegion(format!(
                "{chrom}:{start}-{stop} has zero pixel width"
            )));
        }
        let ntwidth = width as f64 / (stop - start) as f64;
        Ok(Self {
            chrom,
            start,
            stop,
            width,
            x: 0.0,
            ntwidth,
            to_print_nt: false,
            to_show_qual: false,
        })
    }

    /// Length of the region in bases.
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canvas x coordinate of a 0-based reference position.
    pub fn scale(&self, pos: f64) -> f64 {
        self.x + (pos - self.start as f64) * self.ntwidth
    }

    /// Canvas x coordinate of the region's right edge.
    pub fn right_edge(&self) -> f64 {
        self.x + self.width as f64
    }

    /// Whether `pos` lies inside the half-open window.
    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos < self.stop
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.stop)
    }
}

impl FromStr for RegionRequest {
    type Err = TrackError;

    /// Parses `chr:start-stop`; the pixel width defaults to the region length.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut req = Self::parse_with_width(s, 0)?;
        req.width = req.stop.saturating_sub(req.start).min(u32::MAX as u64) as u32;
        Ok(req)
    }
}

/// All regions of one request, laid out left to right.
#[derive(Debug, Clone)]
pub struct RegionSet {
    pub regions: Vec<Region>,
    pub max_ntwidth: f64,
}

impl RegionSet {
    /// Validate the requested intervals and compute their canvas placement.
    pub fn resolve(requests: &[RegionRequest]) -> Result<Self, TrackError> {
        if requests.is_empty() {
            return Err(TrackError::InvalidRegion("no regions requested".to_string()));
        }
        let mut regions = Vec::with_capacity(requests.len());
        let mut x = 0.0;
        for req in requests {
            let mut region = Region::new(req.chrom.clone(), req.start, req.stop, req.width)?;
            region.x = x;
            x += region.width as f64 + REGION_GAP_PX;
            regions.push(region);
        }
        let max_ntwidth = regions.iter().map(|r| r.ntwidth).fold(0.0, f64::max);
        Ok(Self { regions, max_ntwidth })
    }

    /// Minimum horizontal gap between two templates in the same row.
    pub fn read_spacing(&self) -> f64 {
        f64::max(2.0, 5.0 * self.max_ntwidth)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

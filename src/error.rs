use thiserror::Error;

/// Errors produced while building a read track.
///
/// `MalformedRecord` is recovered locally by the ingest loop. `SourceTruncated`
/// is only raised when the request refuses partial tracks; otherwise the
/// layout is flagged `truncated`. The other variants abort the request.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("alignment source file is truncated")]
    SourceTruncated,
    #[error("alignment source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("no reads in range")]
    NoReadsInRange,
    #[error("group not found: {0}")]
    GroupNotFound(String),
    #[error("matcher failed: {0}")]
    MatcherFailed(String),
    #[error("request cancelled")]
    Cancelled,
}

impl TrackError {
    /// Whether this condition should be shown to the user as an empty result
    /// instead of being reported as a failure.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, TrackError::NoReadsInRange)
    }
}

impl From<std::io::Error> for TrackError {
    fn from(err: std::io::Error) -> Self {
        TrackError::SourceUnavailable(err.to_string())
    }
}

pub type Result<T, E = TrackError> = std::result::Result<T, E>;

use crate::models::FailureReason;
use thiserror::Error;

/// Run-level errors that end a command.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Missing or unusable reference data; raised before any network activity.
    #[error("setup failed: {0}")]
    Setup(String),

    /// One or more workers died. State merged so far is already on disk.
    #[error("{count} worker(s) aborted, first error: {first}")]
    PoolFatal { count: usize, first: String },
}

/// Outcome of a single page extraction that did not yield data.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("freshest row is {found}, expected {expected}")]
    NotExpectedDate { expected: String, found: String },

    #[error("target date {date} not yet populated (values mostly zero)")]
    DataZero { date: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),

    /// The session itself is unusable; the worker holding it must stop.
    #[error("session lost: {0}")]
    Fatal(String),
}

impl ExtractError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ExtractError::NotExpectedDate { .. } => FailureReason::NotExpectedDate,
            ExtractError::DataZero { .. } => FailureReason::DataZero,
            ExtractError::NotFound(_) => FailureReason::NotFound,
            ExtractError::Timeout(_) => FailureReason::Timeout,
            ExtractError::Parse(_) => FailureReason::ParseError,
            ExtractError::Other(_) | ExtractError::Fatal(_) => FailureReason::Other,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractError::Fatal(_))
    }
}

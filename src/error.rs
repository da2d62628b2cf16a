// =============================================================================
// Recorder Errors: classification for parsing and persistence failures
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    /// The payload carried an `e` field this recorder does not handle (or no
    /// `e` at all, e.g. a subscription acknowledgement).
    #[error("unknown event type: {0:?}")]
    UnknownEventType(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// Admitting the trade would overflow the window's running sums.
    #[error("decimal overflow admitting trade at {timestamp}")]
    Overflow { timestamp: i64 },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

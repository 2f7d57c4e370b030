// Structured errors surfaced to callers of the detection and resolution APIs.
// Nothing here is ever swallowed: the presentation layer decides what to show.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    /// Underlying records (or the pair itself) changed since the pair was generated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced record or candidate pair does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Detection configuration is unusable. Raised before any comparison happens.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Decision not allowed from the pair's current status.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for DedupError {
    fn from(err: rusqlite::Error) -> Self {
        DedupError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DedupError {
    fn from(err: serde_json::Error) -> Self {
        DedupError::Storage(format!("serialization: {}", err))
    }
}

pub type DedupResult<T> = std::result::Result<T, DedupError>;

impl DedupError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DedupError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DedupError::NotFound(_))
    }
}

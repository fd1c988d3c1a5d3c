//! Error types for showdl core

use showdl_types::EntryId;
use thiserror::Error;

/// Errors reported by a track transfer engine implementation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transfer entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("Transfer engine unavailable: {0}")]
    Unavailable(String),

    #[error("Transfer engine error: {0}")]
    Backend(String),
}

/// Errors that can occur in showdl core
#[derive(Debug, Error)]
pub enum ShowDownloadError {
    #[error("Show {show_id} already has recording {existing}; switching to {requested} needs confirmation")]
    RecordingConflict {
        show_id: String,
        existing: String,
        requested: String,
    },

    #[error("No recording available for show {0}")]
    NoRecordingAvailable(String),

    #[error("Storage error for show {show_id}: {source}")]
    StorageIo {
        show_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Recording resolver error: {0}")]
    Resolver(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl ShowDownloadError {
    /// The user must confirm a recording switch before retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, ShowDownloadError::RecordingConflict { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ShowDownloadError::StorageIo { .. }
            | ShowDownloadError::Io(_)
            | ShowDownloadError::Database(_) => true,
            ShowDownloadError::Engine(EngineError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

// Allow converting to String for UI bindings
impl From<ShowDownloadError> for String {
    fn from(error: ShowDownloadError) -> Self {
        error.to_string()
    }
}

//! Error types for audit journals.

use thiserror::Error;

/// Errors emitted by audit journals.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Reading or writing the journal file failed.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// A record could not be encoded or a journal line could not be decoded.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

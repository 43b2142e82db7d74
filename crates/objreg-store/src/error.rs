use std::path::PathBuf;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log entry could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The log is damaged in a way recovery cannot skip over.
    #[error("corrupt log {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// The global sequence counter cannot advance any further.
    #[error("sequence space exhausted")]
    SequenceExhausted,

    /// A lock guarding repository state was poisoned by a panicking writer.
    #[error("repository lock poisoned")]
    LockPoisoned,
}

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

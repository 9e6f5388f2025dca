//! Error types for the analysis pipeline

use thiserror::Error;

/// Pipeline-level error types, raised while loading or driving a session.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Buffer not found: {name}")]
    BufferNotFound { name: String },

    #[error("Buffer name '{name}' is already in use")]
    DuplicateBuffer { name: String },

    #[error("Invalid module '{module}': {message}")]
    InvalidModule { module: String, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error types for a single data buffer.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("initial contents of '{name}' ({len} values) exceed its capacity of {capacity}")]
    InitialContentsTooLarge {
        name: String,
        len: usize,
        capacity: usize,
    },
    #[error("'{operation}' is not supported on {storage} buffer '{name}'")]
    UnsupportedOperation {
        name: String,
        operation: &'static str,
        storage: &'static str,
    },
    #[error("state file holds {len} bytes, not a whole number of samples")]
    CorruptState { len: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

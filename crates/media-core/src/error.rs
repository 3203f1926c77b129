use std::io;
use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for media operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// No zero, one or two stage transcoder path between two formats
    #[error("No transcoder path from {input} to {output}")]
    NoTranscoderPath {
        /// Source format name
        input: String,
        /// Destination format name
        output: String,
    },

    /// A stream refused the frame size negotiated for its codec chain
    #[error("Stream {stream} refused data size {size}")]
    FrameSizeRejected {
        /// Stream identifier
        stream: String,
        /// The refused size in bytes
        size: usize,
    },

    /// A stream is already attached to a patch
    #[error("Stream is already patched: {0}")]
    AlreadyPatched(String),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

use thiserror::Error;

/// Error types for frame operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A buffer was too small for the requested operation
    #[error("Buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// A payload type value outside the 7-bit RTP range
    #[error("Invalid payload type: {0}")]
    InvalidPayloadType(u8),

    /// Malformed format description
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

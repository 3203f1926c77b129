//! # Frame Core library for the softbridge project
//!
//! This crate provides the media format descriptions and the in-memory
//! frame representation shared by the softbridge media crates.
//!
//! The library is organized into several modules:
//!
//! - `format`: media format descriptions and payload type mapping
//! - `frame`: the RTP-shaped media frame passed through patches
//!
//! Formats are immutable values compared by name; frames carry an
//! RTP-style header (payload type, sequence number, timestamp, marker,
//! SSRC) and a payload delimited inside a larger allocated buffer.

mod error;

// Main modules
pub mod format;
pub mod frame;

// Re-export core types
pub use error::Error;

pub use format::{FormatFlags, MediaFormat, MediaKind, PayloadMap, PayloadType};
pub use frame::{FrameHeader, MediaFrame};

/// The default maximum size for media frames in bytes
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1500;

/// Typedef for media timestamp values
pub type Timestamp = u32;

/// Typedef for frame sequence numbers
pub type SequenceNumber = u16;

/// Typedef for synchronization source identifiers
pub type Ssrc = u32;

/// Result type for frame operations
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Error, FormatFlags, FrameHeader, MediaFormat, MediaFrame, MediaKind, PayloadMap,
        PayloadType, Result, SequenceNumber, Ssrc, Timestamp,
    };
}

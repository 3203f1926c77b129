//! # Media Core library for the softbridge project
//!
//! `media-core` provides the media distribution pipeline for the
//! softbridge telephony stack: once call control has negotiated a call
//! leg, a [`MediaPatch`] pulls frames from one source stream, converts
//! them through zero, one or two transcoder stages, and fans them out to
//! any number of sink streams while filters observe or mutate the flow.
//!
//! This crate provides:
//!
//! - The [`MediaStream`] contract and concrete null/queue streams
//! - The [`Transcoder`] contract and the explicit [`TranscoderRegistry`]
//! - Built-in G.711 µ-law/A-law converters bridging through linear PCM
//! - Stage-scoped frame [`filter`]s (e.g. silence detection)
//! - The [`MediaPatch`] pipeline with its dedicated dispatch thread
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use softbridge_media_core::prelude::*;
//!
//! let registry = Arc::new(TranscoderRegistry::with_defaults());
//!
//! let source: Arc<dyn MediaStream> =
//!     Arc::new(QueueStream::new("src", MediaFormat::pcmu(), 8));
//! let sink: Arc<dyn MediaStream> = Arc::new(NullStream::new("sink", MediaFormat::l16()));
//!
//! let patch = MediaPatch::new(source, registry, PatchConfig::default());
//! patch.add_sink(sink, PayloadMap::new()).unwrap();
//! patch.start();
//! // ... frames flow until the source closes or the patch is closed ...
//! patch.close();
//! ```

// Error handling
pub mod error;

// Working modules
pub mod codec;
pub mod filter;
pub mod patch;
pub mod stream;

// Re-export common types
pub use error::{Error, Result};

pub use codec::{MediaCommand, Transcoder, TranscoderRegistry};
pub use filter::{FilterHandle, SilenceDetector};
pub use patch::{MediaPatch, PatchConfig, PatchStats};
pub use stream::{MediaStream, NullStream, PatchHandle, PatchId, QueueStream};

// Re-export the frame primitives this crate is built on
pub use softbridge_frame_core::{
    FormatFlags, FrameHeader, MediaFormat, MediaFrame, MediaKind, PayloadMap, PayloadType,
};

/// Media sample type (raw linear PCM audio data)
pub type Sample = i16;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Error, FilterHandle, FormatFlags, FrameHeader, MediaCommand, MediaFormat, MediaFrame,
        MediaKind, MediaPatch, MediaStream, NullStream, PatchConfig, PatchHandle, PatchId,
        PatchStats, PayloadMap, PayloadType, QueueStream, Result, Sample, SilenceDetector,
        Transcoder, TranscoderRegistry,
    };
}

//! Media format descriptions
//!
//! This module provides the immutable format values used to describe a
//! media encoding (clock rate, frame sizing, payload type) together with
//! the payload type remapping applied on pass-through media paths.
//!
//! Formats are compared and hashed by name only: the name is the
//! identity used for transcoder lookup and capability negotiation.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

/// An RTP payload type as defined in RFC 3551 (7-bit value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType(u8);

impl PayloadType {
    /// PCMU (G.711 µ-law) - 8kHz
    pub const PCMU: PayloadType = PayloadType(0);
    /// GSM 06.10 - 8kHz
    pub const GSM: PayloadType = PayloadType(3);
    /// PCMA (G.711 A-law) - 8kHz
    pub const PCMA: PayloadType = PayloadType(8);
    /// G.722 - 8kHz RTP clock
    pub const G722: PayloadType = PayloadType(9);
    /// L16 mono
    pub const L16_MONO: PayloadType = PayloadType(11);
    /// Comfort noise (RFC 3389)
    pub const COMFORT_NOISE: PayloadType = PayloadType(13);
    /// G.729 - 8kHz
    pub const G729: PayloadType = PayloadType(18);

    /// Create a payload type, validating the 7-bit range
    pub fn new(value: u8) -> Result<Self> {
        if value > 127 {
            return Err(Error::InvalidPayloadType(value));
        }
        Ok(PayloadType(value))
    }

    /// Create a payload type from the low 7 bits of a raw value
    pub fn from_raw(value: u8) -> Self {
        PayloadType(value & 0x7F)
    }

    /// Get the raw payload type value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Check whether this is a dynamic payload type (96-127)
    pub fn is_dynamic(&self) -> bool {
        (96..=127).contains(&self.0)
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of media a format describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio media
    Audio,
    /// Video media
    Video,
}

/// Feature flags carried by a media format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFlags {
    /// Streams of this format want a jitter buffer on the receive side
    pub needs_jitter: bool,
    /// Comfort noise frames are meaningful for this format
    pub comfort_noise_ok: bool,
    /// Empty payloads are meaningful for this format (e.g. DTX)
    pub empty_payload_ok: bool,
}

impl Default for FormatFlags {
    fn default() -> Self {
        Self {
            needs_jitter: false,
            comfort_noise_ok: false,
            empty_payload_ok: false,
        }
    }
}

/// Description of a media encoding
///
/// A `MediaFormat` is an immutable value: identity, clock rate, default
/// frame sizing and payload type. Two formats are equal when their names
/// are equal; all other fields are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    name: String,
    media_kind: MediaKind,
    payload_type: PayloadType,
    clock_rate: u32,
    frame_time: u32,
    frame_size: usize,
    flags: FormatFlags,
}

impl MediaFormat {
    /// Create a new media format description
    pub fn new(
        name: impl Into<String>,
        media_kind: MediaKind,
        payload_type: PayloadType,
        clock_rate: u32,
        frame_time: u32,
        frame_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            media_kind,
            payload_type,
            clock_rate,
            frame_time,
            frame_size,
            flags: FormatFlags {
                needs_jitter: media_kind == MediaKind::Audio,
                ..Default::default()
            },
        }
    }

    /// G.711 µ-law, 8kHz, 20ms frames
    pub fn pcmu() -> Self {
        Self::new("PCMU", MediaKind::Audio, PayloadType::PCMU, 8000, 160, 160)
    }

    /// G.711 A-law, 8kHz, 20ms frames
    pub fn pcma() -> Self {
        Self::new("PCMA", MediaKind::Audio, PayloadType::PCMA, 8000, 160, 160)
    }

    /// Linear 16-bit PCM, 8kHz mono, 20ms frames
    ///
    /// This is the bridging format two-stage transcoder chains meet at.
    pub fn l16() -> Self {
        Self::new("L16", MediaKind::Audio, PayloadType::L16_MONO, 8000, 160, 320)
    }

    /// GSM 06.10 full rate, 8kHz, 20ms frames of 33 bytes
    pub fn gsm0610() -> Self {
        Self::new("GSM-06.10", MediaKind::Audio, PayloadType::GSM, 8000, 160, 33)
    }

    /// Replace the payload type (for dynamically negotiated mappings)
    pub fn with_payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = payload_type;
        self
    }

    /// Replace the format flags
    pub fn with_flags(mut self, flags: FormatFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Get the format name (the identity used for transcoder lookup)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the media kind
    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    /// Get the payload type
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Get the clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Get the timestamp units per frame
    pub fn frame_time(&self) -> u32 {
        self.frame_time
    }

    /// Get the bytes per frame (0 for unframed or variable-size formats)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Check whether this format has a fixed frame size
    pub fn is_framed(&self) -> bool {
        self.frame_size != 0
    }

    /// Get the format flags
    pub fn flags(&self) -> FormatFlags {
        self.flags
    }
}

impl PartialEq for MediaFormat {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MediaFormat {}

impl Hash for MediaFormat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Inbound to outbound payload type remapping
///
/// Applied only on pass-through media paths; transcoded paths take the
/// payload type of the producing codec stage instead. An empty map is
/// the identity.
#[derive(Debug, Clone, Default)]
pub struct PayloadMap {
    map: HashMap<PayloadType, PayloadType>,
}

impl PayloadMap {
    /// Create an empty (identity) payload map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remapping entry
    pub fn insert(&mut self, from: PayloadType, to: PayloadType) {
        self.map.insert(from, to);
    }

    /// Translate an inbound payload type to its outbound value
    pub fn translate(&self, payload_type: PayloadType) -> PayloadType {
        self.map.get(&payload_type).copied().unwrap_or(payload_type)
    }

    /// Check whether the map is the identity
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Get the number of remapping entries
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

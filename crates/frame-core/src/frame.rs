//! Media frame representation
//!
//! This module provides the in-memory frame passed between streams,
//! transcoders and filters: an RTP-shaped header plus a payload
//! delimited inside a larger allocated buffer.

use bytes::{BufMut, BytesMut};
use rand::Rng;

use crate::error::Error;
use crate::format::{MediaFormat, PayloadType};
use crate::{Result, SequenceNumber, Ssrc, Timestamp, DEFAULT_MAX_FRAME_SIZE};

/// Upper bound on a single frame payload
pub const MAX_FRAME_PAYLOAD: usize = 65535;

/// Header of a media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload type
    pub payload_type: PayloadType,
    /// Sequence number
    pub sequence_number: SequenceNumber,
    /// Timestamp in clock-rate units
    pub timestamp: Timestamp,
    /// Marker bit
    pub marker: bool,
    /// Synchronization source identifier
    pub ssrc: Ssrc,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            payload_type: PayloadType::PCMU,
            sequence_number: 0,
            timestamp: 0,
            marker: false,
            ssrc: 0,
        }
    }
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(
        payload_type: PayloadType,
        sequence_number: SequenceNumber,
        timestamp: Timestamp,
        ssrc: Ssrc,
    ) -> Self {
        Self {
            payload_type,
            sequence_number,
            timestamp,
            marker: false,
            ssrc,
        }
    }

    /// Create a header with randomized SSRC, sequence number and timestamp
    pub fn random(payload_type: PayloadType) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            payload_type,
            sequence_number: rng.gen(),
            timestamp: rng.gen(),
            marker: false,
            ssrc: rng.gen(),
        }
    }
}

/// One discrete unit of media data
///
/// The payload lives inside a larger allocated buffer; `payload_size`
/// delimits the valid bytes. Growing the payload reuses buffer capacity
/// where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// Frame header
    pub header: FrameHeader,
    buffer: BytesMut,
    payload_size: usize,
}

impl MediaFrame {
    /// Create an empty frame with the given header and buffer capacity
    pub fn new(header: FrameHeader, capacity: usize) -> Self {
        Self {
            header,
            buffer: BytesMut::with_capacity(capacity.max(DEFAULT_MAX_FRAME_SIZE)),
            payload_size: 0,
        }
    }

    /// Create a frame carrying a copy of the given payload
    pub fn with_payload(header: FrameHeader, payload: &[u8]) -> Self {
        let mut buffer = BytesMut::with_capacity(payload.len().max(DEFAULT_MAX_FRAME_SIZE));
        buffer.put_slice(payload);
        Self {
            header,
            buffer,
            payload_size: payload.len(),
        }
    }

    /// Create a zero-filled (silence) frame sized for one frame of `format`
    pub fn silence(header: FrameHeader, format: &MediaFormat) -> Self {
        let size = format.frame_size();
        let mut frame = Self::new(header, size);
        frame.buffer.resize(size, 0);
        frame.payload_size = size;
        frame
    }

    /// Get the valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.payload_size]
    }

    /// Get the valid payload bytes mutably
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.payload_size]
    }

    /// Get the delimited payload size in bytes
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Re-delimit the payload, growing the buffer with zeros if needed
    pub fn set_payload_size(&mut self, size: usize) -> Result<()> {
        if size > MAX_FRAME_PAYLOAD {
            return Err(Error::BufferTooSmall {
                required: size,
                available: MAX_FRAME_PAYLOAD,
            });
        }
        if size > self.buffer.len() {
            self.buffer.resize(size, 0);
        }
        self.payload_size = size;
        Ok(())
    }

    /// Replace the payload with a copy of the given bytes
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.set_payload_size(payload.len())?;
        self.buffer[..payload.len()].copy_from_slice(payload);
        Ok(())
    }

    /// Get the allocated buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Check whether the frame carries no payload
    pub fn is_empty_payload(&self) -> bool {
        self.payload_size == 0
    }

    /// Check whether the frame is a comfort noise frame (RFC 3389)
    pub fn is_comfort_noise(&self) -> bool {
        self.header.payload_type == PayloadType::COMFORT_NOISE
    }

    /// Advance the sequence number and timestamp by one frame period
    pub fn advance_timing(&mut self, frame_time: u32) {
        self.header.sequence_number = self.header.sequence_number.wrapping_add(1);
        self.header.timestamp = self.header.timestamp.wrapping_add(frame_time);
    }
}

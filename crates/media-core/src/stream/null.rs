//! Null media stream
//!
//! The bypass endpoint: writes are counted and discarded, reads produce
//! silence at the negotiated data size. Never synchronous, so a patch
//! fed only by null streams falls back to its pacing sleep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::trace;

use softbridge_frame_core::{FrameHeader, MediaFormat, MediaFrame};

use super::{MediaStream, PatchHandle, StreamCore};

/// A stream that discards written frames and reads silence
pub struct NullStream {
    core: StreamCore,
    read_header: Mutex<FrameHeader>,
    frames_written: AtomicU64,
    frames_read: AtomicU64,
}

impl NullStream {
    /// Create a null stream for the given format
    pub fn new(id: impl Into<String>, format: MediaFormat) -> Self {
        let read_header = FrameHeader::random(format.payload_type());
        Self {
            core: StreamCore::new(id, format),
            read_header: Mutex::new(read_header),
            frames_written: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
        }
    }

    /// Number of frames discarded so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Number of silence frames produced so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }
}

impl MediaStream for NullStream {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn media_format(&self) -> MediaFormat {
        self.core.format().clone()
    }

    fn read_packet(&self, frame: &mut MediaFrame) -> bool {
        if !self.core.is_open() {
            return false;
        }
        let mut header = self.read_header.lock().unwrap();
        frame.header = *header;
        if frame.set_payload_size(self.core.data_size()).is_err() {
            return false;
        }
        frame.payload_mut().fill(0);
        header.sequence_number = header.sequence_number.wrapping_add(1);
        header.timestamp = header
            .timestamp
            .wrapping_add(self.core.format().frame_time());
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn write_packet(&self, frame: &MediaFrame) -> bool {
        if !self.core.is_open() {
            return false;
        }
        trace!(
            stream = self.core.id(),
            bytes = frame.payload_size(),
            "null stream discarding frame"
        );
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn data_size(&self) -> usize {
        self.core.data_size()
    }

    fn set_data_size(&self, size: usize) -> bool {
        self.core.set_data_size(size)
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn close(&self) -> bool {
        self.core.close()
    }

    fn set_patch(&self, patch: PatchHandle) -> bool {
        self.core.patch_slot().attach(patch)
    }

    fn unset_patch(&self) {
        self.core.patch_slot().detach()
    }

    fn patch(&self) -> Option<PatchHandle> {
        self.core.patch_slot().current()
    }
}

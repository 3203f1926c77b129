//! Media stream contract and concrete stream implementations
//!
//! A media stream is one real source or sink of frames: an RTP session,
//! a sound device, an in-memory queue, or the null stream. Streams are
//! reference counted (`Arc<dyn MediaStream>`); a patch holds one strong
//! reference for its source and each sink, while the stream's
//! back-reference to its patch is a non-owning [`PatchHandle`] used only
//! for lookup.
//!
//! All methods take `&self`: implementations carry interior mutability
//! so a read blocked in one thread can be broken by an out-of-band
//! `close` from another.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};

use uuid::Uuid;

use softbridge_frame_core::{MediaFormat, MediaFrame};

use crate::codec::MediaCommand;

mod null;
mod queue;

pub use null::NullStream;
pub use queue::QueueStream;

/// Unique identity of a media patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchId(Uuid);

impl PatchId {
    /// Generate a fresh patch identity
    pub fn new() -> Self {
        PatchId(Uuid::new_v4())
    }
}

impl Default for PatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-owning handle from a stream back to the patch it belongs to
///
/// The handle never extends the patch's lifetime; it carries the patch
/// identity plus a liveness token so a slot occupied by a dead patch can
/// be reclaimed.
#[derive(Debug, Clone)]
pub struct PatchHandle {
    id: PatchId,
    token: Weak<()>,
}

impl PatchHandle {
    /// Create a handle from a patch identity and its liveness token
    pub fn new(id: PatchId, token: Weak<()>) -> Self {
        Self { id, token }
    }

    /// Get the patch identity
    pub fn id(&self) -> PatchId {
        self.id
    }

    /// Check whether the patch behind this handle is still alive
    pub fn is_alive(&self) -> bool {
        self.token.strong_count() > 0
    }
}

impl PartialEq for PatchHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PatchHandle {}

/// Set-once slot for a stream's patch back-reference
///
/// `attach` fails while a live patch occupies the slot; a handle whose
/// patch has been dropped is replaced silently.
#[derive(Debug, Default)]
pub struct PatchSlot {
    slot: Mutex<Option<PatchHandle>>,
}

impl PatchSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a patch handle; fails if a live patch already occupies the slot
    pub fn attach(&self, handle: PatchHandle) -> bool {
        let mut slot = self.slot.lock().unwrap();
        match &*slot {
            Some(existing) if existing.is_alive() => false,
            _ => {
                *slot = Some(handle);
                true
            }
        }
    }

    /// Clear the slot
    pub fn detach(&self) {
        *self.slot.lock().unwrap() = None;
    }

    /// Get the currently attached handle, if any
    pub fn current(&self) -> Option<PatchHandle> {
        self.slot.lock().unwrap().clone()
    }
}

/// Contract implemented by every source or sink of media frames
pub trait MediaStream: Send + Sync {
    /// Identifier used in log messages
    fn id(&self) -> &str;

    /// Get the media format this stream produces or consumes
    fn media_format(&self) -> MediaFormat;

    /// Read the next frame; false when the stream is closed or failed
    ///
    /// May block until data is available. A concurrent [`close`] must
    /// cause a blocked or subsequent read to fail promptly.
    ///
    /// [`close`]: MediaStream::close
    fn read_packet(&self, frame: &mut MediaFrame) -> bool;

    /// Write one frame; false when the stream is closed or failed
    fn write_packet(&self, frame: &MediaFrame) -> bool;

    /// Get the negotiated read/write granularity in bytes
    fn data_size(&self) -> usize;

    /// Negotiate the read/write granularity; false if the size cannot be honored
    fn set_data_size(&self, size: usize) -> bool;

    /// Whether read/write operations are naturally paced in real time
    fn is_synchronous(&self) -> bool;

    /// Whether the stream is open
    fn is_open(&self) -> bool;

    /// Close the stream; true if it was open
    ///
    /// Must be callable from any thread, including while another thread
    /// is blocked in [`read_packet`](MediaStream::read_packet).
    fn close(&self) -> bool;

    /// Record this stream as belonging to a patch; false if already patched
    fn set_patch(&self, patch: PatchHandle) -> bool;

    /// Clear the patch back-reference
    fn unset_patch(&self);

    /// Get the patch this stream belongs to, if any
    fn patch(&self) -> Option<PatchHandle>;

    /// Notification that the owning patch's dispatch thread has started
    fn on_patch_start(&self) {}

    /// Notification that the owning patch's dispatch thread has ended
    fn on_patch_stop(&self) {}

    /// Enable jitter buffering on the receive side, where supported
    fn enable_jitter_buffer(&self) {}

    /// Ask the stream to adapt to a changed media format
    fn update_media_format(&self, _format: &MediaFormat) -> bool {
        false
    }

    /// Deliver an out-of-band media command (e.g. picture update)
    fn execute_command(&self, _command: &MediaCommand) -> bool {
        false
    }
}

/// Common state shared by the concrete stream implementations
#[derive(Debug)]
pub struct StreamCore {
    id: String,
    format: MediaFormat,
    data_size: Mutex<usize>,
    open: AtomicBool,
    patch: PatchSlot,
}

impl StreamCore {
    /// Create stream state for the given format, open, with the
    /// format's default frame size as data size
    pub fn new(id: impl Into<String>, format: MediaFormat) -> Self {
        let data_size = format.frame_size();
        Self {
            id: id.into(),
            format,
            data_size: Mutex::new(data_size),
            open: AtomicBool::new(true),
            patch: PatchSlot::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn data_size(&self) -> usize {
        *self.data_size.lock().unwrap()
    }

    /// Accept any non-zero granularity
    pub fn set_data_size(&self, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        *self.data_size.lock().unwrap() = size;
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark closed; true if the stream was open
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    pub fn patch_slot(&self) -> &PatchSlot {
        &self.patch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_patch_slot_set_once() {
        let token = Arc::new(());
        let slot = PatchSlot::new();
        let id = PatchId::new();

        assert!(slot.attach(PatchHandle::new(id, Arc::downgrade(&token))));
        // A live patch occupies the slot
        assert!(!slot.attach(PatchHandle::new(PatchId::new(), Arc::downgrade(&token))));
        assert_eq!(slot.current().unwrap().id(), id);

        slot.detach();
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_patch_slot_reclaims_dead_handle() {
        let slot = PatchSlot::new();
        {
            let token = Arc::new(());
            assert!(slot.attach(PatchHandle::new(PatchId::new(), Arc::downgrade(&token))));
        }
        // The first patch is gone; its slot can be taken again
        let token = Arc::new(());
        assert!(slot.attach(PatchHandle::new(PatchId::new(), Arc::downgrade(&token))));
    }

    #[test]
    fn test_stream_core_close_is_latched() {
        let core = StreamCore::new("s1", MediaFormat::pcmu());
        assert!(core.is_open());
        assert!(core.close());
        assert!(!core.close());
        assert!(!core.is_open());
    }

    #[test]
    fn test_stream_core_data_size() {
        let core = StreamCore::new("s1", MediaFormat::l16());
        assert_eq!(core.data_size(), 320);
        assert!(core.set_data_size(640));
        assert_eq!(core.data_size(), 640);
        assert!(!core.set_data_size(0));
    }
}

//! In-memory queue stream
//!
//! A bounded frame queue usable as a patch source (reads block until a
//! frame arrives or the stream closes) or as a sink (writes enqueue,
//! dropping the oldest frame on overflow). Used for loopback plumbing
//! and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::trace;

use softbridge_frame_core::{MediaFormat, MediaFrame};

use super::{MediaStream, PatchHandle, StreamCore};

/// A bounded in-memory frame queue stream
pub struct QueueStream {
    core: StreamCore,
    queue: Mutex<VecDeque<MediaFrame>>,
    available: Condvar,
    capacity: usize,
    paced: bool,
    frames_dropped: AtomicU64,
}

impl QueueStream {
    /// Create a queue stream holding at most `capacity` frames
    pub fn new(id: impl Into<String>, format: MediaFormat, capacity: usize) -> Self {
        Self {
            core: StreamCore::new(id, format),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity: capacity.max(1),
            paced: false,
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Mark the stream as naturally paced (its producer is real time)
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Enqueue a frame from the producing side
    ///
    /// Equivalent to `write_packet`; named separately for callers that
    /// feed the queue rather than patch it.
    pub fn push(&self, frame: MediaFrame) -> bool {
        if !self.core.is_open() {
            return false;
        }
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == self.capacity {
            queue.pop_front();
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(stream = self.core.id(), "queue overflow, oldest frame dropped");
        }
        queue.push_back(frame);
        drop(queue);
        self.available.notify_one();
        true
    }

    /// Number of frames currently queued
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of frames lost to overflow
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl MediaStream for QueueStream {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn media_format(&self) -> MediaFormat {
        self.core.format().clone()
    }

    fn read_packet(&self, frame: &mut MediaFrame) -> bool {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if !self.core.is_open() {
                return false;
            }
            if let Some(next) = queue.pop_front() {
                *frame = next;
                return true;
            }
            queue = self.available.wait(queue).unwrap();
        }
    }

    fn write_packet(&self, frame: &MediaFrame) -> bool {
        self.push(frame.clone())
    }

    fn data_size(&self) -> usize {
        self.core.data_size()
    }

    fn set_data_size(&self, size: usize) -> bool {
        self.core.set_data_size(size)
    }

    fn is_synchronous(&self) -> bool {
        self.paced
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn close(&self) -> bool {
        // Take the queue lock so a reader is either inside wait() or will
        // observe the closed flag before waiting; then wake everyone.
        let was_open = {
            let _queue = self.queue.lock().unwrap();
            self.core.close()
        };
        self.available.notify_all();
        was_open
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

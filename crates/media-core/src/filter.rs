//! Frame filters
//!
//! Filters are callbacks invoked on every frame passing a pipeline
//! stage, used for DTMF detection and injection, echo cancellation and
//! silence detection. A filter is registered against a stage format (or
//! as a wildcard matching every stage) and runs synchronously on the
//! patch thread, so it must not block.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use softbridge_frame_core::{MediaFormat, MediaFrame};

use crate::stream::PatchId;
use crate::Sample;

/// Signature of a frame filter callback
pub type FilterFn = dyn Fn(&mut MediaFrame, PatchId) + Send + Sync;

/// A reference-counted filter callback
///
/// Handles compare by callback identity (`Arc` pointer equality), so the
/// same handle can be registered at several stages but a duplicate
/// (callback, stage) pair is rejected.
#[derive(Clone)]
pub struct FilterHandle(Arc<FilterFn>);

impl FilterHandle {
    /// Wrap a closure as a filter
    pub fn new(callback: impl Fn(&mut MediaFrame, PatchId) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Invoke the filter on a frame
    pub fn invoke(&self, frame: &mut MediaFrame, patch: PatchId) {
        (self.0)(frame, patch)
    }

    /// Whether two handles wrap the same callback
    pub fn same(&self, other: &FilterHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FilterHandle({:p})", Arc::as_ptr(&self.0))
    }
}

struct FilterEntry {
    handle: FilterHandle,
    stage: Option<MediaFormat>,
}

/// Ordered list of stage-scoped filters belonging to one patch
#[derive(Default)]
pub(crate) struct FilterChain {
    entries: Vec<FilterEntry>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter; false if the (callback, stage) pair already exists
    pub fn add(&mut self, handle: FilterHandle, stage: Option<MediaFormat>) -> bool {
        if self
            .entries
            .iter()
            .any(|e| e.handle.same(&handle) && e.stage == stage)
        {
            debug!("duplicate filter registration ignored");
            return false;
        }
        self.entries.push(FilterEntry { handle, stage });
        true
    }

    /// Remove a filter; true if an entry was actually removed
    pub fn remove(&mut self, handle: &FilterHandle, stage: Option<&MediaFormat>) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.handle.same(handle) && e.stage.as_ref() == stage));
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run every filter whose stage matches (wildcards match all stages)
    pub fn apply(&self, frame: &mut MediaFrame, stage: &MediaFormat, patch: PatchId) {
        for entry in &self.entries {
            match &entry.stage {
                Some(format) if format != stage => continue,
                _ => entry.handle.invoke(frame, patch),
            }
        }
    }
}

/// Energy-based silence detector for linear PCM stages
///
/// Latches a talking/quiet state with a hangover: a single loud frame
/// starts talking, and `hangover` consecutive quiet frames end it.
/// Cloning shares the detector state, so one clone can be registered as
/// a filter while another is polled.
#[derive(Clone)]
pub struct SilenceDetector {
    threshold: i32,
    hangover: u32,
    state: Arc<Mutex<DetectorState>>,
}

struct DetectorState {
    talking: bool,
    quiet_frames: u32,
}

impl SilenceDetector {
    /// Create a detector with an average-magnitude threshold and a
    /// hangover in frames
    pub fn new(threshold: i32, hangover: u32) -> Self {
        Self {
            threshold,
            hangover,
            state: Arc::new(Mutex::new(DetectorState {
                talking: false,
                quiet_frames: 0,
            })),
        }
    }

    /// Detector tuned for 20ms telephony frames
    pub fn telephony() -> Self {
        Self::new(200, 10)
    }

    /// Whether speech is currently present
    pub fn is_talking(&self) -> bool {
        self.state.lock().unwrap().talking
    }

    /// Average absolute sample magnitude of a linear PCM payload
    fn energy(payload: &[u8]) -> i32 {
        let samples = payload.chunks_exact(2);
        let count = samples.len() as i64;
        if count == 0 {
            return 0;
        }
        let sum: i64 = samples
            .map(|pair| i64::from(Sample::from_ne_bytes([pair[0], pair[1]])).abs())
            .sum();
        (sum / count) as i32
    }

    fn process(&self, frame: &MediaFrame) {
        let energy = Self::energy(frame.payload());
        let mut state = self.state.lock().unwrap();
        if energy >= self.threshold {
            if !state.talking {
                trace!(energy, "speech detected");
            }
            state.talking = true;
            state.quiet_frames = 0;
        } else if state.talking {
            state.quiet_frames += 1;
            if state.quiet_frames >= self.hangover {
                trace!("speech ended");
                state.talking = false;
            }
        }
    }

    /// Build the filter callback for registration with a patch
    pub fn filter(&self) -> FilterHandle {
        let detector = self.clone();
        FilterHandle::new(move |frame, _patch| detector.process(frame))
    }
}

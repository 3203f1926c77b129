//! Media patch pipeline
//!
//! A [`MediaPatch`] binds one source stream to any number of sink
//! streams: a dedicated dispatch thread pulls frames from the source,
//! runs them through each sink's transcoder chain and writes the results
//! out, while call control concurrently adds, removes or renegotiates
//! sinks under the patch's exclusion lock.
//!
//! The dispatch loop keeps going as long as at least one sink accepts
//! data, so a failed sink never disturbs the others; it ends when the
//! source closes or the last sink is gone.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use softbridge_frame_core::{FrameHeader, MediaFormat, MediaFrame, PayloadMap};

use crate::codec::{MediaCommand, Transcoder, TranscoderRegistry};
use crate::error::{Error, Result};
use crate::filter::{FilterChain, FilterHandle};
use crate::stream::{MediaStream, PatchHandle, PatchId};

/// Tuning knobs for a media patch
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Sleep applied after each dispatch when no stream in the pipeline
    /// is naturally paced, so a fully asynchronous pipeline does not
    /// spin the CPU
    pub pacing_interval: Duration,
    /// Bound on waiting for the dispatch thread to terminate in
    /// [`MediaPatch::close`]; exceeding it is treated as a deadlock bug
    pub close_timeout: Duration,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            pacing_interval: Duration::from_millis(5),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Snapshot of a patch's dispatch counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchStats {
    /// Frames delivered to at least one sink
    pub frames_dispatched: u64,
    /// Source payload bytes delivered
    pub bytes_dispatched: u64,
    /// Frames no sink accepted
    pub frames_dropped: u64,
    /// Current number of sinks
    pub sinks: usize,
    /// Time since the dispatch thread started
    pub uptime: Duration,
}

#[derive(Default)]
struct StatsCounters {
    frames_dispatched: u64,
    bytes_dispatched: u64,
    frames_dropped: u64,
}

/// One destination of a patch: a sink stream plus its transcoder chain
struct Sink {
    stream: Arc<dyn MediaStream>,
    primary: Option<Box<dyn Transcoder>>,
    secondary: Option<Box<dyn Transcoder>>,
    payload_map: PayloadMap,
    /// Latched false on the first write or conversion failure; the sink
    /// is skipped from then on until removed
    write_successful: bool,
    intermediate: Vec<MediaFrame>,
    finals: Vec<MediaFrame>,
}

impl Sink {
    fn new(
        stream: Arc<dyn MediaStream>,
        primary: Option<Box<dyn Transcoder>>,
        secondary: Option<Box<dyn Transcoder>>,
        payload_map: PayloadMap,
    ) -> Self {
        Self {
            stream,
            primary,
            secondary,
            payload_map,
            write_successful: true,
            intermediate: Vec::new(),
            finals: Vec::new(),
        }
    }

    /// Feed one source frame through this sink's chain
    ///
    /// Frames produced by a codec stage carry the timestamps that stage
    /// assigned, preserving inter-media sync when frame rates differ
    /// from the source.
    fn write_frame(&mut self, frame: &mut MediaFrame, filters: &FilterChain, patch: PatchId) -> bool {
        if !self.write_successful {
            return false;
        }

        let Some(primary) = self.primary.as_mut() else {
            // Pass-through: remap the payload type for this wire only
            let original = frame.header.payload_type;
            frame.header.payload_type = self.payload_map.translate(original);
            let ok = self.stream.write_packet(frame);
            frame.header.payload_type = original;
            if !ok {
                warn!(%patch, sink = self.stream.id(), "sink write failed, abandoning sink");
                self.write_successful = false;
            }
            return ok;
        };

        if (frame.is_comfort_noise() && !primary.accepts_comfort_noise())
            || (frame.is_empty_payload() && !primary.accepts_empty_payload())
        {
            trace!(%patch, sink = self.stream.id(), "dropping frame the codec does not accept");
            return true;
        }

        self.intermediate.clear();
        if !primary.convert_frames(frame, &mut self.intermediate) {
            error!(%patch, sink = self.stream.id(), "primary codec conversion failed");
            self.write_successful = false;
            return false;
        }
        let primary_stage = primary.output_format();

        for mut converted in self.intermediate.drain(..) {
            filters.apply(&mut converted, &primary_stage, patch);

            match self.secondary.as_mut() {
                None => {
                    if !self.stream.write_packet(&converted) {
                        warn!(%patch, sink = self.stream.id(), "sink write failed, abandoning sink");
                        self.write_successful = false;
                        return false;
                    }
                }
                Some(secondary) => {
                    self.finals.clear();
                    if !secondary.convert_frames(&converted, &mut self.finals) {
                        error!(%patch, sink = self.stream.id(), "secondary codec conversion failed");
                        self.write_successful = false;
                        return false;
                    }
                    let secondary_stage = secondary.output_format();
                    for mut produced in self.finals.drain(..) {
                        filters.apply(&mut produced, &secondary_stage, patch);
                        if !self.stream.write_packet(&produced) {
                            warn!(%patch, sink = self.stream.id(), "sink write failed, abandoning sink");
                            self.write_successful = false;
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    fn update_media_format(&mut self, format: &MediaFormat) -> bool {
        match (self.primary.as_mut(), self.secondary.as_mut()) {
            (None, _) => self.stream.update_media_format(format),
            (Some(primary), secondary) => {
                let mut accepted = primary.update_media_format(format);
                if let Some(secondary) = secondary {
                    accepted |= secondary.update_media_format(format);
                }
                accepted
            }
        }
    }

    fn execute_command(&mut self, command: &MediaCommand) -> bool {
        match (self.primary.as_mut(), self.secondary.as_mut()) {
            (None, _) => self.stream.execute_command(command),
            (Some(primary), secondary) => {
                let mut accepted = primary.execute_command(command);
                if let Some(secondary) = secondary {
                    accepted |= secondary.execute_command(command);
                }
                accepted
            }
        }
    }
}

struct PatchState {
    sinks: Vec<Sink>,
    filters: FilterChain,
    /// True while the dispatch thread is alive
    running: bool,
    closing: bool,
    started_at: Option<Instant>,
    stats: StatsCounters,
}

struct PatchShared {
    id: PatchId,
    source: Arc<dyn MediaStream>,
    config: PatchConfig,
    state: Mutex<PatchState>,
    /// Signalled by the dispatch thread on exit
    done: Condvar,
}

impl PatchShared {
    /// Dispatch thread body: the only reader of the source stream
    fn run(self: Arc<Self>) {
        debug!(patch = %self.id, "dispatch thread started");
        let source_format = self.source.media_format();
        let mut frame = MediaFrame::new(FrameHeader::default(), self.source.data_size());

        loop {
            if !self.source.read_packet(&mut frame) {
                debug!(patch = %self.id, "source read ended, stopping dispatch");
                break;
            }
            let (any_written, paced) = self.dispatch_frame(&mut frame, &source_format);
            if !any_written {
                debug!(patch = %self.id, "no sink accepted frame, stopping dispatch");
                break;
            }
            if !paced {
                thread::sleep(self.config.pacing_interval);
            }
        }

        let sink_streams: Vec<Arc<dyn MediaStream>> = {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.sinks.iter().map(|s| s.stream.clone()).collect()
        };
        self.done.notify_all();

        self.source.on_patch_stop();
        for stream in sink_streams {
            stream.on_patch_stop();
        }
        debug!(patch = %self.id, "dispatch thread ended");
    }

    /// Fan one frame out to every sink under the patch lock
    ///
    /// Returns (whether at least one sink accepted the frame, whether
    /// any stream in the pipeline paces naturally). The result is an OR
    /// across sinks on purpose: partial fan-out failure must not end the
    /// whole patch.
    fn dispatch_frame(&self, frame: &mut MediaFrame, source_format: &MediaFormat) -> (bool, bool) {
        let mut state = self.state.lock().unwrap();
        let PatchState {
            sinks,
            filters,
            stats,
            ..
        } = &mut *state;

        filters.apply(frame, source_format, self.id);

        let mut any_written = false;
        let mut paced = self.source.is_synchronous();
        for sink in sinks.iter_mut() {
            paced |= sink.stream.is_synchronous();
            any_written |= sink.write_frame(frame, filters, self.id);
        }

        if any_written {
            stats.frames_dispatched += 1;
            stats.bytes_dispatched += frame.payload_size() as u64;
        } else {
            stats.frames_dropped += 1;
        }
        (any_written, paced)
    }
}

/// The live binding of one source stream to its sinks
///
/// Owns the source stream for its lifetime, the sink collection, the
/// filter list and the dispatch thread. Dropping the patch closes it.
pub struct MediaPatch {
    shared: Arc<PatchShared>,
    registry: Arc<TranscoderRegistry>,
    /// Liveness token behind every [`PatchHandle`] this patch hands out
    token: Arc<()>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MediaPatch {
    /// Create a patch around a newly opened source stream
    ///
    /// Takes ownership of the source for the patch's lifetime and
    /// records the stream as patched.
    pub fn new(
        source: Arc<dyn MediaStream>,
        registry: Arc<TranscoderRegistry>,
        config: PatchConfig,
    ) -> Self {
        let id = PatchId::new();
        let token = Arc::new(());
        let patch = Self {
            shared: Arc::new(PatchShared {
                id,
                source: source.clone(),
                config,
                state: Mutex::new(PatchState {
                    sinks: Vec::new(),
                    filters: FilterChain::new(),
                    running: false,
                    closing: false,
                    started_at: None,
                    stats: StatsCounters::default(),
                }),
                done: Condvar::new(),
            }),
            registry,
            token,
            thread: Mutex::new(None),
        };
        if !source.set_patch(patch.handle()) {
            warn!(patch = %id, stream = source.id(), "source stream was already patched");
        }
        debug!(patch = %id, source = source.id(), "created media patch");
        patch
    }

    /// Get this patch's identity
    pub fn id(&self) -> PatchId {
        self.shared.id
    }

    /// Build the non-owning handle streams keep back to this patch
    pub fn handle(&self) -> PatchHandle {
        PatchHandle::new(self.shared.id, Arc::downgrade(&self.token))
    }

    /// Get the source stream
    pub fn source(&self) -> &Arc<dyn MediaStream> {
        &self.shared.source
    }

    /// Get the source stream's format
    pub fn source_format(&self) -> MediaFormat {
        self.shared.source.media_format()
    }

    /// Attach a destination stream, resolving its transcoder chain
    ///
    /// Resolution prefers a pass-through, then a single converter, then
    /// a pair of converters chained through a bridging format. Fails
    /// without retaining any state if the stream is already patched, no
    /// path exists, or the stream refuses the negotiated frame size.
    pub fn add_sink(&self, stream: Arc<dyn MediaStream>, payload_map: PayloadMap) -> Result<()> {
        if !stream.set_patch(self.handle()) {
            return Err(Error::AlreadyPatched(stream.id().to_string()));
        }

        match self.resolve_sink(&stream) {
            Ok((primary, secondary)) => {
                let mut state = self.shared.state.lock().unwrap();
                if state.closing {
                    drop(state);
                    stream.unset_patch();
                    return Err(Error::InvalidState("patch is closed".to_string()));
                }
                let running = state.running;
                state
                    .sinks
                    .push(Sink::new(stream.clone(), primary, secondary, payload_map));
                drop(state);

                if running {
                    stream.on_patch_start();
                }
                info!(
                    patch = %self.shared.id,
                    sink = stream.id(),
                    format = %stream.media_format(),
                    "added sink"
                );
                Ok(())
            }
            Err(e) => {
                stream.unset_patch();
                Err(e)
            }
        }
    }

    /// Resolve the transcoder chain for a prospective sink
    #[allow(clippy::type_complexity)]
    fn resolve_sink(
        &self,
        stream: &Arc<dyn MediaStream>,
    ) -> Result<(Option<Box<dyn Transcoder>>, Option<Box<dyn Transcoder>>)> {
        let source = &self.shared.source;
        let source_format = source.media_format();
        let sink_format = stream.media_format();
        let correlation = self.shared.id.to_string();

        if source_format == sink_format
            && (!source_format.is_framed() || source.data_size() <= stream.data_size())
        {
            debug!(
                patch = %self.shared.id,
                sink = stream.id(),
                "pass-through sink, no transcoder needed"
            );
            return Ok((None, None));
        }

        if let Some(mut transcoder) = self
            .registry
            .create(&source_format, &sink_format, &correlation)
        {
            let size = transcoder.optimal_data_size(false);
            if !stream.set_data_size(size) {
                return Err(Error::FrameSizeRejected {
                    stream: stream.id().to_string(),
                    size,
                });
            }
            transcoder.set_max_output_size(stream.data_size());
            self.negotiate_source_size(transcoder.as_ref());
            return Ok((Some(transcoder), None));
        }

        let Some(intermediate) = self
            .registry
            .find_intermediate(&source_format, &sink_format)
        else {
            return Err(Error::NoTranscoderPath {
                input: source_format.name().to_string(),
                output: sink_format.name().to_string(),
            });
        };

        let first = self
            .registry
            .create(&source_format, &intermediate, &correlation);
        let second = self
            .registry
            .create(&intermediate, &sink_format, &correlation);
        let (Some(mut first), Some(mut second)) = (first, second) else {
            return Err(Error::NoTranscoderPath {
                input: source_format.name().to_string(),
                output: sink_format.name().to_string(),
            });
        };

        let size = second.optimal_data_size(false);
        if !stream.set_data_size(size) {
            return Err(Error::FrameSizeRejected {
                stream: stream.id().to_string(),
                size,
            });
        }
        first.set_max_output_size(second.optimal_data_size(true));
        second.set_max_output_size(stream.data_size());
        self.negotiate_source_size(first.as_ref());

        info!(
            patch = %self.shared.id,
            sink = stream.id(),
            "transcoding {} -> {} -> {}",
            source_format,
            intermediate,
            sink_format
        );
        Ok((Some(first), Some(second)))
    }

    /// Renegotiate the source's read granularity against a chain's
    /// preferred input size
    ///
    /// Sequential negotiation across add_sink calls settles on a size
    /// workable for every current sink.
    fn negotiate_source_size(&self, primary: &dyn Transcoder) {
        let preferred = primary.optimal_data_size(true);
        if !self.shared.source.set_data_size(preferred) {
            debug!(
                patch = %self.shared.id,
                source = self.shared.source.id(),
                kept = self.shared.source.data_size(),
                preferred,
                "source kept its data size"
            );
        }
    }

    /// Detach a sink and destroy its transcoder chain
    ///
    /// Safe to call while the dispatch loop runs: removal is serialized
    /// with frame fan-out by the patch lock, so an in-flight dispatch
    /// either completes before the removal or never sees the sink.
    pub fn remove_sink(&self, stream: &Arc<dyn MediaStream>) -> bool {
        let removed = {
            let mut state = self.shared.state.lock().unwrap();
            match state
                .sinks
                .iter()
                .position(|s| Arc::ptr_eq(&s.stream, stream))
            {
                Some(index) => {
                    state.sinks.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            stream.unset_patch();
            debug!(patch = %self.shared.id, sink = stream.id(), "removed sink");
        }
        removed
    }

    /// Launch the dispatch thread; idempotent
    pub fn start(&self) {
        let mut thread_slot = self.thread.lock().unwrap();
        if thread_slot.is_some() {
            trace!(patch = %self.shared.id, "patch already started");
            return;
        }

        let sink_streams: Vec<Arc<dyn MediaStream>> = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closing {
                warn!(patch = %self.shared.id, "start ignored on a closed patch");
                return;
            }
            state.running = true;
            state.started_at = Some(Instant::now());
            state.sinks.iter().map(|s| s.stream.clone()).collect()
        };

        if self.shared.source.media_format().flags().needs_jitter {
            self.shared.source.enable_jitter_buffer();
        }
        self.shared.source.on_patch_start();
        for stream in sink_streams {
            stream.on_patch_start();
        }

        let id_short: String = self.shared.id.to_string().chars().take(8).collect();
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name(format!("patch-{}", id_short))
            .spawn(move || shared.run())
        {
            Ok(handle) => {
                *thread_slot = Some(handle);
                info!(patch = %self.shared.id, "patch started");
            }
            Err(e) => {
                error!(patch = %self.shared.id, error = %e, "failed to spawn dispatch thread");
                self.shared.state.lock().unwrap().running = false;
            }
        }
    }

    /// Dispatch one frame synchronously, without the dispatch thread
    ///
    /// For sources that deliver frames by callback rather than blocking
    /// reads; follows the same filter, fan-out and OR-result rules as
    /// the thread. Returns false when no sink accepted the frame.
    pub fn push_frame(&self, frame: &mut MediaFrame) -> bool {
        let source_format = self.shared.source.media_format();
        self.shared.dispatch_frame(frame, &source_format).0
    }

    /// Register a filter at a stage format, or as a wildcard
    ///
    /// Duplicate (callback, stage) pairs are rejected.
    pub fn add_filter(&self, filter: FilterHandle, stage: Option<MediaFormat>) -> bool {
        self.shared.state.lock().unwrap().filters.add(filter, stage)
    }

    /// Remove a filter; true if an entry was actually removed
    pub fn remove_filter(&self, filter: &FilterHandle, stage: Option<&MediaFormat>) -> bool {
        self.shared
            .state
            .lock()
            .unwrap()
            .filters
            .remove(filter, stage)
    }

    /// Route a media format change through the patch
    ///
    /// `from_sink` false routes the request to the source (a sink wants
    /// the source to change); true broadcasts it to every sink's codec
    /// chain. Returns true if at least one target accepted it.
    pub fn update_media_format(&self, format: &MediaFormat, from_sink: bool) -> bool {
        if !from_sink {
            return self.shared.source.update_media_format(format);
        }
        let mut state = self.shared.state.lock().unwrap();
        let mut accepted = false;
        for sink in state.sinks.iter_mut() {
            accepted |= sink.update_media_format(format);
        }
        accepted
    }

    /// Route an out-of-band media command through the patch
    ///
    /// Same routing rules as [`update_media_format`](Self::update_media_format).
    pub fn execute_command(&self, command: &MediaCommand, from_sink: bool) -> bool {
        if !from_sink {
            return self.shared.source.execute_command(command);
        }
        let mut state = self.shared.state.lock().unwrap();
        let mut accepted = false;
        for sink in state.sinks.iter_mut() {
            accepted |= sink.execute_command(command);
        }
        accepted
    }

    /// Current number of sinks
    pub fn sink_count(&self) -> usize {
        self.shared.state.lock().unwrap().sinks.len()
    }

    /// Format of the indexed sink's stream
    pub fn sink_format(&self, index: usize) -> Option<MediaFormat> {
        self.shared
            .state
            .lock()
            .unwrap()
            .sinks
            .get(index)
            .map(|s| s.stream.media_format())
    }

    /// Whether the dispatch thread is currently running
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().running
    }

    /// Snapshot the dispatch counters
    pub fn stats(&self) -> PatchStats {
        let state = self.shared.state.lock().unwrap();
        PatchStats {
            frames_dispatched: state.stats.frames_dispatched,
            bytes_dispatched: state.stats.bytes_dispatched,
            frames_dropped: state.stats.frames_dropped,
            sinks: state.sinks.len(),
            uptime: state
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or_default(),
        }
    }

    fn sink_streams(&self) -> Vec<Arc<dyn MediaStream>> {
        self.shared
            .state
            .lock()
            .unwrap()
            .sinks
            .iter()
            .map(|s| s.stream.clone())
            .collect()
    }

    /// Tear the patch down; idempotent and blocking
    ///
    /// Clears the filters, closes the source out-of-band (which ends a
    /// blocked or subsequent read), closes every remaining sink stream
    /// outside the patch lock, then waits for the dispatch thread to
    /// terminate. A thread that outlives the bounded wait indicates a
    /// deadlock bug and is treated as fatal.
    pub fn close(&self) {
        let id = self.shared.id;
        debug!(patch = %id, "closing media patch");

        {
            let mut state = self.shared.state.lock().unwrap();
            state.closing = true;
            state.filters.clear();
        }

        self.shared.source.close();
        for stream in self.sink_streams() {
            stream.close();
        }

        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if thread::current().id() == handle.thread().id() {
                // Closed from a filter or stream callback on the patch
                // thread itself; the loop unwinds once the callback
                // returns, so there is nothing to wait for here.
                warn!(patch = %id, "close called from the dispatch thread");
                return;
            }

            let deadline = Instant::now() + self.shared.config.close_timeout;
            let mut state = self.shared.state.lock().unwrap();
            while state.running {
                let now = Instant::now();
                if now >= deadline {
                    error!(patch = %id, "dispatch thread failed to terminate");
                    panic!(
                        "media patch {} dispatch thread failed to terminate within {:?}",
                        id, self.shared.config.close_timeout
                    );
                }
                let (guard, _) = self
                    .shared
                    .done
                    .wait_timeout(state, deadline - now)
                    .unwrap();
                state = guard;
            }
            drop(state);
            let _ = handle.join();
        }

        self.shared.source.unset_patch();
        for stream in self.sink_streams() {
            stream.unset_patch();
        }
        info!(patch = %id, "media patch closed");
    }
}

impl Drop for MediaPatch {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.close();
        }
    }
}

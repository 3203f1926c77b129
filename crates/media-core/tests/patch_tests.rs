//! End-to-end tests for the media patch pipeline
//!
//! Uses instrumented fake streams and transcoders injected through a
//! per-test registry, plus the crate's own queue/null streams for the
//! threaded scenarios.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use softbridge_media_core::prelude::*;
use softbridge_media_core::stream::StreamCore;

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

fn fmt_a() -> MediaFormat {
    MediaFormat::new(
        "FMT-A",
        MediaKind::Audio,
        PayloadType::from_raw(96),
        8000,
        160,
        160,
    )
}

fn fmt_b() -> MediaFormat {
    MediaFormat::new(
        "FMT-B",
        MediaKind::Audio,
        PayloadType::from_raw(97),
        8000,
        160,
        80,
    )
}

fn fmt_i() -> MediaFormat {
    MediaFormat::new(
        "FMT-I",
        MediaKind::Audio,
        PayloadType::from_raw(98),
        8000,
        160,
        320,
    )
}

fn frame_of(format: &MediaFormat, tag: u8, timestamp: u32) -> MediaFrame {
    let header = FrameHeader {
        payload_type: format.payload_type(),
        sequence_number: 1,
        timestamp,
        marker: false,
        ssrc: 0x5051,
    };
    MediaFrame::with_payload(header, &vec![tag; format.frame_size()])
}

/// A sink stream that records every written frame
struct RecordingStream {
    core: StreamCore,
    frames: Mutex<Vec<MediaFrame>>,
    write_attempts: AtomicUsize,
    close_calls: AtomicUsize,
    fail_writes: AtomicBool,
    refuse_data_size: AtomicBool,
    negotiated_sizes: Mutex<Vec<usize>>,
}

impl RecordingStream {
    fn new(id: &str, format: MediaFormat) -> Arc<Self> {
        Arc::new(Self {
            core: StreamCore::new(id, format),
            frames: Mutex::new(Vec::new()),
            write_attempts: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            refuse_data_size: AtomicBool::new(false),
            negotiated_sizes: Mutex::new(Vec::new()),
        })
    }

    fn refusing_data_size(id: &str, format: MediaFormat) -> Arc<Self> {
        let stream = Self::new(id, format);
        stream.refuse_data_size.store(true, Ordering::SeqCst);
        stream
    }

    fn frames(&self) -> Vec<MediaFrame> {
        self.frames.lock().unwrap().clone()
    }

    fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl MediaStream for RecordingStream {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn media_format(&self) -> MediaFormat {
        self.core.format().clone()
    }

    fn read_packet(&self, _frame: &mut MediaFrame) -> bool {
        false
    }

    fn write_packet(&self, frame: &MediaFrame) -> bool {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.core.is_open() || self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.frames.lock().unwrap().push(frame.clone());
        true
    }

    fn data_size(&self) -> usize {
        self.core.data_size()
    }

    fn set_data_size(&self, size: usize) -> bool {
        if self.refuse_data_size.load(Ordering::SeqCst) {
            return false;
        }
        self.negotiated_sizes.lock().unwrap().push(size);
        self.core.set_data_size(size)
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn close(&self) -> bool {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
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

/// Shared instrumentation for fake transcoders created by one registry
#[derive(Clone)]
struct CodecProbe {
    created: Arc<AtomicUsize>,
    convert_calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl CodecProbe {
    fn new() -> Self {
        Self {
            created: Arc::new(AtomicUsize::new(0)),
            convert_calls: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn convert_calls(&self) -> usize {
        self.convert_calls.load(Ordering::SeqCst)
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

/// A 1:1 fake transcoder producing fixed-size frames with its own
/// running timestamp
struct FakeTranscoder {
    input: MediaFormat,
    output: MediaFormat,
    out_payload: usize,
    advance: u32,
    next_timestamp: Option<u32>,
    probe: CodecProbe,
}

impl Transcoder for FakeTranscoder {
    fn input_format(&self) -> MediaFormat {
        self.input.clone()
    }

    fn output_format(&self) -> MediaFormat {
        self.output.clone()
    }

    fn convert_frames(&mut self, input: &MediaFrame, output: &mut Vec<MediaFrame>) -> bool {
        self.probe.convert_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail.load(Ordering::SeqCst) {
            return false;
        }
        let timestamp = *self
            .next_timestamp
            .get_or_insert(input.header.timestamp);
        let mut header = input.header;
        header.payload_type = self.output.payload_type();
        header.timestamp = timestamp;
        output.push(MediaFrame::with_payload(
            header,
            &vec![0xAB; self.out_payload],
        ));
        self.next_timestamp = Some(timestamp.wrapping_add(self.advance));
        true
    }

    fn optimal_data_size(&self, is_input: bool) -> usize {
        if is_input {
            self.input.frame_size()
        } else {
            self.out_payload
        }
    }

    fn update_media_format(&mut self, _format: &MediaFormat) -> bool {
        true
    }

    fn execute_command(&mut self, _command: &MediaCommand) -> bool {
        true
    }
}

fn register_fake(
    registry: &mut TranscoderRegistry,
    input: &MediaFormat,
    output: &MediaFormat,
    out_payload: usize,
    advance: u32,
    probe: &CodecProbe,
) {
    let (input, output, probe) = (input.clone(), output.clone(), probe.clone());
    let factory_input = input.clone();
    let factory_output = output.clone();
    registry.register(&input, &output, move || {
        probe.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeTranscoder {
            input: factory_input.clone(),
            output: factory_output.clone(),
            out_payload,
            advance,
            next_timestamp: None,
            probe: probe.clone(),
        })
    });
}

fn patch_over(source: Arc<dyn MediaStream>, registry: TranscoderRegistry) -> MediaPatch {
    MediaPatch::new(source, Arc::new(registry), PatchConfig::default())
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ---------------------------------------------------------------------------
// Resolution and dispatch
// ---------------------------------------------------------------------------

#[test]
fn pass_through_is_byte_identical_with_remapped_payload_type() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let sink = RecordingStream::new("sink", fmt_a());
    let mut map = PayloadMap::new();
    map.insert(PayloadType::from_raw(96), PayloadType::from_raw(100));
    patch.add_sink(sink.clone(), map).unwrap();

    // Same formats: no transcoder was instantiated
    assert_eq!(probe.created(), 0);

    let mut frame = frame_of(&fmt_a(), 0x42, 0);
    assert!(patch.push_frame(&mut frame));

    let written = sink.frames();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].payload(), frame.payload());
    assert_eq!(written[0].header.payload_type, PayloadType::from_raw(100));
    // The dispatched frame itself keeps its original payload type
    assert_eq!(frame.header.payload_type, PayloadType::from_raw(96));
}

#[test]
fn single_stage_resolution_creates_exactly_one_transcoder() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let sink = RecordingStream::new("sink", fmt_b());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    assert_eq!(probe.created(), 1);
    assert_eq!(patch.sink_format(0).unwrap(), fmt_b());
    // The sink negotiated to the transcoder's optimal output size
    assert!(sink.negotiated_sizes.lock().unwrap().contains(&80));

    let mut frame = frame_of(&fmt_a(), 0x42, 0);
    assert!(patch.push_frame(&mut frame));
    let written = sink.frames();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].payload_size(), 80);
    assert_eq!(written[0].header.payload_type, PayloadType::from_raw(97));
}

#[test]
fn two_stage_resolution_bridges_through_intermediate() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_i(), 320, 160, &probe);
    register_fake(&mut registry, &fmt_i(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let sink = RecordingStream::new("sink", fmt_b());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    // Exactly the two chained stages were instantiated
    assert_eq!(probe.created(), 2);

    let mut frame = frame_of(&fmt_a(), 0x42, 0);
    assert!(patch.push_frame(&mut frame));
    let written = sink.frames();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].payload_size(), 80);
}

#[test]
fn no_transcoder_path_fails_without_side_effects() {
    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, TranscoderRegistry::new());

    let sink = RecordingStream::new("sink", fmt_b());
    assert_eq!(patch.sink_count(), 0);

    let result = patch.add_sink(sink.clone(), PayloadMap::new());
    assert!(matches!(result, Err(Error::NoTranscoderPath { .. })));

    assert_eq!(patch.sink_count(), 0);
    // The failed sink was fully rolled back and can be patched elsewhere
    assert!(sink.patch().is_none());
}

#[test]
fn sink_refusing_negotiated_size_is_rolled_back() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let sink = RecordingStream::refusing_data_size("sink", fmt_b());
    let result = patch.add_sink(sink.clone(), PayloadMap::new());
    assert!(matches!(result, Err(Error::FrameSizeRejected { .. })));
    assert_eq!(patch.sink_count(), 0);
    assert!(sink.patch().is_none());
}

#[test]
fn stream_cannot_be_sink_of_two_patches() {
    let patch_one = patch_over(
        Arc::new(NullStream::new("src1", fmt_a())),
        TranscoderRegistry::new(),
    );
    let patch_two = patch_over(
        Arc::new(NullStream::new("src2", fmt_a())),
        TranscoderRegistry::new(),
    );

    let sink = RecordingStream::new("sink", fmt_a());
    patch_one.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    let result = patch_two.add_sink(sink.clone(), PayloadMap::new());
    assert!(matches!(result, Err(Error::AlreadyPatched(_))));
    assert_eq!(patch_two.sink_count(), 0);
}

// ---------------------------------------------------------------------------
// Fan-out independence and failure latching
// ---------------------------------------------------------------------------

#[test]
fn fan_out_failure_of_one_sink_spares_the_other() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let transcoded = RecordingStream::new("transcoded", fmt_b());
    let pass_through = RecordingStream::new("pass-through", fmt_a());
    patch
        .add_sink(transcoded.clone(), PayloadMap::new())
        .unwrap();
    patch
        .add_sink(pass_through.clone(), PayloadMap::new())
        .unwrap();

    let mut frame = frame_of(&fmt_a(), 0x01, 0);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(transcoded.frames().len(), 1);
    assert_eq!(pass_through.frames().len(), 1);

    // Force the transcoded sink to fail: the pass-through keeps flowing
    transcoded.set_fail_writes(true);
    let mut frame = frame_of(&fmt_a(), 0x02, 160);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(pass_through.frames().len(), 2);
    assert_eq!(transcoded.frames().len(), 1);
}

#[test]
fn failed_sink_is_latched_until_removed_and_readded() {
    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, TranscoderRegistry::new());

    let sink = RecordingStream::new("sink", fmt_a());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    sink.set_fail_writes(true);
    let mut frame = frame_of(&fmt_a(), 0x01, 0);
    assert!(!patch.push_frame(&mut frame));
    assert_eq!(sink.write_attempts(), 1);

    // Latched: further dispatches never touch the stream again
    let mut frame = frame_of(&fmt_a(), 0x02, 160);
    assert!(!patch.push_frame(&mut frame));
    let mut frame = frame_of(&fmt_a(), 0x03, 320);
    assert!(!patch.push_frame(&mut frame));
    assert_eq!(sink.write_attempts(), 1);

    // A fresh sink for the same stream starts with a clean latch
    let sink_dyn: Arc<dyn MediaStream> = sink.clone();
    assert!(patch.remove_sink(&sink_dyn));
    sink.set_fail_writes(false);
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    let mut frame = frame_of(&fmt_a(), 0x04, 480);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(sink.write_attempts(), 2);
    assert_eq!(sink.frames().len(), 1);
}

#[test]
fn codec_failure_latches_only_that_sink() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);

    let transcoded = RecordingStream::new("transcoded", fmt_b());
    let pass_through = RecordingStream::new("pass-through", fmt_a());
    patch
        .add_sink(transcoded.clone(), PayloadMap::new())
        .unwrap();
    patch
        .add_sink(pass_through.clone(), PayloadMap::new())
        .unwrap();

    probe.set_fail(true);
    let mut frame = frame_of(&fmt_a(), 0x01, 0);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(probe.convert_calls(), 1);
    assert_eq!(pass_through.frames().len(), 1);
    assert!(transcoded.frames().is_empty());

    // The failed chain is never converted again
    let mut frame = frame_of(&fmt_a(), 0x02, 160);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(probe.convert_calls(), 1);
    assert_eq!(pass_through.frames().len(), 2);
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[test]
fn duplicate_filter_registration_runs_once_per_frame() {
    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, TranscoderRegistry::new());
    let sink = RecordingStream::new("sink", fmt_a());
    patch.add_sink(sink, PayloadMap::new()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let filter = {
        let hits = hits.clone();
        FilterHandle::new(move |_, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(patch.add_filter(filter.clone(), None));
    assert!(!patch.add_filter(filter.clone(), None));

    let mut frame = frame_of(&fmt_a(), 0x01, 0);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(patch.remove_filter(&filter, None));
    assert!(!patch.remove_filter(&filter, None));

    let mut frame = frame_of(&fmt_a(), 0x02, 160);
    assert!(patch.push_frame(&mut frame));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn filters_can_mutate_frames_in_flight() {
    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, TranscoderRegistry::new());
    let sink = RecordingStream::new("sink", fmt_a());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    patch.add_filter(
        FilterHandle::new(|frame, _| {
            frame.payload_mut().fill(0x7E);
        }),
        Some(fmt_a()),
    );

    let mut frame = frame_of(&fmt_a(), 0x00, 0);
    assert!(patch.push_frame(&mut frame));
    assert!(sink.frames()[0].payload().iter().all(|&b| b == 0x7E));
}

// ---------------------------------------------------------------------------
// Command and format routing
// ---------------------------------------------------------------------------

#[test]
fn update_and_command_routing() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    register_fake(&mut registry, &fmt_a(), &fmt_b(), 80, 160, &probe);

    let source = Arc::new(NullStream::new("src", fmt_a()));
    let patch = patch_over(source, registry);
    let sink = RecordingStream::new("sink", fmt_b());
    patch.add_sink(sink, PayloadMap::new()).unwrap();

    // Broadcast to sink codec chains: the fake accepts both
    assert!(patch.update_media_format(&fmt_b(), true));
    assert!(patch.execute_command(&MediaCommand::UpdatePicture, true));

    // Routed to the source: the null stream accepts neither
    assert!(!patch.update_media_format(&fmt_b(), false));
    assert!(!patch.execute_command(&MediaCommand::UpdatePicture, false));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn close_is_deterministic_and_idempotent() {
    // An empty blocking queue keeps the dispatch thread parked in read
    let source = Arc::new(QueueStream::new("src", fmt_a(), 4));
    let patch = patch_over(source.clone(), TranscoderRegistry::new());
    let sink = RecordingStream::new("sink", fmt_a());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    patch.start();
    assert!(wait_until(Duration::from_secs(2), || patch.is_running()));

    patch.close();
    assert!(!source.is_open());
    assert!(sink.close_calls() >= 1);
    assert!(!patch.is_running());

    // Idempotent
    patch.close();
    assert!(!patch.is_running());
}

#[test]
fn start_is_idempotent() {
    let source = Arc::new(QueueStream::new("src", fmt_a(), 4));
    let patch = patch_over(source, TranscoderRegistry::new());
    let sink = RecordingStream::new("sink", fmt_a());
    patch.add_sink(sink, PayloadMap::new()).unwrap();

    patch.start();
    patch.start();
    assert!(wait_until(Duration::from_secs(2), || patch.is_running()));
    patch.close();
}

#[test]
fn threaded_dispatch_drains_queue_through_g711() {
    let source = Arc::new(QueueStream::new("src", MediaFormat::pcmu(), 8));
    for n in 0..5u32 {
        let header = FrameHeader::new(PayloadType::PCMU, n as u16, n * 160, 0xFEED);
        source.push(MediaFrame::with_payload(header, &[0xFF; 160]));
    }

    let registry = Arc::new(TranscoderRegistry::with_defaults());
    let patch = MediaPatch::new(source.clone(), registry, PatchConfig::default());

    let sink = Arc::new(NullStream::new("sink", MediaFormat::l16()));
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();

    patch.start();
    assert!(wait_until(Duration::from_secs(2), || {
        sink.frames_written() >= 5
    }));
    patch.close();

    let stats = patch.stats();
    assert!(stats.frames_dispatched >= 5);
    assert!(stats.bytes_dispatched >= 5 * 160);
    assert_eq!(stats.sinks, 1);
}

// ---------------------------------------------------------------------------
// The telephony scenario: PCM source feeding a GSM sink
// ---------------------------------------------------------------------------

#[test]
fn pcm_to_gsm_scenario() {
    let probe = CodecProbe::new();
    let mut registry = TranscoderRegistry::new();
    // A GSM 06.10 encoder: 320 bytes of linear PCM in, 33 bytes out,
    // timestamps advancing by 160 samples per frame
    register_fake(
        &mut registry,
        &MediaFormat::l16(),
        &MediaFormat::gsm0610(),
        33,
        160,
        &probe,
    );

    let source = Arc::new(NullStream::new("pcm-src", MediaFormat::l16()));
    let patch = patch_over(source, registry);

    let sink = RecordingStream::new("gsm-sink", MediaFormat::gsm0610());
    patch.add_sink(sink.clone(), PayloadMap::new()).unwrap();
    assert_eq!(probe.created(), 1);
    assert_eq!(patch.sink_format(0).unwrap(), MediaFormat::gsm0610());

    // One 320-byte PCM frame in, exactly one 33-byte GSM frame out
    let mut frame = frame_of(&MediaFormat::l16(), 0x10, 0);
    assert_eq!(frame.payload_size(), 320);
    assert!(patch.push_frame(&mut frame));

    let written = sink.frames();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].payload_size(), 33);
    assert_eq!(written[0].header.payload_type, PayloadType::GSM);

    // The next frame's timestamp advances by one 160-sample frame time
    let mut frame = frame_of(&MediaFormat::l16(), 0x11, 160);
    assert!(patch.push_frame(&mut frame));
    let written = sink.frames();
    assert_eq!(written.len(), 2);
    assert_eq!(
        written[1].header.timestamp - written[0].header.timestamp,
        160
    );
}

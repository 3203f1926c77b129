//! Loopback demo for the media patch pipeline
//!
//! Feeds a µ-law tone through a patch into an L16 null sink (forcing a
//! G.711 decode stage), optionally fans out to a second pass-through
//! sink, and prints the patch statistics as JSON when done.
//!
//! ```text
//! cargo run --bin patch_demo -- --frames 200 --tone-hz 440 --passthrough-sink
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use softbridge_media_core::codec::g711::linear_to_mulaw;
use softbridge_media_core::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "patch_demo", about = "Media patch loopback demo")]
struct Args {
    /// Number of 20ms tone frames to feed through the patch
    #[arg(long, default_value_t = 100)]
    frames: usize,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    tone_hz: f64,

    /// Tone amplitude (0.0 to 1.0)
    #[arg(long, default_value_t = 0.5)]
    amplitude: f64,

    /// Also fan out to a second, pass-through PCMU sink
    #[arg(long, default_value_t = false)]
    passthrough_sink: bool,

    /// Pacing sleep in milliseconds when nothing is synchronous
    #[arg(long, default_value_t = 5)]
    pacing_ms: u64,
}

/// Generate `count` 20ms µ-law tone frames into the queue
fn feed_tone(source: &QueueStream, count: usize, frequency: f64, amplitude: f64) {
    let mut header = FrameHeader::random(PayloadType::PCMU);
    let mut phase: f64 = 0.0;
    let phase_step = 2.0 * std::f64::consts::PI * frequency / 8000.0;

    for _ in 0..count {
        let mut payload = [0u8; 160];
        for byte in payload.iter_mut() {
            let sample = (phase.sin() * amplitude * 32767.0) as Sample;
            *byte = linear_to_mulaw(sample);
            phase += phase_step;
            if phase >= 2.0 * std::f64::consts::PI {
                phase -= 2.0 * std::f64::consts::PI;
            }
        }
        source.push(MediaFrame::with_payload(header, &payload));
        header.sequence_number = header.sequence_number.wrapping_add(1);
        header.timestamp = header.timestamp.wrapping_add(160);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let registry = Arc::new(TranscoderRegistry::with_defaults());

    let source = Arc::new(QueueStream::new(
        "tone-source",
        MediaFormat::pcmu(),
        args.frames.max(1),
    ));
    feed_tone(&source, args.frames, args.tone_hz, args.amplitude);

    let config = PatchConfig {
        pacing_interval: Duration::from_millis(args.pacing_ms),
        ..Default::default()
    };
    let patch = MediaPatch::new(source.clone(), registry, config);

    let decoded_sink = Arc::new(NullStream::new("decoded-sink", MediaFormat::l16()));
    patch.add_sink(decoded_sink.clone(), PayloadMap::new())?;

    let passthrough_sink = if args.passthrough_sink {
        let sink = Arc::new(NullStream::new("passthrough-sink", MediaFormat::pcmu()));
        patch.add_sink(sink.clone(), PayloadMap::new())?;
        Some(sink)
    } else {
        None
    };

    // Watch the decoded linear stage for speech
    let detector = SilenceDetector::telephony();
    patch.add_filter(detector.filter(), Some(MediaFormat::l16()));

    patch.start();

    // Let the queue drain, then tear down
    while !source.is_empty() {
        thread::sleep(Duration::from_millis(20));
    }
    thread::sleep(Duration::from_millis(50));
    patch.close();

    info!(
        decoded = decoded_sink.frames_written(),
        passthrough = passthrough_sink.as_ref().map(|s| s.frames_written()),
        talking = detector.is_talking(),
        "patch drained"
    );

    let stats = patch.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).map_err(|e| Error::Other(e.to_string()))?
    );
    Ok(())
}

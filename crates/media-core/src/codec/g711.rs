//! G.711 audio converters
//!
//! Built-in transcoders between G.711 (µ-law and A-law) and 16-bit
//! linear PCM. G.711 is the fundamental codec for telephony systems
//! worldwide, and linear PCM is the bridging format two-stage transcoder
//! chains meet at, so registering these four converters makes any
//! PCMU/PCMA/L16 pair reachable.

use once_cell::sync::Lazy;
use tracing::trace;

use softbridge_frame_core::{MediaFormat, MediaFrame};

use super::{Transcoder, TranscoderRegistry};
use crate::Sample;

/// G.711 codec variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// µ-law (PCMU) - Used primarily in North America and Japan
    MuLaw,
    /// A-law (PCMA) - Used primarily in Europe and rest of world
    ALaw,
}

impl G711Variant {
    fn compressed_format(&self) -> MediaFormat {
        match self {
            G711Variant::MuLaw => MediaFormat::pcmu(),
            G711Variant::ALaw => MediaFormat::pcma(),
        }
    }
}

const MULAW_BIAS: i32 = 0x84;
const G711_CLIP: i32 = 32635;

/// Compress a linear sample to a µ-law codeword
pub fn linear_to_mulaw(pcm: Sample) -> u8 {
    let sign: u8 = if pcm < 0 { 0x80 } else { 0x00 };
    let mut magnitude = i32::from(pcm).abs();
    if magnitude > G711_CLIP {
        magnitude = G711_CLIP;
    }
    magnitude += MULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Expand a µ-law codeword to a linear sample
pub fn mulaw_to_linear(codeword: u8) -> Sample {
    let value = !codeword;
    let exponent = (value >> 4) & 0x07;
    let mantissa = i32::from(value & 0x0F);
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if value & 0x80 != 0 {
        -(magnitude as Sample)
    } else {
        magnitude as Sample
    }
}

/// Compress a linear sample to an A-law codeword
pub fn linear_to_alaw(pcm: Sample) -> u8 {
    let mut magnitude = i32::from(pcm);
    let sign = ((!magnitude) >> 8) as u8 & 0x80;
    if sign == 0 {
        magnitude = -magnitude;
    }
    if magnitude > G711_CLIP {
        magnitude = G711_CLIP;
    }

    let alaw = if magnitude >= 256 {
        let exponent = 31 - (magnitude as u32).leading_zeros() as i32 - 7;
        let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
        ((exponent << 4) | mantissa) as u8
    } else {
        (magnitude >> 4) as u8
    };

    (alaw ^ sign) ^ 0x55
}

/// Expand an A-law codeword to a linear sample
pub fn alaw_to_linear(codeword: u8) -> Sample {
    let value = codeword ^ 0x55;
    let mut magnitude = i32::from(value & 0x0F) << 4;
    let exponent = (value >> 4) & 0x07;
    match exponent {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= exponent - 1;
        }
    }
    if value & 0x80 != 0 {
        magnitude as Sample
    } else {
        -(magnitude as Sample)
    }
}

static MULAW_TABLE: Lazy<[Sample; 256]> = Lazy::new(|| {
    let mut table = [0; 256];
    for (codeword, entry) in table.iter_mut().enumerate() {
        *entry = mulaw_to_linear(codeword as u8);
    }
    table
});

static ALAW_TABLE: Lazy<[Sample; 256]> = Lazy::new(|| {
    let mut table = [0; 256];
    for (codeword, entry) in table.iter_mut().enumerate() {
        *entry = alaw_to_linear(codeword as u8);
    }
    table
});

/// G.711 to linear PCM decoder
pub struct G711Decoder {
    variant: G711Variant,
    input: MediaFormat,
    output: MediaFormat,
    max_output_size: Option<usize>,
}

impl G711Decoder {
    /// Create a decoder for the given variant
    pub fn new(variant: G711Variant) -> Self {
        Self {
            variant,
            input: variant.compressed_format(),
            output: MediaFormat::l16(),
            max_output_size: None,
        }
    }
}

impl Transcoder for G711Decoder {
    fn input_format(&self) -> MediaFormat {
        self.input.clone()
    }

    fn output_format(&self) -> MediaFormat {
        self.output.clone()
    }

    fn convert_frames(&mut self, input: &MediaFrame, output: &mut Vec<MediaFrame>) -> bool {
        let table: &[Sample; 256] = match self.variant {
            G711Variant::MuLaw => &MULAW_TABLE,
            G711Variant::ALaw => &ALAW_TABLE,
        };

        let mut codewords = input.payload();
        if let Some(max) = self.max_output_size {
            let max_samples = max / 2;
            if codewords.len() > max_samples {
                trace!(
                    "G.711 decode truncating {} samples to output bound {}",
                    codewords.len(),
                    max_samples
                );
                codewords = &codewords[..max_samples];
            }
        }

        let samples: Vec<Sample> = codewords.iter().map(|&c| table[c as usize]).collect();

        let mut frame = MediaFrame::new(input.header, samples.len() * 2);
        frame.header.payload_type = self.output.payload_type();
        if frame.set_payload(bytemuck::cast_slice(&samples)).is_err() {
            return false;
        }
        output.push(frame);
        true
    }

    fn optimal_data_size(&self, is_input: bool) -> usize {
        if is_input {
            self.input.frame_size()
        } else {
            self.output.frame_size()
        }
    }

    fn set_max_output_size(&mut self, size: usize) {
        self.max_output_size = Some(size);
    }
}

/// Linear PCM to G.711 encoder
pub struct G711Encoder {
    variant: G711Variant,
    input: MediaFormat,
    output: MediaFormat,
    max_output_size: Option<usize>,
}

impl G711Encoder {
    /// Create an encoder for the given variant
    pub fn new(variant: G711Variant) -> Self {
        Self {
            variant,
            input: MediaFormat::l16(),
            output: variant.compressed_format(),
            max_output_size: None,
        }
    }
}

impl Transcoder for G711Encoder {
    fn input_format(&self) -> MediaFormat {
        self.input.clone()
    }

    fn output_format(&self) -> MediaFormat {
        self.output.clone()
    }

    fn convert_frames(&mut self, input: &MediaFrame, output: &mut Vec<MediaFrame>) -> bool {
        let payload = input.payload();
        if payload.len() % 2 != 0 {
            trace!("G.711 encode rejecting odd-length linear payload");
            return false;
        }

        let compress = match self.variant {
            G711Variant::MuLaw => linear_to_mulaw,
            G711Variant::ALaw => linear_to_alaw,
        };

        let mut codewords: Vec<u8> = payload
            .chunks_exact(2)
            .map(|pair| compress(Sample::from_ne_bytes([pair[0], pair[1]])))
            .collect();
        if let Some(max) = self.max_output_size {
            codewords.truncate(max);
        }

        let mut frame = MediaFrame::new(input.header, codewords.len());
        frame.header.payload_type = self.output.payload_type();
        if frame.set_payload(&codewords).is_err() {
            return false;
        }
        output.push(frame);
        true
    }

    fn optimal_data_size(&self, is_input: bool) -> usize {
        if is_input {
            self.input.frame_size()
        } else {
            self.output.frame_size()
        }
    }

    fn set_max_output_size(&mut self, size: usize) {
        self.max_output_size = Some(size);
    }
}

/// Register the four built-in G.711 converters
pub fn register(registry: &mut TranscoderRegistry) {
    let l16 = MediaFormat::l16();
    for variant in [G711Variant::MuLaw, G711Variant::ALaw] {
        let compressed = variant.compressed_format();
        registry.register(&compressed, &l16, move || Box::new(G711Decoder::new(variant)));
        registry.register(&l16, &compressed, move || Box::new(G711Encoder::new(variant)));
    }
}

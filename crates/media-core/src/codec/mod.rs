//! Transcoder contract and registry
//!
//! A transcoder is a stateful converter between two media formats,
//! operating frame by frame with internal buffering: one input frame may
//! yield zero, one or many output frames. Transcoders are created
//! through an explicitly constructed [`TranscoderRegistry`] keyed by
//! format pair, so tests can inject fakes and multiple registries can
//! coexist.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use softbridge_frame_core::{MediaFormat, MediaFrame};

pub mod g711;

pub use g711::{G711Decoder, G711Encoder, G711Variant};

/// Out-of-band command routed through a patch to its codec chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCommand {
    /// Request a video intra frame refresh
    UpdatePicture,
    /// Implementation-defined command
    Custom(String),
}

/// A stateful converter between two media formats
pub trait Transcoder: Send {
    /// Get the format consumed by this transcoder
    fn input_format(&self) -> MediaFormat;

    /// Get the format produced by this transcoder
    fn output_format(&self) -> MediaFormat;

    /// Convert one input frame into zero or more output frames
    ///
    /// An encoder may buffer several input frames before producing one
    /// output frame, or produce several outputs per input. Output frame
    /// timestamps are assigned by the transcoder and carry through to
    /// the wire. Returns false on conversion failure.
    fn convert_frames(&mut self, input: &MediaFrame, output: &mut Vec<MediaFrame>) -> bool;

    /// Preferred frame size in bytes for the input or output side
    fn optimal_data_size(&self, is_input: bool) -> usize;

    /// Bound the size of produced frames
    fn set_max_output_size(&mut self, _size: usize) {}

    /// Whether comfort noise frames should be fed through this transcoder
    fn accepts_comfort_noise(&self) -> bool {
        false
    }

    /// Whether empty-payload frames should be fed through this transcoder
    fn accepts_empty_payload(&self) -> bool {
        false
    }

    /// Ask the transcoder to adapt to a changed media format
    fn update_media_format(&mut self, _format: &MediaFormat) -> bool {
        false
    }

    /// Deliver an out-of-band media command
    fn execute_command(&mut self, _command: &MediaCommand) -> bool {
        false
    }
}

type TranscoderFactory = Box<dyn Fn() -> Box<dyn Transcoder> + Send + Sync>;

struct RegistryEntry {
    output: MediaFormat,
    factory: TranscoderFactory,
}

/// Factory registry keyed by (input, output) format pair
///
/// An explicit object rather than process-wide state: the patch and its
/// sink resolution logic take the registry by reference.
#[derive(Default)]
pub struct TranscoderRegistry {
    entries: BTreeMap<(String, String), RegistryEntry>,
}

impl TranscoderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in G.711 converters registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        g711::register(&mut registry);
        registry
    }

    /// Register a factory for the (input, output) format pair
    pub fn register(
        &mut self,
        input: &MediaFormat,
        output: &MediaFormat,
        factory: impl Fn() -> Box<dyn Transcoder> + Send + Sync + 'static,
    ) {
        trace!("registering transcoder {} -> {}", input, output);
        self.entries.insert(
            (input.name().to_string(), output.name().to_string()),
            RegistryEntry {
                output: output.clone(),
                factory: Box::new(factory),
            },
        );
    }

    /// Check whether a direct converter exists for the format pair
    pub fn is_registered(&self, input: &MediaFormat, output: &MediaFormat) -> bool {
        self.entries
            .contains_key(&(input.name().to_string(), output.name().to_string()))
    }

    /// Create a transcoder for the format pair, if one is registered
    ///
    /// The correlation id ties the created instance to the patch it will
    /// serve in log output.
    pub fn create(
        &self,
        input: &MediaFormat,
        output: &MediaFormat,
        correlation: &str,
    ) -> Option<Box<dyn Transcoder>> {
        let entry = self
            .entries
            .get(&(input.name().to_string(), output.name().to_string()))?;
        debug!(correlation, "created transcoder {} -> {}", input, output);
        Some((entry.factory)())
    }

    /// Find a bridging format reachable from `input` and onward to `output`
    ///
    /// Used to chain two converters when no direct one exists. Returns
    /// the first intermediate in registration-key order, so resolution
    /// is deterministic.
    pub fn find_intermediate(
        &self,
        input: &MediaFormat,
        output: &MediaFormat,
    ) -> Option<MediaFormat> {
        for ((from, via), entry) in &self.entries {
            if from != input.name() || via == output.name() || via == input.name() {
                continue;
            }
            if self
                .entries
                .contains_key(&(via.clone(), output.name().to_string()))
            {
                return Some(entry.output.clone());
            }
        }
        None
    }

    /// Number of registered format pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use softbridge_frame_core::{MediaKind, PayloadType};

    fn fmt(name: &str) -> MediaFormat {
        MediaFormat::new(
            name,
            MediaKind::Audio,
            PayloadType::from_raw(96),
            8000,
            160,
            160,
        )
    }

    struct NopTranscoder {
        input: MediaFormat,
        output: MediaFormat,
    }

    impl Transcoder for NopTranscoder {
        fn input_format(&self) -> MediaFormat {
            self.input.clone()
        }
        fn output_format(&self) -> MediaFormat {
            self.output.clone()
        }
        fn convert_frames(&mut self, input: &MediaFrame, output: &mut Vec<MediaFrame>) -> bool {
            output.push(input.clone());
            true
        }
        fn optimal_data_size(&self, _is_input: bool) -> usize {
            160
        }
    }

    fn register_nop(registry: &mut TranscoderRegistry, input: &MediaFormat, output: &MediaFormat) {
        let (i, o) = (input.clone(), output.clone());
        registry.register(input, output, move || {
            Box::new(NopTranscoder {
                input: i.clone(),
                output: o.clone(),
            })
        });
    }

    #[test]
    fn test_create_registered_pair() {
        let mut registry = TranscoderRegistry::new();
        let (a, b) = (fmt("A"), fmt("B"));
        register_nop(&mut registry, &a, &b);

        assert!(registry.is_registered(&a, &b));
        assert!(!registry.is_registered(&b, &a));

        let transcoder = registry.create(&a, &b, "test").unwrap();
        assert_eq!(transcoder.output_format(), b);
        assert!(registry.create(&b, &a, "test").is_none());
    }

    #[test]
    fn test_find_intermediate() {
        let mut registry = TranscoderRegistry::new();
        let (a, i, b) = (fmt("A"), fmt("I"), fmt("B"));
        register_nop(&mut registry, &a, &i);
        register_nop(&mut registry, &i, &b);

        // No direct A -> B, but A -> I -> B bridges
        assert!(!registry.is_registered(&a, &b));
        assert_eq!(registry.find_intermediate(&a, &b).unwrap(), i);

        // No path at all in the reverse direction
        assert!(registry.find_intermediate(&b, &a).is_none());
    }

    #[test]
    fn test_intermediate_ignores_direct_and_self_pairs() {
        let mut registry = TranscoderRegistry::new();
        let (a, b) = (fmt("A"), fmt("B"));
        register_nop(&mut registry, &a, &b);

        // A direct pair is not an intermediate path
        assert!(registry.find_intermediate(&a, &b).is_none());
    }

    #[test]
    fn test_default_registry_bridges_g711() {
        let registry = TranscoderRegistry::with_defaults();
        let (pcmu, pcma, l16) = (
            MediaFormat::pcmu(),
            MediaFormat::pcma(),
            MediaFormat::l16(),
        );

        assert!(registry.is_registered(&pcmu, &l16));
        assert!(registry.is_registered(&l16, &pcma));
        // PCMU -> PCMA has no direct converter but bridges through L16
        assert!(!registry.is_registered(&pcmu, &pcma));
        assert_eq!(registry.find_intermediate(&pcmu, &pcma).unwrap(), l16);
    }
}

//! Narration pipeline for murmur.
//!
//! Turns a stream of chat messages into sequentially played synthesized
//! speech. Two cooperating state machines do the work: a generation queue
//! (sanitize → resolve voice → call the TTS provider) and a playback queue
//! (one shared audio sink, strict FIFO), bridged by a streaming contract and
//! driven by the [`Narrator`] orchestrator's cooperative tick. One bad job
//! never stalls the pipeline — failures drop only the job that caused them.
//!
//! Speech providers are pluggable [`TtsProvider`] capabilities registered by
//! name in a [`ProviderRegistry`]; audio output goes through the
//! [`AudioSink`] abstraction (system playback via [`RodioSink`], or anything
//! a host injects).

pub mod error;
pub mod narrator;
pub mod pipeline;
pub mod provider;
pub mod sanitize;
pub mod segment;
pub mod sink;
pub mod voices;

// Re-export key types for convenience
pub use error::TtsError;
pub use narrator::{DEFAULT_TICK_PERIOD, Narrator};
pub use pipeline::{
    AudioArtifact, AudioPayload, GenerationState, NarrationJob, PipelineState, PlaybackState,
};
pub use provider::{ProviderRegistry, TtsProvider, TtsResponse, Voice};
pub use sanitize::{SanitizeOptions, sanitize};
pub use sink::{AudioSink, CompletionCallback, RodioSink};
pub use voices::{
    DEFAULT_VOICE_KEY, DISABLED_VOICE_MARKER, Resolution, VoiceMap, VoiceSelector,
};

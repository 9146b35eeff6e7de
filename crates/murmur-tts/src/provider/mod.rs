//! Provider capability — the engine-agnostic speech synthesis interface.
//!
//! A [`TtsProvider`] turns sanitized text plus a concrete voice id into one
//! or more audio payloads and supplies a voice catalog. The pipeline operates
//! on trait objects (`Box<dyn TtsProvider>`) so concrete backends can be
//! swapped without touching queue logic; implementations are registered in a
//! [`ProviderRegistry`] under stable names and constructed at configuration
//! time.

pub mod openai_compat;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TtsError;
use crate::pipeline::AudioPayload;
use crate::sanitize::DEFAULT_SEPARATOR;

// ── Shared types ───────────────────────────────────────────────────

/// One entry of a provider's voice catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    /// Identifier used in generation calls.
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    /// Language/accent code (e.g. `"en-US"`).
    pub lang: String,
}

impl Voice {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Result of one generation call: a single payload, or a finite,
/// forward-only, non-restartable sequence of payloads.
///
/// Stream elements must be forwarded as they are produced — consumers never
/// buffer the whole sequence before the first element.
pub enum TtsResponse {
    /// The whole narration as one payload.
    Audio(AudioPayload),

    /// A lazy sequence of payloads, yielded in playback order.
    Stream(BoxStream<'static, Result<AudioPayload, TtsError>>),
}

impl TtsResponse {
    /// Wrap raw audio bytes as a single-payload response.
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        Self::Audio(AudioPayload::Bytes(data))
    }

    /// Build a streaming response from pre-computed chunks (used by tests
    /// and by providers that segment internally).
    #[must_use]
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<AudioPayload, TtsError>>,
        I::IntoIter: Send + 'static,
    {
        Self::Stream(Box::pin(futures_util::stream::iter(chunks)))
    }
}

impl std::fmt::Debug for TtsResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio(payload) => f.debug_tuple("Audio").field(payload).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ── Provider trait ─────────────────────────────────────────────────

/// Engine-agnostic text-to-speech capability.
///
/// Implementations must be `Send + Sync`; the pipeline holds them behind an
/// async lock across `.await` points.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Stable registry name of this provider.
    fn name(&self) -> &'static str;

    /// Separator used to join extracted quoted spans for this provider.
    fn separator(&self) -> &str {
        DEFAULT_SEPARATOR
    }

    /// Apply this provider's settings block (from the persisted per-provider
    /// configuration).
    async fn load_settings(&mut self, block: &serde_json::Value) -> Result<(), TtsError>;

    /// Whether the provider is configured/reachable enough to generate.
    /// Used to gate pipeline activation.
    async fn check_ready(&self) -> Result<(), TtsError>;

    /// The provider's voice catalog, in its preferred display order.
    ///
    /// Implementations may cache the catalog; [`Self::invalidate_voices`] is
    /// called when settings change.
    async fn list_voices(&self) -> Result<Vec<Voice>, TtsError>;

    /// Match a voice selector (display name or raw id) against the catalog.
    async fn resolve_voice(&self, selector: &str) -> Result<Voice, TtsError> {
        self.list_voices()
            .await?
            .into_iter()
            .find(|voice| voice.name == selector || voice.id == selector)
            .ok_or_else(|| TtsError::VoiceNotFound(selector.to_string()))
    }

    /// Generate speech for sanitized text with a concrete voice id.
    async fn generate(&self, text: &str, voice_id: &str) -> Result<TtsResponse, TtsError>;

    /// Drop any cached voice catalog. Called on settings changes.
    fn invalidate_voices(&mut self) {}
}

// ── Registry ───────────────────────────────────────────────────────

type ProviderFactory = Box<dyn Fn() -> Box<dyn TtsProvider> + Send + Sync>;

/// Named provider constructors, selected at configuration time.
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with all built-in providers registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(openai_compat::PROVIDER_NAME, || {
            Box::new(openai_compat::OpenAiCompatProvider::new())
        });
        registry
    }

    /// Register a provider constructor under a stable name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn TtsProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Construct a provider by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn TtsProvider>, TtsError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| TtsError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

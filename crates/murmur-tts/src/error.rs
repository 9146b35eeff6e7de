//! Narration pipeline error types.
//!
//! Skips (disabled speaker, empty sanitized text) are deliberately *not*
//! errors — they are modeled as control flow in the generation worker. Every
//! variant here is a reported failure that drops exactly one job or artifact
//! and leaves the rest of the pipeline running.

/// Errors that can occur in the narration pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The resolved voice selector has no match in the provider catalog.
    #[error("Voice '{0}' not found in the provider's voice list")]
    VoiceNotFound(String),

    /// Network/HTTP transport failure while talking to the provider.
    #[error("Provider request failed: {0}")]
    Http(String),

    /// The provider responded, but not with usable audio.
    #[error("Provider returned an invalid audio payload: {0}")]
    BadPayload(String),

    /// The provider reported an error of its own.
    #[error("Provider error: {0}")]
    Api(String),

    /// The provider is not configured/reachable enough to generate.
    #[error("Provider is not ready: {0}")]
    NotReady(String),

    /// No provider is registered under the requested name.
    #[error("Unknown TTS provider '{0}'")]
    UnknownProvider(String),

    /// The per-provider settings block could not be applied.
    #[error("Invalid provider settings: {0}")]
    Settings(String),

    /// The audio sink failed to start playback.
    #[error("Audio playback failed: {0}")]
    Playback(String),
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for TtsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Settings(e.to_string())
    }
}

//! OpenAI-compatible speech endpoint provider.
//!
//! Talks to any server exposing the `POST {base_url}/v1/audio/speech` shape
//! (OpenAI itself, or the many self-hosted lookalikes). One request yields
//! one encoded audio payload; the voice catalog comes from the settings
//! block so self-hosted servers can advertise their own voices.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TtsError;
use crate::provider::{TtsProvider, TtsResponse, Voice};

/// Stable registry name.
pub const PROVIDER_NAME: &str = "openai-compatible";

/// Voice names offered when the settings block does not override them.
const DEFAULT_VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Settings block for the OpenAI-compatible provider.
///
/// Stored inside the per-provider configuration; unknown keys in the block
/// (e.g. the voice map, which the pipeline reads separately) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiCompatSettings {
    /// Server base URL, e.g. `https://api.openai.com`.
    pub base_url: String,

    /// Bearer token; may be empty for unauthenticated local servers.
    pub api_key: String,

    /// Model name sent with each request.
    pub model: String,

    /// Speed multiplier sent with each request.
    pub speed: f32,

    /// Available voice ids. Empty means the standard six OpenAI voices.
    pub available_voices: Vec<String>,
}

impl Default for OpenAiCompatSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            speed: 1.0,
            available_voices: Vec::new(),
        }
    }
}

/// Provider implementation for OpenAI-compatible speech endpoints.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    settings: OpenAiCompatSettings,
}

impl OpenAiCompatProvider {
    /// Create a provider with default (unconfigured) settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: OpenAiCompatSettings::default(),
        }
    }

    fn voices(&self) -> Vec<Voice> {
        let names: Vec<String> = if self.settings.available_voices.is_empty() {
            DEFAULT_VOICES.iter().map(ToString::to_string).collect()
        } else {
            self.settings.available_voices.clone()
        };
        names
            .into_iter()
            .map(|name| Voice::new(name.clone(), name, "en-US"))
            .collect()
    }

    fn speech_url(&self) -> String {
        format!(
            "{}/v1/audio/speech",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

impl Default for OpenAiCompatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[async_trait]
impl TtsProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn load_settings(&mut self, block: &serde_json::Value) -> Result<(), TtsError> {
        self.settings = serde_json::from_value(block.clone())?;
        Ok(())
    }

    async fn check_ready(&self) -> Result<(), TtsError> {
        if self.settings.base_url.is_empty() {
            return Err(TtsError::NotReady(
                "no base URL configured for the speech endpoint".to_string(),
            ));
        }
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, TtsError> {
        Ok(self.voices())
    }

    async fn generate(&self, text: &str, voice_id: &str) -> Result<TtsResponse, TtsError> {
        self.check_ready().await?;

        let request = SpeechRequest {
            model: &self.settings.model,
            input: text,
            voice: voice_id,
            speed: self.settings.speed,
            response_format: "mp3",
        };

        let mut builder = self.client.post(self.speech_url()).json(&request);
        if !self.settings.api_key.is_empty() {
            builder = builder.bearer_auth(&self.settings.api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Api(format!("speech endpoint {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("audio/") && !content_type.starts_with("application/octet") {
            return Err(TtsError::BadPayload(format!(
                "expected audio/*, got '{content_type}'"
            )));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice = voice_id, "Speech generated");
        Ok(TtsResponse::bytes(audio.to_vec()))
    }
}

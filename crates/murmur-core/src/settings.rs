//! Narration settings — the persisted configuration surface.
//!
//! These are pure domain types; persistence goes through the
//! [`SettingsStore`](crate::ports::SettingsStore) port. Every field has a
//! serde default so configuration files written by older versions keep
//! loading after upgrades.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default playback rate (1.0 = natural speed).
pub const DEFAULT_PLAYBACK_RATE: f32 = 1.0;

/// Narration pipeline settings.
///
/// The filter flags correspond one-to-one to the sanitization and enqueue
/// options the pipeline applies; `providers` holds one opaque JSON block per
/// provider (connection details plus that provider's voice map), keyed by the
/// provider's stable registry name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationSettings {
    /// Master switch — nothing runs while disabled.
    pub enabled: bool,

    /// Narrate new messages automatically as they are rendered.
    pub auto_generation: bool,

    /// While a message is still streaming in, narrate completed paragraphs
    /// incrementally instead of waiting for the full message.
    pub periodic_auto_generation: bool,

    /// Narrate user-authored messages too.
    pub narrate_user: bool,

    /// Strip `*action*` spans so only spoken dialogue is voiced.
    pub narrate_dialogues_only: bool,

    /// Narrate only double-quoted spans, joined by the provider separator.
    pub narrate_quoted_only: bool,

    /// Narrate only messages that carry translated display text.
    pub narrate_translated_only: bool,

    /// Split each message into one narration job per paragraph.
    pub narrate_by_paragraphs: bool,

    /// Remove indented and fenced code blocks before narration.
    pub skip_codeblocks: bool,

    /// Remove paired markup tags (content included) before narration.
    pub skip_tags: bool,

    /// Leave asterisks untouched instead of stripping them.
    pub pass_asterisks: bool,

    /// Whether a leading `Speaker:` prefix is kept in narrated text.
    pub show_speaker_name: bool,

    /// Playback rate applied when an artifact starts playing.
    pub playback_rate: f32,

    /// Stable registry name of the active provider.
    pub current_provider: String,

    /// Per-provider settings blocks, keyed by stable provider name.
    pub providers: HashMap<String, serde_json::Value>,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_generation: true,
            periodic_auto_generation: false,
            narrate_user: false,
            narrate_dialogues_only: false,
            narrate_quoted_only: false,
            narrate_translated_only: false,
            narrate_by_paragraphs: false,
            skip_codeblocks: false,
            skip_tags: false,
            pass_asterisks: false,
            show_speaker_name: false,
            playback_rate: DEFAULT_PLAYBACK_RATE,
            current_provider: String::new(),
            providers: HashMap::new(),
        }
    }
}

impl NarrationSettings {
    /// The settings block for `provider`, or an empty object if none stored.
    #[must_use]
    pub fn provider_block(&self, provider: &str) -> serde_json::Value {
        self.providers
            .get(provider)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Replace the settings block for `provider`.
    pub fn set_provider_block(&mut self, provider: impl Into<String>, block: serde_json::Value) {
        self.providers.insert(provider.into(), block);
    }

    /// Playback rate clamped to a sane audible range.
    #[must_use]
    pub fn effective_playback_rate(&self) -> f32 {
        self.playback_rate.clamp(0.25, 4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let settings = NarrationSettings::default();
        assert!(!settings.enabled);
        assert!(settings.auto_generation);
        assert!(!settings.narrate_user);
        assert!((settings.playback_rate - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_config_files_load_with_defaults() {
        let settings: NarrationSettings =
            serde_json::from_str(r#"{ "enabled": true, "playback_rate": 1.5 }"#).unwrap();
        assert!(settings.enabled);
        assert!((settings.playback_rate - 1.5).abs() < f32::EPSILON);
        assert!(settings.auto_generation);
    }

    #[test]
    fn provider_block_defaults_to_empty_object() {
        let mut settings = NarrationSettings::default();
        assert!(settings.provider_block("nope").as_object().unwrap().is_empty());

        settings.set_provider_block("alpha", serde_json::json!({ "api_key": "k" }));
        assert_eq!(settings.provider_block("alpha")["api_key"], "k");
    }

    #[test]
    fn playback_rate_is_clamped() {
        let settings = NarrationSettings {
            playback_rate: 80.0,
            ..NarrationSettings::default()
        };
        assert!((settings.effective_playback_rate() - 4.0).abs() < f32::EPSILON);
    }
}

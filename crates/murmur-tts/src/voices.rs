//! Per-speaker voice mapping.
//!
//! A [`VoiceMap`] maps speaker names to voice selectors: a concrete voice,
//! the default sentinel (defer to the map's reserved default entry), or the
//! disabled sentinel (suppress narration for that speaker — not an error).
//!
//! Resolution never recurses more than one hop: the default entry itself must
//! hold a concrete voice or `Disabled`, which [`VoiceMap::set`] enforces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reserved map key for the fallback entry.
pub const DEFAULT_VOICE_KEY: &str = "[Default Voice]";

/// String form of the disabled sentinel in persisted maps.
pub const DISABLED_VOICE_MARKER: &str = "disabled";

/// What a speaker's map entry points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VoiceSelector {
    /// A concrete voice, by catalog display name or raw id.
    Voice(String),

    /// Defer to the map's default entry.
    Default,

    /// Narration is suppressed for this speaker.
    Disabled,
}

impl From<String> for VoiceSelector {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            DEFAULT_VOICE_KEY => Self::Default,
            DISABLED_VOICE_MARKER => Self::Disabled,
            _ => Self::Voice(raw),
        }
    }
}

impl From<VoiceSelector> for String {
    fn from(selector: VoiceSelector) -> Self {
        match selector {
            VoiceSelector::Voice(v) => v,
            VoiceSelector::Default => DEFAULT_VOICE_KEY.to_string(),
            VoiceSelector::Disabled => DISABLED_VOICE_MARKER.to_string(),
        }
    }
}

/// Outcome of resolving a speaker against the map.
///
/// `Voice` still names a *selector* (display name or id); matching it against
/// the provider catalog happens afterwards and is where "not found" errors
/// come from. `Disabled` is a silent skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Voice(String),
    Disabled,
}

/// Speaker → voice selector table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceMap {
    entries: BTreeMap<String, VoiceSelector>,
}

impl VoiceMap {
    /// Create an empty map (everything resolves to `Disabled`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a speaker's selector.
    ///
    /// Assigning `Default` to the reserved default entry would make
    /// resolution circular; such an assignment is coerced to `Disabled`.
    pub fn set(&mut self, speaker: impl Into<String>, selector: VoiceSelector) {
        let speaker = speaker.into();
        let selector = if speaker == DEFAULT_VOICE_KEY && selector == VoiceSelector::Default {
            tracing::warn!("Default voice entry cannot defer to itself; treating as disabled");
            VoiceSelector::Disabled
        } else {
            selector
        };
        self.entries.insert(speaker, selector);
    }

    /// Get a speaker's explicit entry, if present.
    #[must_use]
    pub fn get(&self, speaker: &str) -> Option<&VoiceSelector> {
        self.entries.get(speaker)
    }

    /// Resolve a speaker to a voice selector or a silent skip.
    ///
    /// An absent speaker falls back to the default entry's target; the
    /// `Default` sentinel re-looks-up the default entry exactly once. A
    /// missing or disabled default yields `Disabled`.
    #[must_use]
    pub fn resolve(&self, speaker: &str) -> Resolution {
        let entry = self
            .entries
            .get(speaker)
            .cloned()
            .unwrap_or(VoiceSelector::Default);

        let entry = match entry {
            VoiceSelector::Default => self
                .entries
                .get(DEFAULT_VOICE_KEY)
                .cloned()
                .unwrap_or(VoiceSelector::Disabled),
            other => other,
        };

        match entry {
            VoiceSelector::Voice(v) => Resolution::Voice(v),
            // `set` keeps `Default` out of the default entry; anything that
            // is not a concrete voice at this point is a skip.
            _ => Resolution::Disabled,
        }
    }

    /// Parse the compact `"Name:voice, Other:disabled"` form used by older
    /// configuration files. Malformed fragments are skipped.
    #[must_use]
    pub fn parse(compact: &str) -> Self {
        let mut map = Self::new();
        for part in compact.split(',') {
            if let Some((speaker, selector)) = part.split_once(':') {
                let speaker = speaker.trim();
                let selector = selector.trim();
                if !speaker.is_empty() && !selector.is_empty() {
                    map.set(speaker, VoiceSelector::from(selector.to_string()));
                }
            }
        }
        map
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in speaker order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VoiceSelector)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_voice_resolves() {
        let mut map = VoiceMap::new();
        map.set("Aria", VoiceSelector::Voice("nova".to_string()));
        assert_eq!(map.resolve("Aria"), Resolution::Voice("nova".to_string()));
    }

    #[test]
    fn disabled_speaker_is_skipped() {
        let mut map = VoiceMap::new();
        map.set("Aria", VoiceSelector::Disabled);
        assert_eq!(map.resolve("Aria"), Resolution::Disabled);
    }

    #[test]
    fn absent_speaker_falls_back_to_default_entry() {
        let mut map = VoiceMap::new();
        map.set(DEFAULT_VOICE_KEY, VoiceSelector::Voice("alloy".to_string()));
        assert_eq!(
            map.resolve("Stranger"),
            Resolution::Voice("alloy".to_string())
        );
    }

    #[test]
    fn default_sentinel_follows_default_entry() {
        let mut map = VoiceMap::new();
        map.set("Aria", VoiceSelector::Default);
        map.set(DEFAULT_VOICE_KEY, VoiceSelector::Voice("echo".to_string()));
        assert_eq!(map.resolve("Aria"), Resolution::Voice("echo".to_string()));
    }

    #[test]
    fn missing_default_entry_means_disabled() {
        let map = VoiceMap::new();
        assert_eq!(map.resolve("Anyone"), Resolution::Disabled);
    }

    #[test]
    fn default_entry_never_points_at_itself() {
        let mut map = VoiceMap::new();
        map.set(DEFAULT_VOICE_KEY, VoiceSelector::Default);
        assert_eq!(
            map.get(DEFAULT_VOICE_KEY),
            Some(&VoiceSelector::Disabled)
        );
        assert_eq!(map.resolve("Anyone"), Resolution::Disabled);
    }

    #[test]
    fn parses_compact_form() {
        let map = VoiceMap::parse("Aria: nova, Bram:disabled, broken, : x");
        assert_eq!(map.resolve("Aria"), Resolution::Voice("nova".to_string()));
        assert_eq!(map.resolve("Bram"), Resolution::Disabled);
        assert_eq!(map.iter().count(), 2);
    }

    #[test]
    fn serde_round_trips_through_plain_strings() {
        let mut map = VoiceMap::new();
        map.set("Aria", VoiceSelector::Voice("nova".to_string()));
        map.set("Bram", VoiceSelector::Disabled);
        map.set("Cleo", VoiceSelector::Default);

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["Aria"], "nova");
        assert_eq!(json["Bram"], "disabled");
        assert_eq!(json["Cleo"], DEFAULT_VOICE_KEY);

        let back: VoiceMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}

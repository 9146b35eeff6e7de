//! Chat domain types — the messages the narration pipeline reads.
//!
//! These are pure domain types with no infrastructure dependencies. The
//! pipeline never owns the chat log; it reads messages through the
//! [`ChatLog`](crate::ports::ChatLog) port.

use serde::{Deserialize, Serialize};

/// Identifier of a message within the active chat.
///
/// Message ids are positional and stable for the lifetime of a chat; they are
/// reused as keys for retained narration audio and UI affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A single chat message as seen by the narration pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Display name of the speaker.
    pub name: String,

    /// Raw message text (markup included — sanitization happens downstream).
    pub text: String,

    /// Translated/display-only text, when the host renders a different string
    /// than the raw message (e.g. a translation layer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,

    /// Whether the message was written by the user rather than a character.
    pub is_user: bool,

    /// Whether the message is a system/service message (never narrated).
    pub is_system: bool,
}

impl ChatMessage {
    /// Create a plain character message.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            display_text: None,
            is_user: false,
            is_system: false,
        }
    }

    /// Create a user-authored message.
    pub fn user(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            is_user: true,
            ..Self::new(name, text)
        }
    }

    /// The text the narration pipeline should read for this message.
    ///
    /// In translated-only mode the display text is the narration source; a
    /// message without one is not narrated at all (the caller checks).
    #[must_use]
    pub fn narration_text(&self, translated_only: bool) -> &str {
        if translated_only {
            self.display_text.as_deref().unwrap_or(&self.text)
        } else {
            &self.text
        }
    }

    /// Whether this message is a placeholder the pipeline should never voice
    /// (empty or the streaming ellipsis stub).
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.text.is_empty() || self.text == "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narration_text_prefers_display_text_in_translated_mode() {
        let mut msg = ChatMessage::new("Aria", "bonjour");
        msg.display_text = Some("hello".to_string());
        assert_eq!(msg.narration_text(true), "hello");
        assert_eq!(msg.narration_text(false), "bonjour");
    }

    #[test]
    fn placeholder_detection() {
        assert!(ChatMessage::new("Aria", "").is_placeholder());
        assert!(ChatMessage::new("Aria", "...").is_placeholder());
        assert!(!ChatMessage::new("Aria", "hi").is_placeholder());
    }
}

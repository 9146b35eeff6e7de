//! Canonical event union for everything the pipeline writes back to the UI.
//!
//! The narration pipeline never touches widgets directly; it emits
//! [`UiEvent`]s through the [`UiEventEmitter`](crate::ports::UiEventEmitter)
//! port and the host renders them (progress indicator on a message, error
//! marker, replay/download controls, menu play/stop state, toasts).
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag for frontend compatibility:
//!
//! ```json
//! { "type": "generation_started", "messageId": 4 }
//! ```

use serde::{Deserialize, Serialize};

use crate::chat::MessageId;

/// Severity of a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Events the narration pipeline emits toward the chat surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UiEvent {
    /// Speech generation began for a message — attach a progress indicator.
    GenerationStarted { message_id: MessageId },

    /// Generation for a message finished or was abandoned — remove the
    /// progress indicator. Emitted on success, on silent skips, and when a
    /// reset interrupts an in-flight job.
    GenerationFinished { message_id: MessageId },

    /// Generation failed — replace the progress indicator with a persistent
    /// error marker.
    GenerationFailed { message_id: MessageId, error: String },

    /// Narrated audio for a message has been retained — show the replay and
    /// download controls.
    NarrationReady { message_id: MessageId },

    /// The pipeline went busy or idle — refresh the play/stop affordance.
    PlayStateChanged { processing: bool },

    /// A transient, message-independent notification (toast).
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl UiEvent {
    /// Create an informational notification.
    pub fn info(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    /// Create a warning notification.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

//! Core domain types and port definitions for murmur.
//!
//! This crate is dependency-light by design: it holds the domain types
//! (chat messages, narration settings), the canonical [`UiEvent`] union, and
//! the port traits that adapters implement ([`ChatLog`], [`UiEventEmitter`],
//! [`SettingsStore`]). The narration pipeline itself lives in `murmur-tts`
//! and depends on this crate, never the other way around.

pub mod chat;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export key types for convenience
pub use chat::{ChatMessage, MessageId};
pub use events::{NotificationLevel, UiEvent};
pub use ports::{
    ChatLog, InMemoryChatLog, JsonSettingsStore, NoopEmitter, SettingsStore, SettingsStoreError,
    UiEventEmitter,
};
pub use settings::NarrationSettings;

//! Port traits — the seams between the pipeline and its host.
//!
//! Adapters (GUI, HTTP server, tests) implement these traits; the pipeline
//! only ever sees the trait objects. No adapter types appear in signatures.

mod chat_log;
mod event_emitter;
mod settings_store;

pub use chat_log::{ChatLog, InMemoryChatLog};
pub use event_emitter::{NoopEmitter, UiEventEmitter};
pub use settings_store::{JsonSettingsStore, SettingsStore, SettingsStoreError};

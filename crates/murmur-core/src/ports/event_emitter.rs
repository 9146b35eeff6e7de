//! Event emitter trait for pipeline → UI event broadcasting.
//!
//! Implementations handle transport details (channels, SSE, desktop shell
//! events); the pipeline only calls [`UiEventEmitter::emit`].

use crate::events::UiEvent;

/// Trait for emitting UI events.
///
/// This abstraction keeps event plumbing out of the pipeline's public API
/// surface — channel types never leak into `murmur-tts`.
///
/// # Implementations
///
/// - [`NoopEmitter`] — for tests and headless contexts that don't need events
/// - Adapter-specific implementations (SSE, websocket, desktop shell)
pub trait UiEventEmitter: Send + Sync {
    /// Emit a UI event.
    ///
    /// Implementations should handle the event asynchronously or buffer it.
    /// This method must not block.
    fn emit(&self, event: UiEvent);

    /// Clone this emitter into a boxed trait object.
    ///
    /// Enables cloning of `Arc<dyn UiEventEmitter>` without requiring the
    /// underlying type to implement `Clone`.
    fn clone_box(&self) -> Box<dyn UiEventEmitter>;
}

/// A no-op event emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    /// Create a new no-op emitter.
    pub const fn new() -> Self {
        Self
    }
}

impl UiEventEmitter for NoopEmitter {
    fn emit(&self, _event: UiEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn UiEventEmitter> {
        Box::new(self.clone())
    }
}

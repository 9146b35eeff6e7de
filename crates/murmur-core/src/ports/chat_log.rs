//! Read-only chat log port — the message source the pipeline narrates from.
//!
//! The host owns the chat; the pipeline gets a shared read view. All methods
//! take `&self` so the trait is object-safe behind `Arc<dyn ChatLog>`;
//! implementations use interior locking.

use std::sync::RwLock;

use crate::chat::{ChatMessage, MessageId};

/// Read access to the active chat.
pub trait ChatLog: Send + Sync {
    /// Identifier of the currently open chat, if any.
    fn chat_id(&self) -> Option<String>;

    /// Fetch a message by id. Returns `None` for deleted/out-of-range ids.
    fn message(&self, id: MessageId) -> Option<ChatMessage>;

    /// Number of messages in the chat.
    fn len(&self) -> usize;

    /// Whether the chat has no messages.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The final message of the chat together with its id.
    fn last_message(&self) -> Option<(MessageId, ChatMessage)>;

    /// All messages in order, with their ids. Used by narrate-all.
    fn messages(&self) -> Vec<(MessageId, ChatMessage)>;
}

/// An in-memory chat log for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct InMemoryChatLog {
    inner: RwLock<InMemoryChatState>,
}

#[derive(Debug, Default)]
struct InMemoryChatState {
    chat_id: Option<String>,
    messages: Vec<Option<ChatMessage>>,
}

impl InMemoryChatLog {
    /// Create an empty chat log with the given chat id.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(InMemoryChatState {
                chat_id: Some(chat_id.into()),
                messages: Vec::new(),
            }),
        }
    }

    /// Append a message, returning its id.
    pub fn push(&self, message: ChatMessage) -> MessageId {
        let mut inner = self.inner.write().unwrap();
        inner.messages.push(Some(message));
        MessageId(inner.messages.len() as u64 - 1)
    }

    /// Replace a message in place (streaming growth, edits, swipes).
    pub fn replace(&self, id: MessageId, message: ChatMessage) {
        let mut inner = self.inner.write().unwrap();
        if let Some(slot) = inner.messages.get_mut(id.0 as usize) {
            *slot = Some(message);
        }
    }

    /// Delete a message. Ids of other messages are unaffected.
    pub fn delete(&self, id: MessageId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(slot) = inner.messages.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Switch to a different (empty) chat.
    pub fn switch_chat(&self, chat_id: impl Into<String>) {
        let mut inner = self.inner.write().unwrap();
        inner.chat_id = Some(chat_id.into());
        inner.messages.clear();
    }
}

impl ChatLog for InMemoryChatLog {
    fn chat_id(&self) -> Option<String> {
        self.inner.read().unwrap().chat_id.clone()
    }

    fn message(&self, id: MessageId) -> Option<ChatMessage> {
        let inner = self.inner.read().unwrap();
        inner.messages.get(id.0 as usize).cloned().flatten()
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap().messages.len()
    }

    fn last_message(&self) -> Option<(MessageId, ChatMessage)> {
        let inner = self.inner.read().unwrap();
        inner
            .messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, m)| m.clone().map(|m| (MessageId(i as u64), m)))
    }

    fn messages(&self) -> Vec<(MessageId, ChatMessage)> {
        let inner = self.inner.read().unwrap();
        inner
            .messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.clone().map(|m| (MessageId(i as u64), m)))
            .collect()
    }
}

//! Chat message store.

use adcanvas_core::{ChatMessage, EntityId};
use tokio::sync::{broadcast, RwLock};

use super::CHANGE_CHANNEL_CAPACITY;

/// A mutation of the chat store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChange {
    Added(ChatMessage),
    Updated(ChatMessage),
    Removed(EntityId),
    /// The whole collection was replaced; carries the ids now present.
    Replaced(Vec<EntityId>),
    Cleared,
}

/// Ordered list of chat messages (insertion order).
pub struct ChatStore {
    messages: RwLock<Vec<ChatMessage>>,
    tx: broadcast::Sender<ChatChange>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::with_capacity(CHANGE_CHANNEL_CAPACITY)
    }

    /// A store whose subscribers lag once `capacity` changes are unread.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            messages: RwLock::new(Vec::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatChange> {
        self.tx.subscribe()
    }

    /// Append a message. A message whose id is already present replaces
    /// the existing one in place.
    pub async fn add_message(&self, message: ChatMessage) {
        let mut messages = self.messages.write().await;
        if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message.clone();
            let _ = self.tx.send(ChatChange::Updated(message));
        } else {
            messages.push(message.clone());
            let _ = self.tx.send(ChatChange::Added(message));
        }
    }

    /// Apply `f` to the message with `id`. Returns `false` if there is no
    /// such message.
    pub async fn update_message<F>(&self, id: EntityId, f: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        f(message);
        message.id = id;
        let _ = self.tx.send(ChatChange::Updated(message.clone()));
        true
    }

    pub async fn remove_message(&self, id: EntityId) -> bool {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        if messages.len() == before {
            return false;
        }
        let _ = self.tx.send(ChatChange::Removed(id));
        true
    }

    /// Replace the whole collection (hydration).
    pub async fn replace_all(&self, replacement: Vec<ChatMessage>) {
        let mut messages = self.messages.write().await;
        let ids = replacement.iter().map(|m| m.id).collect();
        *messages = replacement;
        let _ = self.tx.send(ChatChange::Replaced(ids));
    }

    pub async fn clear(&self) {
        let mut messages = self.messages.write().await;
        messages.clear();
        let _ = self.tx.send(ChatChange::Cleared);
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    pub async fn get(&self, id: EntityId) -> Option<ChatMessage> {
        self.messages.read().await.iter().find(|m| m.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

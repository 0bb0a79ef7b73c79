//! Retained sticky messages awaiting consumption

use crate::events::Message;
use crate::sequence::AtomicSeq;
use tracing::debug;

/// Lock-free set of sticky messages published but not yet consumed
///
/// Messages are keyed by identity and appear at most once. With no limit
/// configured, a sticky message nobody accepts is retained for the life of
/// the store.
pub struct StickyStore {
    messages: AtomicSeq<Message>,

    /// Optional cap on retained messages (oldest evicted first)
    limit: Option<usize>,
}

impl StickyStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self {
            messages: AtomicSeq::new(),
            limit: None,
        }
    }

    /// Create a store that retains at most `limit` messages
    pub fn with_limit(limit: usize) -> Self {
        Self {
            messages: AtomicSeq::new(),
            limit: Some(limit.max(1)),
        }
    }

    /// Retain a sticky message. Inserting a message already retained is a no-op.
    pub fn insert(&self, message: Message) {
        let evicted = self
            .messages
            .push_unique(message, self.limit)
            .unwrap_or_default();
        for old in &evicted {
            debug!(id = %old.id(), kind = old.kind(), "Evicted sticky message");
        }
    }

    /// Remove `message` if retained; `true` only for the caller that removed it
    pub fn remove(&self, message: &Message) -> bool {
        self.messages.remove_first(|m| m == message)
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.messages.contains(|m| m == message)
    }

    /// Messages retained right now, in insertion order
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.snapshot().unwrap_or_default()
    }

    /// Drop every retained message, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.messages.clear().len()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StickyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StickyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickyStore")
            .field("retained", &self.len())
            .field("limit", &self.limit)
            .finish()
    }
}

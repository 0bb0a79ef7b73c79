//! Event payloads and the message envelope that carries them through the bus

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

/// Base trait for all payloads carried by the bus
///
/// `KIND` is the discriminator handlers filter on. Two payload types must not
/// share a kind, otherwise a handler for one will be offered the other and
/// its downcast will fail.
pub trait Event: Send + Sync + fmt::Debug + 'static {
    /// Event type identifier
    const KIND: &'static str;
}

/// Envelope published on the bus
///
/// Identity is assigned at construction and never reused. Clones share the
/// identity of the message they were cloned from; two messages built from
/// equal payloads are still different messages.
#[derive(Clone)]
pub struct Message {
    id: Uuid,
    timestamp_ns: i64,
    kind: &'static str,
    sticky: bool,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Message {
    /// Wrap a payload in a non-sticky message
    pub fn new<E: Event>(event: E) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        // Monotonic counter instead of Uuid::new_v4() (avoids OS RNG syscall)
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

        Self {
            id: Uuid::from_u128(u128::from(seq)),
            timestamp_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            kind: E::KIND,
            sticky: false,
            payload: Arc::new(event),
        }
    }

    /// Wrap a payload in a sticky message
    pub fn sticky<E: Event>(event: E) -> Self {
        let mut message = Self::new(event);
        message.sticky = true;
        message
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time (nanoseconds since the epoch)
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Only meaningful before the message is published.
    pub fn set_sticky(&mut self, sticky: bool) {
        self.sticky = sticky;
    }

    /// Borrow the payload as `E` if this message carries that kind
    pub fn payload<E: Event>(&self) -> Option<&E> {
        if self.kind != E::KIND {
            return None;
        }
        self.payload.downcast_ref::<E>()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.kind == E::KIND
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("sticky", &self.sticky)
            .field("timestamp_ns", &self.timestamp_ns)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    impl Event for Ping {
        const KIND: &'static str = "ping";
    }

    #[derive(Debug)]
    struct Pong;

    impl Event for Pong {
        const KIND: &'static str = "pong";
    }

    #[test]
    fn test_identity_equality() {
        let a = Message::new(Ping(1));
        let b = Message::new(Ping(1));

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_payload_downcast() {
        let message = Message::new(Ping(7));

        assert_eq!(message.kind(), "ping");
        assert!(message.is::<Ping>());
        assert_eq!(message.payload::<Ping>(), Some(&Ping(7)));
        assert!(message.payload::<Pong>().is_none());
    }

    #[test]
    fn test_sticky_flag() {
        let mut message = Message::new(Pong);
        assert!(!message.is_sticky());

        message.set_sticky(true);
        assert!(message.is_sticky());
        assert!(Message::sticky(Pong).is_sticky());
    }
}

//! Typed publishing on top of a bus handle

use crate::bus::StickyBus;
use crate::events::{Event, Message};

/// Wraps events into messages and publishes them
///
/// Holds a cloned [`StickyBus`] handle, so it can be passed to producers
/// that should not see the subscription side.
#[derive(Clone, Debug)]
pub struct Publisher {
    bus: StickyBus,
}

impl Publisher {
    pub fn new(bus: StickyBus) -> Self {
        Self { bus }
    }

    pub fn publish<E: Event>(&self, event: E) {
        self.bus.publish(Message::new(event));
    }

    /// Publish an event that late subscribers will also see until consumed
    pub fn publish_sticky<E: Event>(&self, event: E) -> Message {
        let message = Message::sticky(event);
        self.bus.publish(message.clone());
        message
    }

    /// Publish a pre-built message
    pub fn publish_message(&self, message: Message) {
        self.bus.publish(message);
    }
}

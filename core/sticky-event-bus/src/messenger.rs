//! Subscriber-facing facade: one bus plus per-subscriber lifecycle
//!
//! [`Messenger`] is what application code talks to. A subscriber registers
//! the bindings produced for it under a [`SubscriberKey`], and unregisters
//! with the same key when it is torn down. Deliveries to a subscriber whose
//! group has been cancelled are skipped even if they were already in flight.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::binding::{Binding, BindingSource};
use crate::bus::{BusStats, StickyBus};
use crate::config::BusConfig;
use crate::error::ErrorSink;
use crate::events::Message;
use crate::lifecycle::{LifecycleManager, SubscriberKey};

pub struct Messenger {
    bus: StickyBus,
    lifecycle: LifecycleManager,
}

impl Messenger {
    pub fn new() -> Self {
        Self::from_bus(StickyBus::new())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        Self::from_bus(StickyBus::with_config(config))
    }

    pub fn with_error_sink(config: &BusConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self::from_bus(StickyBus::with_error_sink(config, sink))
    }

    pub fn from_bus(bus: StickyBus) -> Self {
        Self {
            bus,
            lifecycle: LifecycleManager::new(),
        }
    }

    /// Process-wide messenger, created on first use
    ///
    /// Convenience for applications that want a single shared bus. Nothing
    /// in this crate depends on it; prefer passing an explicit `Messenger`
    /// where lifetimes allow.
    pub fn global() -> &'static Messenger {
        static GLOBAL: OnceLock<Messenger> = OnceLock::new();
        GLOBAL.get_or_init(Messenger::new)
    }

    pub fn publish(&self, message: Message) {
        self.bus.publish(message);
    }

    /// Register `bindings` for the subscriber behind `key`.
    ///
    /// Appends to any group already registered under `key`. Retained sticky
    /// messages are replayed to each new handler before this returns (or
    /// before it sees anything else, for handlers on other contexts).
    /// Returns how many subscriptions were created; 0 once the bus is
    /// terminated. A call that creates nothing leaves no group behind.
    pub fn subscribe(&self, key: SubscriberKey, bindings: &[Binding]) -> usize {
        let liveness = self.lifecycle.open(&key);
        let subscriptions: Vec<_> = bindings
            .iter()
            .filter_map(|binding| self.bus.attach(binding, Some(Arc::clone(&liveness))))
            .collect();
        let count = subscriptions.len();

        if count == 0 {
            self.lifecycle.close_if_empty(&key, &liveness);
            return 0;
        }
        if !self.lifecycle.register_opened(&key, &liveness, subscriptions) {
            return 0;
        }
        debug!(key = %key, count, "Subscriber registered");
        count
    }

    /// Resolve bindings through the binding layer, then [`subscribe`](Self::subscribe).
    ///
    /// A resolution failure registers nothing and is only logged.
    pub fn subscribe_with(&self, key: SubscriberKey, source: &dyn BindingSource) -> usize {
        match source.resolve() {
            Ok(bindings) => self.subscribe(key, &bindings),
            Err(e) => {
                warn!(key = %key, "Binding resolution failed: {}", e);
                0
            }
        }
    }

    /// Dispose every subscription registered under `key`.
    ///
    /// Returns how many were disposed; unknown keys are a no-op.
    pub fn unsubscribe(&self, key: &SubscriberKey) -> usize {
        self.lifecycle.cancel_group(key)
    }

    pub fn is_active(&self, key: &SubscriberKey) -> bool {
        self.lifecycle.is_active(key)
    }

    /// Terminate the underlying bus. Groups stay registered (inactive) until
    /// their subscribers unsubscribe.
    pub fn terminate(&self) -> bool {
        self.bus.terminate()
    }

    pub fn bus(&self) -> &StickyBus {
        &self.bus
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn stats(&self) -> BusStats {
        self.bus.stats()
    }
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("bus", &self.bus)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

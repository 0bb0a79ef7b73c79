//! Subscription handles

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::binding::CompletionHook;
use crate::context::{ExecutionContext, Lane};
use crate::events::Message;
use crate::gate::ConsumeGate;
use crate::registry::SubscriberRegistry;

pub(crate) struct SubscriptionCore {
    id: u64,
    active: AtomicBool,
    gate: ConsumeGate,
    lane: Lane,
    on_complete: Option<CompletionHook>,
    registry: Weak<SubscriberRegistry>,
}

impl SubscriptionCore {
    pub(crate) fn new(
        id: u64,
        gate: ConsumeGate,
        context: Arc<dyn ExecutionContext>,
        on_complete: Option<CompletionHook>,
        registry: Weak<SubscriberRegistry>,
    ) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            gate,
            lane: Lane::new(context),
            on_complete,
            registry,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Hand `message` to this subscription's context.
    ///
    /// Deliveries go through the subscription's lane, so the handler sees
    /// messages in the order they were handed over. The active flag is checked here and again right before the gate runs,
    /// so a delivery racing a dispose is skipped unless it already passed the
    /// second check.
    pub(crate) fn deliver(self: &Arc<Self>, message: &Message) {
        if !self.is_active() {
            trace!(subscription = self.id, "Delivery to disposed subscription skipped");
            return;
        }
        let this = Arc::clone(self);
        let message = message.clone();
        self.lane.submit(Box::new(move || {
            if this.is_active() {
                this.gate.accept(&message, this.id);
            }
        }));
    }

    /// Terminal signal from the bus. Runs the completion hook at most once
    /// and leaves the subscription disposed.
    pub(crate) fn complete(&self) {
        if !self.deactivate() {
            return;
        }
        if let Some(hook) = &self.on_complete {
            let hook = Arc::clone(hook);
            self.lane.submit(Box::new(move || hook()));
        }
    }

    fn deactivate(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn dispose(&self) {
        if self.deactivate() {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self);
            }
            debug!(subscription = self.id, kind = self.gate.kind(), "Subscription disposed");
        }
    }
}

/// One handler's attachment to a bus
///
/// Cloning yields another handle to the same subscription. Disposal is
/// one-way and idempotent; a delivery already past its active check when
/// `dispose` runs may still complete afterwards.
#[derive(Clone)]
pub struct Subscription {
    core: Arc<SubscriptionCore>,
}

impl Subscription {
    pub(crate) fn new(core: Arc<SubscriptionCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Kind of message this subscription handles
    pub fn kind(&self) -> &'static str {
        self.core.gate.kind()
    }

    pub fn dispose(&self) {
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !self.core.is_active()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.core.id)
            .field("kind", &self.kind())
            .field("context", &self.core.lane.name())
            .field("pending", &self.core.lane.pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

//! Subscriber registry: copy-on-write list of live subscriptions

use std::sync::Arc;

use tracing::trace;

use crate::sequence::AtomicSeq;
use crate::subscription::SubscriptionCore;

/// Active subscriptions of one bus, in registration order
///
/// Terminating seals the list: it empties once and rejects every later `add`.
pub(crate) struct SubscriberRegistry {
    subscriptions: AtomicSeq<Arc<SubscriptionCore>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: AtomicSeq::new(),
        }
    }

    /// Register `subscription` and run `on_added` for it before returning.
    ///
    /// Returns `false` (and skips `on_added`) once terminated.
    pub(crate) fn add(
        &self,
        subscription: &Arc<SubscriptionCore>,
        on_added: impl FnOnce(&Arc<SubscriptionCore>),
    ) -> bool {
        if !self.subscriptions.push(Arc::clone(subscription)) {
            trace!(subscription = subscription.id(), "Registry terminated, add rejected");
            return false;
        }
        on_added(subscription);
        true
    }

    /// Drop `subscription` if present
    pub(crate) fn remove(&self, subscription: &SubscriptionCore) {
        self.subscriptions
            .remove_first(|s| std::ptr::eq(Arc::as_ptr(s), subscription));
    }

    /// Subscriptions at this instant; empty once terminated
    pub(crate) fn snapshot(&self) -> Vec<Arc<SubscriptionCore>> {
        self.subscriptions.snapshot().unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.subscriptions.is_sealed()
    }

    /// Evict everything and refuse further adds.
    ///
    /// Returns the evicted subscriptions, or `None` if already terminated.
    pub(crate) fn terminate(&self) -> Option<Vec<Arc<SubscriptionCore>>> {
        self.subscriptions.seal()
    }
}

//! Core sticky bus implementation

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::binding::Binding;
use crate::config::BusConfig;
use crate::error::{default_sink, ErrorSink};
use crate::events::Message;
use crate::gate::ConsumeGate;
use crate::lifecycle::Liveness;
use crate::registry::SubscriberRegistry;
use crate::sticky::StickyStore;
use crate::subscription::{Subscription, SubscriptionCore};

/// Counters shared by the bus and its gates
#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    published: AtomicU64,
    sticky_published: AtomicU64,
    delivered: AtomicU64,
    consumed: AtomicU64,
    failures: AtomicU64,
}

impl BusCounters {
    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            sticky_published: self.sticky_published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time bus statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub sticky_published: u64,
    /// Handler invocations
    pub delivered: u64,
    /// Sticky messages removed by an accepting handler
    pub consumed: u64,
    /// Handler invocations that errored or panicked
    pub failures: u64,
}

struct BusShared {
    registry: Arc<SubscriberRegistry>,
    store: Arc<StickyStore>,

    /// Serializes publish, add-with-replay and terminate. Reentrant so a
    /// handler running inline may publish or subscribe.
    section: ReentrantMutex<()>,

    sink: Arc<dyn ErrorSink>,
    counters: Arc<BusCounters>,
    next_subscription: AtomicU64,
}

/// Pub/sub bus with sticky replay
///
/// Cloning is cheap and yields another handle to the same bus.
///
/// # Delivery
/// - `publish` fans a message out to every live subscription in
///   registration order. Sticky messages are retained first.
/// - A new subscription is offered every retained sticky message before any
///   later publish can reach it.
/// - The first handler that accepts a retained sticky message consumes it;
///   every handler still receives it.
/// - After `terminate` the bus takes no subscriptions and ignores publishes.
/// - Each subscription sees its messages in publish order, on any context.
///
/// # Blocking
/// `publish`, `subscribe` and `terminate` share one reentrant section, so
/// adding a subscription and replaying the retained messages to it cannot
/// interleave with a publish. Registry and store edits are still lock-free,
/// but `subscribe` waits for an in-progress publish, including any
/// [`Immediate`](crate::Immediate) handlers it is running inline. A handler
/// may itself publish or subscribe on the same thread.
#[derive(Clone)]
pub struct StickyBus {
    shared: Arc<BusShared>,
}

impl StickyBus {
    /// Create a new bus
    pub fn new() -> Self {
        Self::build(StickyStore::new(), default_sink())
    }

    /// Create a bus from configuration
    pub fn with_config(config: &BusConfig) -> Self {
        Self::build(Self::store_for(config), default_sink())
    }

    /// Create a bus that reports handler failures to `sink`
    pub fn with_error_sink(config: &BusConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self::build(Self::store_for(config), sink)
    }

    fn store_for(config: &BusConfig) -> StickyStore {
        match config.sticky_limit {
            Some(limit) => StickyStore::with_limit(limit),
            None => StickyStore::new(),
        }
    }

    fn build(store: StickyStore, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            shared: Arc::new(BusShared {
                registry: Arc::new(SubscriberRegistry::new()),
                store: Arc::new(store),
                section: ReentrantMutex::new(()),
                sink,
                counters: Arc::new(BusCounters::default()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Publish a message to all current subscriptions
    pub fn publish(&self, message: Message) {
        let shared = &self.shared;
        let _section = shared.section.lock();

        if shared.registry.is_terminated() {
            trace!(id = %message.id(), "Bus terminated, publish discarded");
            return;
        }

        shared.counters.published.fetch_add(1, Ordering::Relaxed);
        if message.is_sticky() {
            shared.store.insert(message.clone());
            shared.counters.sticky_published.fetch_add(1, Ordering::Relaxed);
        }

        for subscription in shared.registry.snapshot() {
            subscription.deliver(&message);
        }
    }

    /// Attach a handler. Returns `None` once the bus is terminated.
    pub fn subscribe(&self, binding: &Binding) -> Option<Subscription> {
        self.attach(binding, None)
    }

    /// Attach a handler whose deliveries are suppressed once `liveness` is
    /// disposed
    pub(crate) fn attach(&self, binding: &Binding, liveness: Option<Arc<Liveness>>) -> Option<Subscription> {
        let shared = &self.shared;
        let id = shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let gate = ConsumeGate::new(
            binding.kind(),
            Arc::clone(binding.handler()),
            Arc::clone(&shared.store),
            liveness,
            Arc::clone(&shared.sink),
            Arc::clone(&shared.counters),
        );
        let core = Arc::new(SubscriptionCore::new(
            id,
            gate,
            Arc::clone(binding.context()),
            binding.on_complete().cloned(),
            Arc::downgrade(&shared.registry),
        ));

        let _section = shared.section.lock();
        let added = shared.registry.add(&core, |subscription| {
            for message in shared.store.snapshot() {
                subscription.deliver(&message);
            }
        });

        if !added {
            debug!(kind = binding.kind(), "Bus terminated, subscription rejected");
            return None;
        }
        debug!(subscription = id, kind = binding.kind(), "Subscribed");
        Some(Subscription::new(core))
    }

    /// Complete every subscription and refuse all further work.
    ///
    /// Returns `false` if the bus was already terminated.
    pub fn terminate(&self) -> bool {
        let shared = &self.shared;
        let _section = shared.section.lock();

        let Some(evicted) = shared.registry.terminate() else {
            return false;
        };
        let dropped = shared.store.clear();
        debug!(subscriptions = evicted.len(), dropped_sticky = dropped, "Bus terminated");

        for subscription in evicted {
            subscription.complete();
        }
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.registry.is_terminated()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Sticky messages not yet consumed
    pub fn retained(&self) -> Vec<Message> {
        self.shared.store.snapshot()
    }

    pub fn is_retained(&self, message: &Message) -> bool {
        self.shared.store.contains(message)
    }

    pub fn stats(&self) -> BusStats {
        self.shared.counters.snapshot()
    }
}

impl Default for StickyBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StickyBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StickyBus")
            .field("subscribers", &self.subscriber_count())
            .field("retained", &self.shared.store.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Immediate;
    use crate::error::HandlerFailure;
    use crate::events::Event;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    struct PriceUpdate {
        price: f64,
    }

    impl Event for PriceUpdate {
        const KIND: &'static str = "price_update";
    }

    #[derive(Debug)]
    struct Heartbeat;

    impl Event for Heartbeat {
        const KIND: &'static str = "heartbeat";
    }

    fn update(price: f64) -> PriceUpdate {
        PriceUpdate { price }
    }

    /// Binding that records every price it sees and answers `accept`
    fn recorder(accept: bool) -> (Binding, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let binding = Binding::on::<PriceUpdate, _>(Arc::new(Immediate), move |ev, _| {
            log.lock().push(ev.price);
            Ok(accept)
        });
        (binding, seen)
    }

    #[test]
    fn test_publish_subscribe() {
        let bus = StickyBus::new();
        let (binding, seen) = recorder(false);
        let _sub = bus.subscribe(&binding).unwrap();

        bus.publish(Message::new(update(6000.0)));
        bus.publish(Message::new(Heartbeat));

        assert_eq!(*seen.lock(), vec![6000.0]);
        assert_eq!(bus.stats().published, 2);
        assert_eq!(bus.stats().delivered, 1);
    }

    #[test]
    fn test_multiple_subscribers_in_order() {
        let bus = StickyBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(&Binding::on::<Heartbeat, _>(Arc::new(Immediate), move |_, _| {
                order.lock().push(tag);
                Ok(false)
            }))
            .unwrap();
        }
        bus.publish(Message::new(Heartbeat));

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_late_subscriber_gets_sticky() {
        let bus = StickyBus::new();
        bus.publish(Message::sticky(update(1.0)));
        bus.publish(Message::new(update(2.0)));

        let (binding, seen) = recorder(false);
        bus.subscribe(&binding).unwrap();

        assert_eq!(*seen.lock(), vec![1.0]);
        assert_eq!(bus.retained().len(), 1);
    }

    #[test]
    fn test_consumed_sticky_not_replayed() {
        let bus = StickyBus::new();
        let message = Message::sticky(update(1.0));
        bus.publish(message.clone());

        let (x, seen_x) = recorder(true);
        bus.subscribe(&x).unwrap();
        assert!(!bus.is_retained(&message));

        let (y, seen_y) = recorder(true);
        bus.subscribe(&y).unwrap();

        assert_eq!(*seen_x.lock(), vec![1.0]);
        assert!(seen_y.lock().is_empty());
        assert_eq!(bus.stats().consumed, 1);
    }

    #[test]
    fn test_unrelated_kind_never_consumes() {
        let bus = StickyBus::new();
        let _hb = bus
            .subscribe(&Binding::on::<Heartbeat, _>(Arc::new(Immediate), |_, _| Ok(true)))
            .unwrap();
        let message = Message::sticky(update(3.0));
        bus.publish(message.clone());

        assert!(bus.is_retained(&message));
    }

    #[test]
    fn test_disposed_subscription_stops_receiving() {
        let bus = StickyBus::new();
        let (binding, seen) = recorder(false);
        let sub = bus.subscribe(&binding).unwrap();

        bus.publish(Message::new(update(1.0)));
        sub.dispose();
        sub.dispose();
        bus.publish(Message::new(update(2.0)));

        assert!(sub.is_disposed());
        assert_eq!(*seen.lock(), vec![1.0]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_terminate_absorbs() {
        let bus = StickyBus::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&completed);
        let (binding, seen) = recorder(true);
        let sub = bus
            .subscribe(&binding.with_completion(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(bus.terminate());
        assert!(!bus.terminate());
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(sub.is_disposed());

        bus.publish(Message::sticky(update(9.0)));
        assert!(seen.lock().is_empty());
        assert!(bus.retained().is_empty());

        let (late, _) = recorder(true);
        assert!(bus.subscribe(&late).is_none());
        assert!(bus.is_terminated());
        assert!(!bus.has_subscribers());
    }

    #[test]
    fn test_handler_failure_isolated() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&failures);
        let bus = StickyBus::with_error_sink(
            &BusConfig::default(),
            Arc::new(move |failure: HandlerFailure| log.lock().push(failure.kind)),
        );

        bus.subscribe(&Binding::on::<PriceUpdate, _>(Arc::new(Immediate), |_, _| {
            anyhow::bail!("feed offline")
        }))
        .unwrap();
        let (binding, seen) = recorder(false);
        bus.subscribe(&binding).unwrap();

        bus.publish(Message::new(update(4.0)));

        assert_eq!(*seen.lock(), vec![4.0]);
        assert_eq!(*failures.lock(), vec!["price_update"]);
        assert_eq!(bus.stats().failures, 1);
    }

    #[test]
    fn test_reentrant_publish_from_handler() {
        let bus = StickyBus::new();
        let inner = bus.clone();
        bus.subscribe(&Binding::on::<PriceUpdate, _>(Arc::new(Immediate), move |_, _| {
            inner.publish(Message::new(Heartbeat));
            Ok(false)
        }))
        .unwrap();
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        bus.subscribe(&Binding::on::<Heartbeat, _>(Arc::new(Immediate), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }))
        .unwrap();

        bus.publish(Message::new(update(1.0)));
        assert_eq!(beats.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sticky_limit_from_config() {
        let bus = StickyBus::with_config(&BusConfig::default().with_sticky_limit(2));
        for i in 0..5 {
            bus.publish(Message::sticky(update(f64::from(i))));
        }

        let retained: Vec<f64> = bus
            .retained()
            .iter()
            .filter_map(|m| m.payload::<PriceUpdate>().map(|p| p.price))
            .collect();
        assert_eq!(retained, vec![3.0, 4.0]);
    }
}

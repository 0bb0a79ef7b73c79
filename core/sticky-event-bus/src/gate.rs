//! Consume gate: first accepting handler settles a sticky message
//!
//! Every registered handler of the right kind is invoked for every message it
//! is offered, consumed or not. What the gate adds is the bookkeeping: when a
//! handler accepts a sticky message that is still retained, the gate tries to
//! remove it from the store. The store's removal is existence-checked under
//! CAS, so across all handlers at most one removal succeeds.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::trace;

use crate::binding::Handler;
use crate::bus::BusCounters;
use crate::error::{ErrorSink, HandlerError, HandlerFailure};
use crate::events::Message;
use crate::lifecycle::Liveness;
use crate::sticky::StickyStore;

/// What happened to one offered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The owning subscriber is being torn down
    Stale,
    /// Kind mismatch; the handler was not called
    Filtered,
    /// The handler was called
    Delivered,
    /// The handler was called, accepted, and this call removed the message
    /// from the sticky store
    Consumed,
}

pub(crate) struct ConsumeGate {
    kind: &'static str,
    handler: Handler,
    store: Arc<StickyStore>,
    liveness: Option<Arc<Liveness>>,
    sink: Arc<dyn ErrorSink>,
    counters: Arc<BusCounters>,
}

impl ConsumeGate {
    pub(crate) fn new(
        kind: &'static str,
        handler: Handler,
        store: Arc<StickyStore>,
        liveness: Option<Arc<Liveness>>,
        sink: Arc<dyn ErrorSink>,
        counters: Arc<BusCounters>,
    ) -> Self {
        Self {
            kind,
            handler,
            store,
            liveness,
            sink,
            counters,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    pub(crate) fn accept(&self, message: &Message, subscription_id: u64) -> Delivery {
        if let Some(liveness) = &self.liveness {
            if !liveness.is_active() {
                trace!(subscription = subscription_id, id = %message.id(), "Subscriber torn down, skipping");
                return Delivery::Stale;
            }
        }

        if message.kind() != self.kind {
            return Delivery::Filtered;
        }

        // Already consumed elsewhere (or never retained): plain delivery.
        if !message.is_sticky() || !self.store.contains(message) {
            self.invoke(message, subscription_id);
            return Delivery::Delivered;
        }

        if self.invoke(message, subscription_id) && self.store.remove(message) {
            self.counters.consumed();
            trace!(subscription = subscription_id, id = %message.id(), "Sticky message consumed");
            return Delivery::Consumed;
        }

        Delivery::Delivered
    }

    /// Run the handler, routing errors and panics to the sink.
    /// A failed invocation counts as "not accepted".
    fn invoke(&self, message: &Message, subscription_id: u64) -> bool {
        self.counters.delivered();

        let outcome = match catch_unwind(AssertUnwindSafe(|| (self.handler)(message))) {
            Ok(Ok(accepted)) => return accepted,
            Ok(Err(e)) => HandlerError::Failed(e),
            Err(panic) => HandlerError::from_panic(panic),
        };

        self.counters.failed();
        self.sink.report(HandlerFailure {
            message_id: message.id(),
            kind: message.kind(),
            subscription_id,
            error: outcome,
        });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::default_sink;
    use crate::events::Event;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Order(u32);

    impl Event for Order {
        const KIND: &'static str = "order";
    }

    #[derive(Debug)]
    struct Quote;

    impl Event for Quote {
        const KIND: &'static str = "quote";
    }

    fn gate_with(store: &Arc<StickyStore>, accept: bool, calls: Arc<AtomicUsize>) -> ConsumeGate {
        let handler: Handler = Arc::new(move |_: &Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(accept)
        });
        ConsumeGate::new(
            Order::KIND,
            handler,
            Arc::clone(store),
            None,
            default_sink(),
            Arc::new(BusCounters::default()),
        )
    }

    #[test]
    fn test_non_sticky_is_delivered() {
        let store = Arc::new(StickyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&store, true, Arc::clone(&calls));

        assert_eq!(gate.accept(&Message::new(Order(1)), 1), Delivery::Delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kind_mismatch_skips_handler() {
        let store = Arc::new(StickyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&store, true, Arc::clone(&calls));
        let quote = Message::sticky(Quote);
        store.insert(quote.clone());

        assert_eq!(gate.accept(&quote, 1), Delivery::Filtered);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.contains(&quote));
    }

    #[test]
    fn test_first_acceptor_consumes() {
        let store = Arc::new(StickyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let first = gate_with(&store, true, Arc::clone(&calls));
        let second = gate_with(&store, true, Arc::clone(&calls));
        let message = Message::sticky(Order(2));
        store.insert(message.clone());

        assert_eq!(first.accept(&message, 1), Delivery::Consumed);
        assert_eq!(second.accept(&message, 2), Delivery::Delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!store.contains(&message));
    }

    #[test]
    fn test_rejecting_handler_leaves_message() {
        let store = Arc::new(StickyStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&store, false, Arc::clone(&calls));
        let message = Message::sticky(Order(3));
        store.insert(message.clone());

        assert_eq!(gate.accept(&message, 1), Delivery::Delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.contains(&message));
    }

    #[test]
    fn test_stale_subscriber_is_skipped() {
        let store = Arc::new(StickyStore::new());
        let liveness = Arc::new(Liveness::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Handler = Arc::new(move |_: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });
        let gate = ConsumeGate::new(
            Order::KIND,
            handler,
            store,
            Some(Arc::clone(&liveness)),
            default_sink(),
            Arc::new(BusCounters::default()),
        );

        liveness.dispose();
        assert_eq!(gate.accept(&Message::new(Order(4)), 1), Delivery::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failures_reach_sink() {
        let store = Arc::new(StickyStore::new());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&reported);
        let sink: Arc<dyn ErrorSink> = Arc::new(move |failure: HandlerFailure| {
            sink_log.lock().push(failure.error.to_string());
        });
        let handler: Handler = Arc::new(|message: &Message| match message.payload::<Order>() {
            Some(Order(0)) => anyhow::bail!("empty order"),
            Some(_) => panic!("handler exploded"),
            None => Ok(false),
        });
        let gate = ConsumeGate::new(Order::KIND, handler, Arc::clone(&store), None, sink, Arc::new(BusCounters::default()));

        let sticky = Message::sticky(Order(0));
        store.insert(sticky.clone());
        assert_eq!(gate.accept(&sticky, 1), Delivery::Delivered);
        assert_eq!(gate.accept(&Message::new(Order(9)), 1), Delivery::Delivered);

        let reported = reported.lock();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0], "handler failed: empty order");
        assert_eq!(reported[1], "handler panicked: handler exploded");
        assert!(store.contains(&sticky));
    }
}

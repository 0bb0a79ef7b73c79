//! # Sticky Event Bus
//!
//! In-process publish/subscribe bus with sticky replay.
//!
//! ## Features
//!
//! - **Sticky replay**: subscribers that join late still receive sticky
//!   messages nobody has consumed yet
//! - **First consumer wins**: the first handler that accepts a sticky message
//!   removes it; every handler is still delivered the message
//! - **Lock-free state**: subscriber list and sticky store are copy-on-write
//!   sequences swapped with CAS; only publishers serialize with each other
//! - **Execution contexts**: each handler runs inline, on a serial worker, a
//!   fresh thread, or a Tokio runtime
//! - **Group teardown**: every handler of a subscriber is cancelled with one
//!   call, even after the subscriber object is gone
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sticky_event_bus::{Binding, Event, Immediate, Message, Messenger, SubscriberId, SubscriberKey};
//!
//! #[derive(Debug)]
//! struct SessionStarted { user: String }
//!
//! impl Event for SessionStarted {
//!     const KIND: &'static str = "session_started";
//! }
//!
//! let messenger = Messenger::new();
//!
//! // Published before anyone listens
//! messenger.publish(Message::sticky(SessionStarted { user: "ada".to_string() }));
//!
//! let key = SubscriberKey::new(SubscriberId::new(), "toolbar");
//! let bindings = vec![Binding::on::<SessionStarted, _>(Arc::new(Immediate), |ev, _| {
//!     println!("Welcome back, {}", ev.user);
//!     Ok(true) // consume it
//! })];
//! messenger.subscribe(key, &bindings);
//!
//! assert!(messenger.bus().retained().is_empty());
//! messenger.unsubscribe(&key);
//! ```

pub mod binding;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod messenger;
pub mod publisher;
pub mod sticky;

mod gate;
mod registry;
mod sequence;
mod subscription;

// Re-exports
pub use binding::{Binding, BindingSource, CompletionHook, Handler};
pub use bus::{BusStats, StickyBus};
pub use config::BusConfig;
pub use context::{ContextSet, ExecutionContext, Immediate, Job, NewThread, Scheduler, Serial, TokioContext};
pub use error::{BindingError, ConfigError, ErrorSink, HandlerError, HandlerFailure, TracingSink};
pub use events::{Event, Message};
pub use lifecycle::{LifecycleManager, Liveness, SubscriberId, SubscriberKey};
pub use messenger::Messenger;
pub use publisher::Publisher;
pub use sticky::StickyStore;
pub use subscription::Subscription;

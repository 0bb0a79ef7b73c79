//! Handler bindings supplied by the binding layer
//!
//! A binding layer (derive macro, registration table, hand-written code) turns
//! a subscriber's declared handlers into a list of [`Binding`]s. The bus does
//! not care how the list was produced; it only filters on the kind tag, runs
//! the callback on the declared context, and reads back "accepted".

use std::fmt;
use std::sync::{Arc, Weak};

use crate::context::ExecutionContext;
use crate::error::BindingError;
use crate::events::{Event, Message};

/// Handler callback: `Ok(true)` means the message was accepted
pub type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<bool> + Send + Sync>;

/// Invoked once when the bus terminates
pub type CompletionHook = Arc<dyn Fn() + Send + Sync>;

/// One handler: message kind, callback, execution context
#[derive(Clone)]
pub struct Binding {
    kind: &'static str,
    handler: Handler,
    context: Arc<dyn ExecutionContext>,
    on_complete: Option<CompletionHook>,
}

impl Binding {
    /// Untyped binding for layers that already dispatch on the kind tag
    pub fn new(kind: &'static str, context: Arc<dyn ExecutionContext>, handler: Handler) -> Self {
        Self {
            kind,
            handler,
            context,
            on_complete: None,
        }
    }

    /// Handle every message carrying an `E`
    pub fn on<E, F>(context: Arc<dyn ExecutionContext>, f: F) -> Self
    where
        E: Event,
        F: Fn(&E, &Message) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |message: &Message| match message.payload::<E>() {
            Some(event) => f(event, message),
            None => Ok(false),
        });
        Self::new(E::KIND, context, handler)
    }

    /// Handle `E` on behalf of `subscriber` without keeping it alive
    ///
    /// Once the subscriber has been dropped the handler answers `Ok(false)`
    /// without calling `f`.
    pub fn for_subscriber<S, E, F>(subscriber: &Arc<S>, context: Arc<dyn ExecutionContext>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        E: Event,
        F: Fn(&S, &E) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        let target: Weak<S> = Arc::downgrade(subscriber);
        Self::on::<E, _>(context, move |event, _| match target.upgrade() {
            Some(subscriber) => f(&subscriber, event),
            None => Ok(false),
        })
    }

    /// Callback run on this binding's context when the bus terminates
    pub fn with_completion(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn context(&self) -> &Arc<dyn ExecutionContext> {
        &self.context
    }

    pub(crate) fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn on_complete(&self) -> Option<&CompletionHook> {
        self.on_complete.as_ref()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("kind", &self.kind)
            .field("context", &self.context.name())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Produces the bindings for one subscriber
pub trait BindingSource {
    fn resolve(&self) -> Result<Vec<Binding>, BindingError>;
}

impl BindingSource for Vec<Binding> {
    fn resolve(&self) -> Result<Vec<Binding>, BindingError> {
        Ok(self.clone())
    }
}

impl<F> BindingSource for F
where
    F: Fn() -> Result<Vec<Binding>, BindingError>,
{
    fn resolve(&self) -> Result<Vec<Binding>, BindingError> {
        self()
    }
}

//! Error types and the sink that receives handler failures

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// The binding layer could not produce handlers for a subscriber
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("no handlers declared for {0}")]
    NoHandlers(String),

    #[error("handler set {0} could not be resolved")]
    Unresolved(String),

    #[error("subscriber {0} is no longer alive")]
    SubscriberGone(String),
}

/// A handler invocation that did not complete normally
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0:#}")]
    Failed(#[from] anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        HandlerError::Panicked(info)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bus config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("sticky_limit must be at least 1")]
    ZeroStickyLimit,
}

/// Record handed to the [`ErrorSink`] when a handler fails
#[derive(Debug)]
pub struct HandlerFailure {
    /// Message being delivered
    pub message_id: Uuid,
    pub kind: &'static str,
    /// Subscription the handler belongs to
    pub subscription_id: u64,
    pub error: HandlerError,
}

/// Destination for handler failures
///
/// Failures never reach the publisher or other subscribers; they end up here.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, failure: HandlerFailure);
}

/// Logs failures through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, failure: HandlerFailure) {
        warn!(
            message_id = %failure.message_id,
            kind = failure.kind,
            subscription = failure.subscription_id,
            "{}",
            failure.error
        );
    }
}

impl<F> ErrorSink for F
where
    F: Fn(HandlerFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: HandlerFailure) {
        self(failure)
    }
}

pub(crate) fn default_sink() -> Arc<dyn ErrorSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payloads() {
        let err = HandlerError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "handler panicked: boom");

        let err = HandlerError::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "handler panicked: bang");

        let err = HandlerError::from_panic(Box::new(17_u8));
        assert_eq!(err.to_string(), "handler panicked: unknown panic");
    }

    #[test]
    fn test_failed_wraps_anyhow() {
        let err: HandlerError = anyhow::anyhow!("bad payload").into();
        assert_eq!(err.to_string(), "handler failed: bad payload");
    }
}

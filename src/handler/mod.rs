//! Handler module - the capability the consumer dispatches messages to.
//!
//! Provides:
//! - [`Handler`] - the trait implemented by applications
//! - [`FnHandler`] - adapter for async closures over raw messages
//! - [`JsonHandler`] - adapter that decodes the body as JSON first
//!
//! # Example
//!
//! ```
//! use qreader::handler::{FnHandler, HandlerFailure};
//! use qreader::Message;
//!
//! let handler = FnHandler::new(|message: Message| async move {
//!     if message.body().is_empty() {
//!         return Err(HandlerFailure::new("empty body"));
//!     }
//!     Ok(())
//! });
//! # let _ = handler;
//! ```

mod function;

pub use function::{FnHandler, JsonHandler};

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::protocol::Message;

/// Boxed future returned by handlers and connectors.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler invocations.
pub type HandlerResult = std::result::Result<(), HandlerFailure>;

/// A handler reported that it could not process a message.
///
/// The message is requeued with a backoff delay. This never surfaces as a
/// consumer-level error.
#[derive(Debug, Clone, Error)]
#[error("handler failed: {reason}")]
pub struct HandlerFailure {
    reason: String,
}

impl HandlerFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<String> for HandlerFailure {
    fn from(reason: String) -> Self {
        Self { reason }
    }
}

impl From<&str> for HandlerFailure {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

/// Processes delivered messages.
///
/// Called once per delivery, possibly from several tasks at once when the
/// consumer runs with `concurrency > 1`. The message is an owned handle onto
/// the received bytes; keeping it after the returned future completes keeps
/// the buffer alive but does not delay the acknowledgement.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        (**self).handle(message)
    }
}


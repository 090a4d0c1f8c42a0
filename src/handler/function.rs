//! Closure adapters for [`Handler`].

use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::{BoxFuture, Handler, HandlerFailure, HandlerResult};
use crate::protocol::Message;

/// Wraps an async closure taking the raw [`Message`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(message))
    }
}

/// Wrapper that deserializes the message body as JSON before calling the
/// closure. A body that does not decode counts as a handler failure, so the
/// message is requeued like any other failure.
pub struct JsonHandler<F, T, Fut>
where
    F: Fn(T, Message) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> JsonHandler<F, T, Fut>
where
    F: Fn(T, Message) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for JsonHandler<F, T, Fut>
where
    F: Fn(T, Message) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_slice(message.body()) {
            Ok(v) => v,
            Err(e) => {
                let failure = HandlerFailure::new(format!("undecodable body: {}", e));
                return Box::pin(async move { Err(failure) });
            }
        };

        Box::pin((self.handler)(parsed, message))
    }
}

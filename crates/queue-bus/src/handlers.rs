//! Typed message dispatch.
//!
//! [`HandlerRegistry`] is a [`MessageHandler`] that routes envelopes to typed
//! handlers by their message type header. Several handlers may be registered
//! for one type; they run in registration order and the first failure fails
//! the attempt.

use crate::error::{QueueError, SerializationError};
use crate::message::{headers, Envelope};
use crate::pipeline::MessageHandler;
use crate::serializer::{message_type_name, JsonMessageSerializer};
use anyhow::anyhow;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

struct TypedHandler<T, F> {
    serializer: JsonMessageSerializer,
    handler: F,
    _message: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> MessageHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let message: T = self.serializer.deserialize(&envelope)?;
        (self.handler)(message).await
    }
}

/// Dispatches envelopes to handlers registered per message type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    serializer: JsonMessageSerializer,
    handlers: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for messages of type `T`
    pub fn register<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let typed = TypedHandler {
            serializer: self.serializer,
            handler,
            _message: PhantomData,
        };
        self.handlers
            .entry(message_type_name::<T>().to_string())
            .or_default()
            .push(Arc::new(typed));
        self
    }

    /// Check whether any handler is registered for `T`
    pub fn handles<T>(&self) -> bool {
        self.handlers.contains_key(message_type_name::<T>())
    }

    /// Message type names with at least one handler
    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl MessageHandler for HandlerRegistry {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let message_type = envelope.header(headers::MESSAGE_TYPE).ok_or_else(|| {
            QueueError::from(SerializationError::MissingHeader {
                key: headers::MESSAGE_TYPE.to_string(),
            })
        })?;

        let handlers = self
            .handlers
            .get(message_type)
            .ok_or_else(|| anyhow!("No handler registered for message type '{}'", message_type))?;

        debug!(
            message_type = message_type,
            handlers = handlers.len(),
            "Dispatching message"
        );

        for handler in handlers {
            handler.handle(envelope.clone()).await?;
        }
        Ok(())
    }
}

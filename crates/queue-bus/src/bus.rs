//! # Bus
//!
//! Composes a [`Transport`], [`TopicRouter`], [`RetryPipeline`] and
//! [`WorkerPool`] into one handle for typed send, publish and subscribe.
//!
//! ```rust,no_run
//! use queue_bus::{Bus, HandlerRegistry, InMemoryProvider, TransportConfig};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! # async fn example() -> Result<(), queue_bus::QueueError> {
//! let medium = Arc::new(InMemoryProvider::default());
//! let handlers = HandlerRegistry::new().register(|order: OrderPlaced| async move {
//!     println!("order {}", order.order_id);
//!     anyhow::Ok(())
//! });
//!
//! let bus = Bus::start(TransportConfig::new("orders"), medium, Arc::new(handlers)).await?;
//! bus.subscribe::<OrderPlaced>().await?;
//! bus.publish(&OrderPlaced { order_id: 1 }).await?;
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::client::QueueClient;
use crate::config::TransportConfig;
use crate::error::QueueError;
use crate::handlers::HandlerRegistry;
use crate::message::{Envelope, MessageId, QueueName, TopicName};
use crate::pipeline::{MessageHandler, RetryPipeline};
use crate::router::{topic_for, TopicRouter};
use crate::serializer::JsonMessageSerializer;
use crate::transport::Transport;
use crate::worker::{WorkerPool, WorkerStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

/// Running message bus bound to one medium
pub struct Bus {
    transport: Arc<Transport>,
    router: TopicRouter,
    workers: Option<WorkerPool>,
    serializer: JsonMessageSerializer,
}

impl Bus {
    /// Provision queues and start receiving.
    ///
    /// The input queue and the error queue are created or verified first;
    /// `max_parallelism` workers are then started. A one-way configuration
    /// starts no workers and `handler` is never called.
    ///
    /// # Errors
    ///
    /// Returns `ProvisioningDenied` naming the queue when a queue is missing
    /// and automatic creation is disabled, or a configuration error.
    pub async fn start(
        config: TransportConfig,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, QueueError> {
        let transport = Arc::new(Transport::new(config, client)?);
        transport.initialize().await?;

        let workers = if transport.address().is_some() {
            let pipeline = Arc::new(RetryPipeline::new(transport.clone(), handler)?);
            pipeline.initialize().await?;
            Some(WorkerPool::start(
                transport.clone(),
                pipeline,
                transport.config().max_parallelism,
            ))
        } else {
            None
        };

        info!(queue = ?transport.address().map(|q| q.as_str()), "Bus started");

        Ok(Self {
            router: TopicRouter::new(transport.clone()),
            transport,
            workers,
            serializer: JsonMessageSerializer::new(),
        })
    }

    /// Start a bus that only sends and publishes
    pub async fn send_only(
        config: TransportConfig,
        client: Arc<dyn QueueClient>,
    ) -> Result<Self, QueueError> {
        let config = TransportConfig {
            input_queue: None,
            ..config
        };
        Self::start(config, client, Arc::new(HandlerRegistry::new())).await
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Input queue; `None` for a send-only bus
    pub fn address(&self) -> Option<&QueueName> {
        self.transport.address()
    }

    /// Worker counters; `None` for a send-only bus
    pub fn stats(&self) -> Option<&Arc<WorkerStats>> {
        self.workers.as_ref().map(WorkerPool::stats)
    }

    /// Send a typed message to a queue
    pub async fn send<T: Serialize>(
        &self,
        destination: &QueueName,
        message: &T,
    ) -> Result<MessageId, QueueError> {
        let envelope = self.serializer.serialize(message)?;
        self.transport.send(destination, envelope).await
    }

    /// Send a typed message to this bus's own input queue
    pub async fn send_local<T: Serialize>(&self, message: &T) -> Result<MessageId, QueueError> {
        let envelope = self.serializer.serialize(message)?;
        self.transport.send_local(envelope).await
    }

    /// Send a raw envelope to a queue
    pub async fn send_envelope(
        &self,
        destination: &QueueName,
        envelope: Envelope,
    ) -> Result<MessageId, QueueError> {
        self.transport.send(destination, envelope).await
    }

    /// Publish a typed message to the topic of its type
    pub async fn publish<T: Serialize>(&self, message: &T) -> Result<usize, QueueError> {
        let topic = topic_for::<T>()?;
        self.publish_to(&topic, message).await
    }

    /// Publish a typed message to an explicit topic
    pub async fn publish_to<T: Serialize>(
        &self,
        topic: &TopicName,
        message: &T,
    ) -> Result<usize, QueueError> {
        let envelope = self.serializer.serialize(message)?;
        self.router.publish(topic, envelope).await
    }

    /// Subscribe the input queue to the topic of type `T`
    pub async fn subscribe<T>(&self) -> Result<(), QueueError> {
        let topic = topic_for::<T>()?;
        self.router.subscribe(&topic).await
    }

    /// Subscribe the input queue to an explicit topic
    pub async fn subscribe_to(&self, topic: &TopicName) -> Result<(), QueueError> {
        self.router.subscribe(topic).await
    }

    /// Remove the input queue's subscription to the topic of type `T`
    pub async fn unsubscribe<T>(&self) -> Result<(), QueueError> {
        let topic = topic_for::<T>()?;
        self.router.unsubscribe(&topic).await
    }

    /// Remove the input queue's subscription to an explicit topic
    pub async fn unsubscribe_from(&self, topic: &TopicName) -> Result<(), QueueError> {
        self.router.unsubscribe(topic).await
    }

    /// Stop receiving and wait for in-flight messages to be settled
    pub async fn shutdown(self) {
        if let Some(workers) = self.workers {
            workers.shutdown().await;
        }
        info!(queue = ?self.transport.address().map(|q| q.as_str()), "Bus stopped");
    }
}

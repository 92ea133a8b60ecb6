//! Contract tests for queue client implementations.
//!
//! The helpers are generic over the client traits so every medium adapter can
//! be checked against the same expectations.

use super::*;
use crate::providers::InMemoryProvider;
use bytes::Bytes;

async fn setup_queue<C: QueueClient>(client: &C, name: &str) -> QueueName {
    let queue = QueueName::new(name.to_string()).unwrap();
    client
        .ensure_queue(&QueueDescriptor::new(queue.clone()), ProvisioningMode::Create)
        .await
        .expect("Setup: ensure_queue should succeed");
    queue
}

/// Sent messages can be received, and the lease can be completed
async fn contract_send_receive_complete<C: QueueClient + QueueAdministration>(client: &C) {
    // Arrange
    let queue = setup_queue(client, "contract-send").await;
    let message = WireMessage::new(Bytes::from("test message"));

    // Act
    let message_id = client.send_message(&queue, message.clone()).await.unwrap();
    let received = client
        .receive_leased(&queue, Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap()
        .expect("Should receive the message");
    client.complete_message(&received).await.unwrap();

    // Assert
    assert!(!message_id.as_str().is_empty());
    assert_eq!(received.message.body, message.body);
    assert_eq!(received.delivery_count, 1);
    assert_eq!(client.message_count(&queue).await.unwrap(), 0);
}

/// Sending to a queue that does not exist is reported with the queue name
async fn contract_send_to_missing_queue<C: QueueClient>(client: &C) {
    let queue = QueueName::new("nonexistent-queue-12345".to_string()).unwrap();

    match client
        .send_message(&queue, WireMessage::new(Bytes::from("x")))
        .await
    {
        Err(QueueError::QueueNotFound { queue_name }) => {
            assert_eq!(queue_name, queue.as_str());
        }
        other => panic!("Expected QueueNotFound error, got: {:?}", other),
    }
}

/// Abandoned messages come back with their delivery count preserved
async fn contract_abandon_preserves_delivery_count<C: QueueClient>(client: &C) {
    let queue = setup_queue(client, "contract-abandon").await;
    client
        .send_message(&queue, WireMessage::new(Bytes::from("again")))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let first = client
        .receive_leased(&queue, Duration::from_secs(1), &cancel)
        .await
        .unwrap()
        .unwrap();
    client.abandon_message(&first).await.unwrap();
    let second = client
        .receive_leased(&queue, Duration::from_secs(1), &cancel)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.delivery_count, first.delivery_count + 1);
}

/// Publishing to a topic with no subscribers succeeds and delivers nothing
async fn contract_publish_without_subscribers<C: QueueClient + QueueAdministration>(client: &C) {
    let queue = setup_queue(client, "contract-bystander").await;
    let topic = TopicName::new("contract-topic".to_string()).unwrap();
    client.ensure_topic(&topic).await.unwrap();

    let delivered = client
        .publish(&topic, WireMessage::new(Bytes::from("into the void")))
        .await
        .unwrap();

    assert_eq!(delivered, 0);
    assert_eq!(client.message_count(&queue).await.unwrap(), 0);
}

#[tokio::test]
async fn test_in_memory_send_receive_complete() {
    contract_send_receive_complete(&InMemoryProvider::default()).await;
}

#[tokio::test]
async fn test_in_memory_send_to_missing_queue() {
    contract_send_to_missing_queue(&InMemoryProvider::default()).await;
}

#[tokio::test]
async fn test_in_memory_abandon_preserves_delivery_count() {
    contract_abandon_preserves_delivery_count(&InMemoryProvider::default()).await;
}

#[tokio::test]
async fn test_in_memory_publish_without_subscribers() {
    contract_publish_without_subscribers(&InMemoryProvider::default()).await;
}

#[test]
fn test_provisioning_mode_equality() {
    assert_ne!(ProvisioningMode::Create, ProvisioningMode::VerifyOnly);
}

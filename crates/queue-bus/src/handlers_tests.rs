use super::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderShipped {
    order_id: u64,
}

fn counting_registry(placed: Arc<AtomicU32>, shipped: Arc<AtomicU32>) -> HandlerRegistry {
    HandlerRegistry::new()
        .register(move |message: OrderPlaced| {
            let placed = placed.clone();
            async move {
                placed.fetch_add(message.order_id as u32, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
        .register(move |message: OrderShipped| {
            let shipped = shipped.clone();
            async move {
                shipped.fetch_add(message.order_id as u32, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
}

#[tokio::test]
async fn test_dispatches_by_message_type() {
    let placed = Arc::new(AtomicU32::new(0));
    let shipped = Arc::new(AtomicU32::new(0));
    let registry = counting_registry(placed.clone(), shipped.clone());
    let envelope = JsonMessageSerializer::new()
        .serialize(&OrderShipped { order_id: 5 })
        .unwrap();

    registry.handle(envelope).await.unwrap();

    assert_eq!(placed.load(Ordering::SeqCst), 0);
    assert_eq!(shipped.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_runs_every_handler_for_a_type() {
    let calls = Arc::new(AtomicU32::new(0));
    let first = calls.clone();
    let second = calls.clone();
    let registry = HandlerRegistry::new()
        .register(move |_: OrderPlaced| {
            let first = first.clone();
            async move {
                first.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
        .register(move |_: OrderPlaced| {
            let second = second.clone();
            async move {
                second.fetch_add(10, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
    let envelope = JsonMessageSerializer::new()
        .serialize(&OrderPlaced { order_id: 1 })
        .unwrap();

    registry.handle(envelope).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_handler_error_propagates() {
    let registry = HandlerRegistry::new().register(|message: OrderPlaced| async move {
        Err::<(), _>(anyhow::anyhow!("order {} rejected", message.order_id))
    });
    let envelope = JsonMessageSerializer::new()
        .serialize(&OrderPlaced { order_id: 9 })
        .unwrap();

    let err = registry.handle(envelope).await.unwrap_err();

    assert!(err.to_string().contains("order 9 rejected"));
}

#[tokio::test]
async fn test_unknown_message_type_fails() {
    let registry = HandlerRegistry::new().register(|_: OrderPlaced| async { anyhow::Ok(()) });
    let envelope = JsonMessageSerializer::new()
        .serialize(&OrderShipped { order_id: 1 })
        .unwrap();

    let err = registry.handle(envelope).await.unwrap_err();

    assert!(err.to_string().contains("No handler registered"));
}

#[tokio::test]
async fn test_missing_message_type_header_fails() {
    let registry = HandlerRegistry::new().register(|_: OrderPlaced| async { anyhow::Ok(()) });

    let err = registry
        .handle(Envelope::new(bytes::Bytes::from("{}")))
        .await
        .unwrap_err();

    assert!(err.to_string().contains(headers::MESSAGE_TYPE));
}

#[test]
fn test_handles_reports_registered_types() {
    let registry = HandlerRegistry::new().register(|_: OrderPlaced| async { anyhow::Ok(()) });

    assert!(registry.handles::<OrderPlaced>());
    assert!(!registry.handles::<OrderShipped>());
    assert_eq!(registry.message_types().count(), 1);
}

//! Tests for the retry pipeline

use super::*;
use crate::client::{QueueAdministration, QueueClient};
use crate::config::TransportConfig;
use crate::providers::InMemoryProvider;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handler that fails with `error_text` until it has been called `fail_times`
struct CountingHandler {
    calls: AtomicU32,
    fail_times: u32,
    error_text: String,
}

impl CountingHandler {
    fn always_failing(error_text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            error_text: error_text.into(),
        })
    }

    fn failing_times(fail_times: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_times,
            error_text: "transient handler failure".to_string(),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn handle(&self, _envelope: Envelope) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_times {
            anyhow::bail!("{}", self.error_text);
        }
        Ok(())
    }
}

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn config(max_delivery_attempts: u32, source: DeliveryCountSource) -> TransportConfig {
    TransportConfig {
        max_delivery_attempts,
        delivery_count_source: source,
        receive_timeout_ms: 50,
        ..TransportConfig::new("input")
    }
}

async fn setup(
    provider: &InMemoryProvider,
    config: TransportConfig,
    handler: Arc<dyn MessageHandler>,
) -> (Arc<Transport>, RetryPipeline) {
    let transport = Arc::new(Transport::new(config, Arc::new(provider.clone())).unwrap());
    transport.initialize().await.unwrap();
    let pipeline = RetryPipeline::new(transport.clone(), handler).unwrap();
    pipeline.initialize().await.unwrap();
    (transport, pipeline)
}

async fn receive(transport: &Transport) -> ReceivedEnvelope {
    transport
        .receive(&CancellationToken::new())
        .await
        .unwrap()
        .expect("a message should be available")
}

/// Read and decode the single message in the error queue
async fn read_error_queue(provider: &InMemoryProvider, transport: &Transport) -> Envelope {
    let leased = provider
        .receive_leased(&queue("error"), Duration::from_millis(50), &CancellationToken::new())
        .await
        .unwrap()
        .expect("error queue should hold a message");
    transport.codec().decode(&leased.message).unwrap()
}

mod delivery {
    use super::*;

    #[tokio::test]
    async fn test_successful_handler_completes_message() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::failing_times(0);
        let (transport, pipeline) =
            setup(&provider, config(3, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("ok")))
            .await
            .unwrap();

        let state = pipeline.process(receive(&transport).await).await.unwrap();

        assert_eq!(state, DeliveryState::Completed);
        assert!(state.is_terminal());
        assert_eq!(handler.calls(), 1);
        assert_eq!(provider.message_count(&queue("input")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_recovers_before_bound() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::failing_times(2);
        let (transport, pipeline) =
            setup(&provider, config(3, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("flaky")))
            .await
            .unwrap();

        let first = pipeline.process(receive(&transport).await).await.unwrap();
        let second = pipeline.process(receive(&transport).await).await.unwrap();
        let third = pipeline.process(receive(&transport).await).await.unwrap();

        assert_eq!(first, DeliveryState::Pending { attempt: 2 });
        assert_eq!(second, DeliveryState::Pending { attempt: 3 });
        assert_eq!(third, DeliveryState::Completed);
        assert_eq!(provider.message_count(&queue("error")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_fn_adapter() {
        let provider = InMemoryProvider::default();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let handler = handler_fn(move |envelope: Envelope| {
            let counter = counter.clone();
            async move {
                assert_eq!(envelope.body, Bytes::from("closure"));
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        let (transport, pipeline) = setup(
            &provider,
            config(1, DeliveryCountSource::Medium),
            Arc::new(handler),
        )
        .await;
        transport
            .send_local(Envelope::new(Bytes::from("closure")))
            .await
            .unwrap();

        let state = pipeline.process(receive(&transport).await).await.unwrap();

        assert_eq!(state, DeliveryState::Completed);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

mod dead_lettering {
    use super::*;

    async fn exhaust_attempts(source: DeliveryCountSource) {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::always_failing("database unavailable");
        let (transport, pipeline) = setup(&provider, config(3, source), handler.clone()).await;
        let message_id = transport
            .send_local(Envelope::new(Bytes::from("doomed")).with_header("tenant", "acme"))
            .await
            .unwrap();

        let mut states = Vec::new();
        for _ in 0..3 {
            states.push(pipeline.process(receive(&transport).await).await.unwrap());
        }

        assert_eq!(
            states,
            vec![
                DeliveryState::Pending { attempt: 2 },
                DeliveryState::Pending { attempt: 3 },
                DeliveryState::DeadLettered,
            ]
        );
        assert_eq!(handler.calls(), 3);
        assert_eq!(provider.message_count(&queue("input")).await.unwrap(), 0);
        assert!(pipeline.tracker().is_empty());

        let failed = read_error_queue(&provider, &transport).await;
        let details = failed.header(headers::ERROR_DETAILS).unwrap();
        assert!(details.contains("database unavailable"));
        assert!(details.contains("attempt 3"));
        assert_eq!(failed.header(headers::SOURCE_QUEUE), Some("input"));
        assert_eq!(failed.message_id(), Some(message_id.as_str()));
        assert_eq!(failed.header("tenant"), Some("acme"));
        assert_eq!(failed.body, Bytes::from("doomed"));
    }

    #[tokio::test]
    async fn test_always_failing_handler_dead_letters_after_bound_medium_count() {
        exhaust_attempts(DeliveryCountSource::Medium).await;
    }

    #[tokio::test]
    async fn test_always_failing_handler_dead_letters_after_bound_in_process_count() {
        exhaust_attempts(DeliveryCountSource::InProcess).await;
    }

    #[tokio::test]
    async fn test_single_attempt_dead_letters_immediately() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::always_failing("boom");
        let (transport, pipeline) =
            setup(&provider, config(1, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("once")))
            .await
            .unwrap();

        let state = pipeline.process(receive(&transport).await).await.unwrap();

        assert_eq!(state, DeliveryState::DeadLettered);
        assert_eq!(handler.calls(), 1);
        assert_eq!(provider.message_count(&queue("error")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delivery_above_bound_skips_handler() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::failing_times(0);
        let (transport, pipeline) =
            setup(&provider, config(2, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("stale")))
            .await
            .unwrap();

        // Two deliveries that never reached the pipeline
        for _ in 0..2 {
            let received = receive(&transport).await;
            transport.abandon(&received).await.unwrap();
        }

        let received = receive(&transport).await;
        assert_eq!(received.delivery_count(), 3);
        let state = pipeline.process(received).await.unwrap();

        assert_eq!(state, DeliveryState::DeadLettered);
        assert_eq!(handler.calls(), 0);
        let failed = read_error_queue(&provider, &transport).await;
        assert!(failed
            .header(headers::ERROR_DETAILS)
            .unwrap()
            .contains("exceeded the maximum of 2 delivery attempts"));
    }

    #[tokio::test]
    async fn test_large_error_text_travels_to_error_queue() {
        let provider = InMemoryProvider::default();
        let error_text = "x".repeat(30 * 1024);
        let handler = CountingHandler::always_failing(error_text.clone());
        let (transport, pipeline) =
            setup(&provider, config(1, DeliveryCountSource::Medium), handler).await;
        transport
            .send_local(Envelope::new(Bytes::from("big headers")))
            .await
            .unwrap();

        pipeline.process(receive(&transport).await).await.unwrap();

        let failed = read_error_queue(&provider, &transport).await;
        assert!(failed
            .header(headers::ERROR_DETAILS)
            .unwrap()
            .contains(&error_text));
    }

    #[tokio::test]
    async fn test_oversized_diagnostics_fall_back_to_native_dead_letter() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::always_failing("y".repeat(300 * 1024));
        let (transport, pipeline) =
            setup(&provider, config(1, DeliveryCountSource::Medium), handler).await;
        transport
            .send_local(Envelope::new(Bytes::from("too much to say")))
            .await
            .unwrap();

        let state = pipeline.process(receive(&transport).await).await.unwrap();

        assert_eq!(state, DeliveryState::DeadLettered);
        assert_eq!(provider.message_count(&queue("error")).await.unwrap(), 0);
        let dead = provider.dead_lettered(&queue("input")).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("yyyy"));
    }
}

mod medium_cap {
    use super::*;
    use crate::provider::InMemoryConfig;

    fn provider_with_cap(cap: u32) -> InMemoryProvider {
        InMemoryProvider::new(InMemoryConfig {
            max_delivery_count: Some(cap),
            ..Default::default()
        })
    }

    /// Process deliveries until the input queue has nothing left to hand out
    async fn drain(transport: &Transport, pipeline: &RetryPipeline) -> Vec<DeliveryState> {
        let mut states = Vec::new();
        while let Some(received) = transport.receive(&CancellationToken::new()).await.unwrap() {
            states.push(pipeline.process(received).await.unwrap());
        }
        states
    }

    #[tokio::test]
    async fn test_bound_above_default_cap_runs_every_attempt() {
        let provider = provider_with_cap(20);
        let handler = CountingHandler::always_failing("still broken");
        let (transport, pipeline) =
            setup(&provider, config(12, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("stubborn")))
            .await
            .unwrap();

        let states = drain(&transport, &pipeline).await;

        assert_eq!(handler.calls(), 12);
        assert_eq!(states.len(), 12);
        assert_eq!(states.last(), Some(&DeliveryState::DeadLettered));
        assert!(provider.dead_lettered(&queue("input")).await.unwrap().is_empty());
        let failed = read_error_queue(&provider, &transport).await;
        let details = failed.header(headers::ERROR_DETAILS).unwrap();
        assert!(details.contains("still broken"));
        assert!(details.contains("attempt 12"));
    }

    #[tokio::test]
    async fn test_bound_equal_to_default_cap_reaches_error_queue() {
        let provider = InMemoryProvider::default();
        let handler = CountingHandler::always_failing("never works");
        let (transport, pipeline) =
            setup(&provider, config(10, DeliveryCountSource::Medium), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("ten tries")))
            .await
            .unwrap();

        let states = drain(&transport, &pipeline).await;

        assert_eq!(handler.calls(), 10);
        assert_eq!(states.last(), Some(&DeliveryState::DeadLettered));
        assert!(provider.dead_lettered(&queue("input")).await.unwrap().is_empty());
        assert!(pipeline.tracker().is_empty());
        let failed = read_error_queue(&provider, &transport).await;
        assert!(failed
            .header(headers::ERROR_DETAILS)
            .unwrap()
            .contains("never works"));
    }

    #[tokio::test]
    async fn test_in_process_count_dead_letters_at_medium_cap_after_restart() {
        let provider = provider_with_cap(3);
        let handler = CountingHandler::always_failing("lost count");
        let (transport, first_run) =
            setup(&provider, config(3, DeliveryCountSource::InProcess), handler.clone()).await;
        transport
            .send_local(Envelope::new(Bytes::from("restarted")))
            .await
            .unwrap();

        first_run.process(receive(&transport).await).await.unwrap();
        first_run.process(receive(&transport).await).await.unwrap();
        drop(first_run);

        // A fresh pipeline starts its in-process count over at 1.
        let second_run = RetryPipeline::new(transport.clone(), handler.clone()).unwrap();
        let state = second_run.process(receive(&transport).await).await.unwrap();

        assert_eq!(state, DeliveryState::DeadLettered);
        assert_eq!(handler.calls(), 3);
        assert!(provider.dead_lettered(&queue("input")).await.unwrap().is_empty());
        let failed = read_error_queue(&provider, &transport).await;
        assert!(failed
            .header(headers::ERROR_DETAILS)
            .unwrap()
            .contains("lost count"));
    }
}

mod tracker {
    use super::*;

    #[test]
    fn test_record_attempt_counts_from_one() {
        let tracker = DeliveryTracker::new();

        assert_eq!(tracker.record_attempt("m1"), 1);
        assert_eq!(tracker.record_attempt("m1"), 2);
        assert_eq!(tracker.record_attempt("m2"), 1);
        assert_eq!(tracker.attempts("m1"), Some(2));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_reset_forgets_delivery() {
        let tracker = DeliveryTracker::new();
        tracker.record_attempt("m1");

        tracker.reset("m1");

        assert_eq!(tracker.attempts("m1"), None);
        assert!(tracker.is_empty());
    }
}

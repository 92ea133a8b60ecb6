//! Common test utilities for queue-bus integration tests
//!
//! This module provides:
//! - A countdown counter for waiting on handler invocations
//! - Polling helpers with a bounded wait
//! - Transport configuration tuned for fast tests

use queue_bus::TransportConfig;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

/// Upper bound for any wait in these tests
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Counter that starts at an expected count and is decremented by handlers
#[derive(Clone)]
#[allow(dead_code)]
pub struct SharedCounter {
    remaining: Arc<AtomicI64>,
}

#[allow(dead_code)]
impl SharedCounter {
    pub fn new(expected: i64) -> Self {
        Self {
            remaining: Arc::new(AtomicI64::new(expected)),
        }
    }

    pub fn decrement(&self) {
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Wait until the counter reaches zero; panics if it overshoots or times out
    pub async fn wait_for_zero(&self) {
        wait_until("counter to reach zero", || self.remaining() <= 0).await;
        assert_eq!(
            self.remaining(),
            0,
            "counter went below zero; a message was handled more than once"
        );
    }
}

#[allow(dead_code)]
/// Poll `condition` every 10ms until it holds or [`WAIT_TIMEOUT`] elapses
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Configuration for `input_queue` with a short receive timeout
#[allow(dead_code)]
pub fn fast_config(input_queue: &str) -> TransportConfig {
    TransportConfig {
        receive_timeout_ms: 50,
        ..TransportConfig::new(input_queue)
    }
}

//! # Worker Pool
//!
//! Independent receive loops feeding the [`RetryPipeline`]. Workers share
//! nothing but the transport and pipeline; the medium's leases decide which
//! worker gets which message.
//!
//! Stopping the pool cancels pending receives immediately. A message that is
//! already being handled is allowed to finish and be settled.

use crate::pipeline::{DeliveryState, RetryPipeline};
use crate::transport::Transport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Counters shared by all workers of a pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    received: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    errors: AtomicU64,
}

impl WorkerStats {
    /// Envelopes handed to the pipeline
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Failed attempts returned to the queue for redelivery
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Receive or settlement errors
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn record(&self, state: DeliveryState) {
        let counter = match state {
            DeliveryState::Completed => &self.completed,
            DeliveryState::Pending { .. } => &self.retried,
            DeliveryState::DeadLettered => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A set of running receive loops
pub struct WorkerPool {
    cancel_token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Spawn `worker_count` receive loops. Zero starts none.
    pub fn start(
        transport: Arc<Transport>,
        pipeline: Arc<RetryPipeline>,
        worker_count: usize,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let stats = Arc::new(WorkerStats::default());

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    transport.clone(),
                    pipeline.clone(),
                    cancel_token.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        info!(
            queue = ?transport.address().map(|q| q.as_str()),
            workers = worker_count,
            "Started worker pool"
        );

        Self {
            cancel_token,
            workers,
            stats,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Token that stops every worker when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Stop all workers and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel_token.cancel();

        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    transport: Arc<Transport>,
    pipeline: Arc<RetryPipeline>,
    cancel_token: CancellationToken,
    stats: Arc<WorkerStats>,
) {
    let error_pause = Duration::from_millis(transport.config().receive_retry.max_delay_ms);
    debug!(worker = worker_id, "Worker started");

    while !cancel_token.is_cancelled() {
        match transport.receive(&cancel_token).await {
            Ok(Some(received)) => {
                stats.received.fetch_add(1, Ordering::Relaxed);
                let message_id = received.message_id().to_string();

                match pipeline.process(received).await {
                    Ok(state) => stats.record(state),
                    Err(e) => {
                        stats.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            worker = worker_id,
                            message_id = %message_id,
                            error = %e,
                            "Failed to settle message"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                error!(worker = worker_id, error = %e, "Receive failed; pausing worker");

                tokio::select! {
                    () = cancel_token.cancelled() => {}
                    () = tokio::time::sleep(error_pause) => {}
                }
            }
        }
    }

    debug!(worker = worker_id, "Worker stopped");
}

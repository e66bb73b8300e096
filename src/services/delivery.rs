//! Batch delivery worker - pushes flushed batches to the collector off the loop
//!
//! Every batch gets its own task so a slow collector never holds up the
//! event loop or other devices. A batch the collector does not accept is
//! sent back to the loop on the requeue channel, where it re-enters the
//! device's buffer.

use crate::infra::metrics::Metrics;
use crate::services::sink::Batch;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a batch was not accepted
#[derive(Debug)]
pub enum DeliveryError {
    /// Request never produced a response
    Network(String),
    /// Collector answered with something other than 200
    Status { status: u16 },
    /// Batch could not be encoded
    Serialization(String),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Network(msg) => write!(f, "collector network error: {msg}"),
            DeliveryError::Status { status } => write!(f, "collector rejected batch ({status})"),
            DeliveryError::Serialization(msg) => write!(f, "batch serialization error: {msg}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Remote store that accepts event batches
#[async_trait]
pub trait Collector: Send + Sync {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

/// Worker that drains flushed batches and delivers them concurrently
pub struct DeliveryWorker {
    collector: Arc<dyn Collector>,
    batch_rx: mpsc::UnboundedReceiver<Batch>,
    requeue_tx: mpsc::UnboundedSender<Batch>,
    metrics: Arc<Metrics>,
}

impl DeliveryWorker {
    pub fn new(
        collector: Arc<dyn Collector>,
        batch_rx: mpsc::UnboundedReceiver<Batch>,
        requeue_tx: mpsc::UnboundedSender<Batch>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { collector, batch_rx, requeue_tx, metrics }
    }

    /// Run the worker until every batch sender is gone
    pub async fn run(mut self) {
        info!("delivery_worker_started");

        while let Some(batch) = self.batch_rx.recv().await {
            let collector = self.collector.clone();
            let requeue_tx = self.requeue_tx.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                deliver_one(collector.as_ref(), batch, &requeue_tx, &metrics).await;
            });
        }

        info!("delivery_worker_stopped");
    }
}

async fn deliver_one(
    collector: &dyn Collector,
    batch: Batch,
    requeue_tx: &mpsc::UnboundedSender<Batch>,
    metrics: &Metrics,
) {
    let start = Instant::now();
    match collector.deliver(&batch).await {
        Ok(()) => {
            metrics.record_batch_delivered(batch.events.len());
            debug!(
                device = %batch.device,
                route = %batch.route.as_str(),
                events = %batch.events.len(),
                latency_ms = %start.elapsed().as_millis(),
                "batch_delivered"
            );
        }
        Err(e) => {
            metrics.record_batch_failed();
            warn!(
                device = %batch.device,
                route = %batch.route.as_str(),
                events = %batch.events.len(),
                error = %e,
                "batch_delivery_failed_requeueing"
            );
            if let Err(returned) = requeue_tx.send(batch) {
                warn!(
                    device = %returned.0.device,
                    events = %returned.0.events.len(),
                    "requeue_closed_batch_lost"
                );
            }
        }
    }
}

/// Create the delivery channels and worker
///
/// Returns the batch sender (for the sink), the requeue receiver (for the
/// event loop) and the worker (to be spawned)
pub fn create_delivery_worker(
    collector: Arc<dyn Collector>,
    metrics: Arc<Metrics>,
) -> (mpsc::UnboundedSender<Batch>, mpsc::UnboundedReceiver<Batch>, DeliveryWorker) {
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let (requeue_tx, requeue_rx) = mpsc::unbounded_channel();
    let worker = DeliveryWorker::new(collector, batch_rx, requeue_tx, metrics);
    (batch_tx, requeue_rx, worker)
}

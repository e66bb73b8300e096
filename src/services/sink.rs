//! Telemetry sink - per-device event buffers with a fixed flush window
//!
//! The first event stored for an idle device arms a one-shot flush timer.
//! Everything stored before the timer fires goes out as a single batch.
//! A device is armed exactly while its buffer exists, so there is no
//! separate flag to keep in sync.

use crate::domain::{Event, Route};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::scheduler::{Scheduler, Timer};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events for one collector series, handed to the delivery worker
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub route: Route,
    pub device: String,
    pub events: Vec<Event>,
}

pub struct TelemetrySink {
    buffers: FxHashMap<(Route, String), Vec<Event>>,
    flush_window: Duration,
    /// Per-device cap; 0 disables it
    max_buffered: usize,
    scheduler: Scheduler,
    batch_tx: mpsc::UnboundedSender<Batch>,
    metrics: Arc<Metrics>,
}

impl TelemetrySink {
    pub fn new(
        config: &Config,
        scheduler: Scheduler,
        batch_tx: mpsc::UnboundedSender<Batch>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            buffers: FxHashMap::default(),
            flush_window: config.flush_window(),
            max_buffered: config.max_buffered_events(),
            scheduler,
            batch_tx,
            metrics,
        }
    }

    /// Append events to a device buffer, arming its flush timer if idle
    pub fn store<I>(&mut self, route: Route, device: &str, events: I)
    where
        I: IntoIterator<Item = Event>,
    {
        let mut events = events.into_iter().peekable();
        if events.peek().is_none() {
            return;
        }

        let buffer = match self.buffers.entry((route, device.to_string())) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.scheduler.once(
                    self.flush_window,
                    Timer::Flush { route, device: device.to_string() },
                );
                debug!(device = %device, route = %route.as_str(), "flush_timer_armed");
                entry.insert(Vec::new())
            }
        };
        buffer.extend(events);

        if self.max_buffered > 0 && buffer.len() > self.max_buffered {
            let excess = buffer.len() - self.max_buffered;
            buffer.drain(..excess);
            warn!(
                device = %device,
                route = %route.as_str(),
                dropped = %excess,
                "buffer_cap_exceeded_dropping_oldest"
            );
            self.metrics.record_events_overflowed(excess);
        }

        self.metrics.set_armed_devices(self.buffers.len());
    }

    /// Detach a device buffer and hand it to the delivery worker.
    /// Called when the device's flush timer fires.
    pub fn flush(&mut self, route: Route, device: &str) {
        let Some(events) = self.buffers.remove(&(route, device.to_string())) else {
            debug!(device = %device, route = %route.as_str(), "flush_without_buffer");
            return;
        };
        self.metrics.set_armed_devices(self.buffers.len());

        let count = events.len();
        let batch = Batch { route, device: device.to_string(), events };
        if self.batch_tx.send(batch).is_err() {
            error!(device = %device, events = %count, "delivery_worker_gone_batch_lost");
        } else {
            debug!(device = %device, route = %route.as_str(), events = %count, "batch_flushed");
        }
    }

    /// Put a failed batch back in front of the delivery path.
    /// Its events join whatever the device has buffered since.
    pub fn requeue(&mut self, batch: Batch) {
        let Batch { route, device, events } = batch;
        self.store(route, &device, events);
    }

    /// Events currently waiting for a device's flush
    pub fn pending(&self, route: Route, device: &str) -> Option<&[Event]> {
        self.buffers.get(&(route, device.to_string())).map(Vec::as_slice)
    }

    pub fn is_armed(&self, route: Route, device: &str) -> bool {
        self.buffers.contains_key(&(route, device.to_string()))
    }

    pub fn armed_devices(&self) -> usize {
        self.buffers.len()
    }
}

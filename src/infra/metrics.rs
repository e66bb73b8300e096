//! Lock-free metrics collection and periodic reporting
//!
//! Counter updates are lock-free atomics shared by the event loop, the
//! delivery tasks and the metrics endpoint. Only `report()` takes a lock,
//! to measure the rate window.
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Raw samples received from adaptors (monotonic)
    samples_total: AtomicU64,
    /// Samples dropped as unknown or malformed (monotonic)
    samples_dropped: AtomicU64,
    /// Events emitted by filters and derived detectors (monotonic)
    events_emitted: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Batches accepted by the collector (monotonic)
    batches_delivered: AtomicU64,
    /// Batch delivery attempts that failed and were re-queued (monotonic)
    batches_failed: AtomicU64,
    /// Events accepted by the collector (monotonic)
    events_delivered: AtomicU64,
    /// Events discarded by the per-device buffer cap (monotonic)
    events_overflowed: AtomicU64,
    /// Classified doorway actions (monotonic)
    occupancy_actions: AtomicU64,
    /// Wandering alarms sent (monotonic)
    wandering_alarms: AtomicU64,
    /// Client messages sent (monotonic)
    client_messages_sent: AtomicU64,
    /// Client acknowledgements matched to a pending message (monotonic)
    client_acks: AtomicU64,
    /// Devices currently holding a buffer and a flush timer (snapshot)
    armed_devices: AtomicU64,
    /// Last report time (for rate calculation)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_overflowed: AtomicU64::new(0),
            occupancy_actions: AtomicU64::new(0),
            wandering_alarms: AtomicU64::new(0),
            client_messages_sent: AtomicU64::new(0),
            client_acks: AtomicU64::new(0),
            armed_devices: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_events_emitted(&self, count: usize) {
        self.events_emitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_batch_delivered(&self, events: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_events_overflowed(&self, count: usize) {
        self.events_overflowed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_occupancy_action(&self) {
        self.occupancy_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wandering_alarm(&self) {
        self.wandering_alarms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_message_sent(&self) {
        self.client_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_ack(&self) {
        self.client_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_armed_devices(&self, count: usize) {
        self.armed_devices.store(count as u64, Ordering::Relaxed);
    }

    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn events_overflowed(&self) -> u64 {
        self.events_overflowed.load(Ordering::Relaxed)
    }

    /// Snapshot all counters; resets the per-report sample counter
    pub fn report(&self) -> MetricsSummary {
        let elapsed_secs = {
            let now = Instant::now();
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };
        let samples_in_period = self.samples_since_report.swap(0, Ordering::Relaxed);
        let samples_per_sec =
            if elapsed_secs > 0.0 { samples_in_period as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary { samples_per_sec, ..self.snapshot() }
    }

    /// Read all counters without touching the rate window (`samples_per_sec` is 0)
    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_per_sec: 0.0,
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_overflowed: self.events_overflowed.load(Ordering::Relaxed),
            occupancy_actions: self.occupancy_actions.load(Ordering::Relaxed),
            wandering_alarms: self.wandering_alarms.load(Ordering::Relaxed),
            client_messages_sent: self.client_messages_sent.load(Ordering::Relaxed),
            client_acks: self.client_acks.load(Ordering::Relaxed),
            armed_devices: self.armed_devices.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_dropped: u64,
    pub samples_per_sec: f64,
    pub events_emitted: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    pub events_overflowed: u64,
    pub occupancy_actions: u64,
    pub wandering_alarms: u64,
    pub client_messages_sent: u64,
    pub client_acks: u64,
    pub armed_devices: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.2}", self.samples_per_sec),
            samples_dropped = %self.samples_dropped,
            events_emitted = %self.events_emitted,
            events_delivered = %self.events_delivered,
            batches_delivered = %self.batches_delivered,
            batches_failed = %self.batches_failed,
            events_overflowed = %self.events_overflowed,
            armed_devices = %self.armed_devices,
            occupancy_actions = %self.occupancy_actions,
            wandering_alarms = %self.wandering_alarms,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_sample();
        metrics.record_sample();
        metrics.record_sample_dropped();
        metrics.record_batch_delivered(5);
        metrics.record_batch_delivered(3);
        metrics.record_batch_failed();

        let summary = metrics.report();
        assert_eq!(summary.samples_total, 2);
        assert_eq!(summary.samples_dropped, 1);
        assert_eq!(summary.batches_delivered, 2);
        assert_eq!(summary.events_delivered, 8);
        assert_eq!(summary.batches_failed, 1);
    }

    #[test]
    fn test_report_resets_rate_window_only() {
        let metrics = Metrics::new();
        metrics.record_sample();
        let _ = metrics.report();
        let summary = metrics.report();
        assert_eq!(summary.samples_total, 1);
        assert_eq!(summary.samples_per_sec, 0.0);
    }

    #[test]
    fn test_snapshot_keeps_rate_window() {
        let metrics = Metrics::new();
        metrics.record_sample();
        assert_eq!(metrics.snapshot().samples_total, 1);
        assert_eq!(metrics.samples_since_report.load(Ordering::Relaxed), 1);
    }
}

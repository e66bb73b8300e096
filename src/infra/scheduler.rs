//! Loop timers
//!
//! Timers never touch gateway state themselves: when one fires, its `Timer`
//! value is sent back into the event loop, which handles it like any other
//! input. Timers cannot be cancelled once scheduled.

use crate::domain::Route;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// What a fired timer asks the event loop to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Flush the buffered events of one device
    Flush { route: Route, device: String },
    /// Re-evaluate every doorway state machine
    OccupancyTick,
    /// Send a client test message
    ClientTest,
}

/// Handle for scheduling timers into the event loop
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Timer>,
}

impl Scheduler {
    /// Create a scheduler and the receiver the event loop listens on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Timer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire `timer` once after `delay`
    pub fn once(&self, delay: Duration, timer: Timer) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            // Receiver gone means the loop has shut down
            let _ = tx.send(timer);
        });
    }

    /// Fire `timer` every `period`, first after one full period.
    /// Stops when the event loop goes away.
    pub fn every(&self, period: Duration, timer: Timer) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(timer.clone()).is_err() {
                    break;
                }
            }
        });
    }
}

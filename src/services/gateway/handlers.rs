//! Handlers for the Gateway
//!
//! Each handler processes one kind of loop input and triggers its side
//! effects (buffered events, outbound messages, new timers).

use super::Gateway;
use crate::domain::messages::{AdaptorData, ClientAck, ManagerConfig, ServiceAnnouncement};
use crate::domain::{epoch_secs, Outbound, Route, SampleValue, SensorKind};
use crate::infra::scheduler::Timer;
use crate::services::wandering::WanderingDetector;
use chrono::Local;
use std::time::Duration;
use tracing::{debug, error, info};

const OCCUPANCY_TICK: Duration = Duration::from_secs(1);
const CLIENT_TEST_FIRST_DELAY: Duration = Duration::from_secs(30);
const CLIENT_TEST_PERIOD: Duration = Duration::from_secs(20);

impl Gateway {
    /// Handle the manager configuration
    ///
    /// Registers new devices, then rebuilds doorway monitoring and the
    /// wandering detector from the full device list. Unchanged doorways keep
    /// their state and the wandering debounce survives the rebuild.
    pub(crate) fn handle_configure(&mut self, config: &ManagerConfig) {
        let added = self.router.configure(config);
        let names = self.router.friendly_names();

        let locations = self.resolver.resolve(&names);
        self.occupancy.reconfigure(&locations);

        let night = self.config.night();
        self.wandering = if night.enabled {
            match WanderingDetector::new(night, &names, Local) {
                Ok(mut detector) => {
                    if let Some(previous) = &self.wandering {
                        detector.carry_over(previous);
                    }
                    Some(detector)
                }
                Err(e) => {
                    error!(error = %format!("{e:#}"), "night_wandering_disabled");
                    None
                }
            }
        } else {
            None
        };

        info!(
            added = %added,
            devices = %self.router.device_count(),
            doorways = %locations.len(),
            night_sensors = %self.wandering.as_ref().map_or(0, |w| w.watched_count()),
            "gateway_configured"
        );
        self.report_state("starting");

        if !self.timers_started {
            self.timers_started = true;
            self.scheduler.every(OCCUPANCY_TICK, Timer::OccupancyTick);
            if self.config.night().client_test {
                self.scheduler.once(CLIENT_TEST_FIRST_DELAY, Timer::ClientTest);
            }
        }
    }

    /// Answer an adaptor's service announcement
    pub(crate) fn handle_service(&mut self, announcement: &ServiceAnnouncement) {
        let Some(request) = self.router.register_services(self.config.app_id(), announcement) else {
            return;
        };
        self.send(Outbound::ServiceRequest { adaptor_id: announcement.id.clone(), request });
        self.report_state("running");
    }

    /// Handle a raw sample from an adaptor
    pub(crate) fn handle_data(&mut self, data: &AdaptorData) {
        let Some(routed) = self.router.route(data) else {
            return;
        };

        if !routed.events.is_empty() {
            self.sink.store(Route::Telemetry, &routed.series, routed.events);
        }

        let sample = routed.sample;
        if let (SensorKind::Binary, SampleValue::Binary(on)) = (sample.kind, sample.value) {
            self.occupancy.on_change(&sample.device_id, sample.timestamp, on);
            self.check_wandering(&sample.device_id, sample.timestamp, on);
        }
    }

    fn check_wandering(&mut self, device_id: &str, timestamp: f64, on: bool) {
        let Some(detector) = self.wandering.as_mut() else {
            return;
        };
        let Some(alarm) = detector.on_motion(device_id, timestamp, on) else {
            return;
        };

        let seq = self.client.alarm(&alarm.sensor, alarm.timestamp);
        self.metrics.record_wandering_alarm();
        self.metrics.record_client_message_sent();
        info!(
            sensor = %alarm.sensor,
            timestamp = %alarm.timestamp,
            seq = %seq,
            "wandering_alarm"
        );
    }

    /// Handle an acknowledgement from the remote client
    pub(crate) fn handle_client_ack(&mut self, ack: &ClientAck) {
        if self.client.receive(ack) {
            self.metrics.record_client_ack();
        }
    }

    /// Handle a fired timer
    pub(crate) fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Flush { route, device } => self.sink.flush(route, &device),
            Timer::OccupancyTick => self.tick_occupancy(epoch_secs()),
            Timer::ClientTest => {
                let seq = self.client.alarm("Test", epoch_secs());
                self.metrics.record_client_message_sent();
                debug!(seq = %seq, "client_test_sent");
                self.scheduler.once(CLIENT_TEST_PERIOD, Timer::ClientTest);
            }
        }
    }

    /// Tick every doorway and store the classified actions
    pub(crate) fn tick_occupancy(&mut self, now: f64) {
        for pulse in self.occupancy.tick(now) {
            info!(
                location = %pulse.location,
                action = %pulse.action.as_str(),
                "occupancy_action"
            );
            self.metrics.record_occupancy_action();
            self.sink.store(Route::DerivedActivity, &pulse.location, pulse.events);
        }
    }
}

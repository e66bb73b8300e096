//! Gateway event loop
//!
//! The Gateway owns every piece of mutable core state and is the only
//! thing that touches it:
//! - Device registry and change-detection filters (via the ingress router)
//! - Per-device telemetry buffers and their flush timers
//! - Doorway occupancy state machines
//! - Night wandering detector and the alarm client
//!
//! Transport messages, fired timers and re-queued batches all arrive as
//! channel messages and are handled one at a time.

mod handlers;

use crate::domain::messages::StateReport;
use crate::domain::{Inbound, Outbound};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::scheduler::{Scheduler, Timer};
use crate::services::client::AlarmClient;
use crate::services::occupancy::OccupancyMonitor;
use crate::services::router::IngressRouter;
use crate::services::sink::{Batch, TelemetrySink};
use crate::services::topology::{NamingConventionResolver, TopologyResolver};
use crate::services::wandering::WanderingDetector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Central event processor
pub struct Gateway {
    /// Application configuration
    pub(crate) config: Config,
    /// Device registry, filters and sample decoding
    pub(crate) router: IngressRouter,
    /// Per-device buffers feeding the delivery worker
    pub(crate) sink: TelemetrySink,
    /// Doorway pairing source
    pub(crate) resolver: Box<dyn TopologyResolver>,
    pub(crate) occupancy: OccupancyMonitor,
    /// Present only when night wandering is enabled and configured
    pub(crate) wandering: Option<WanderingDetector>,
    pub(crate) client: AlarmClient,
    pub(crate) scheduler: Scheduler,
    pub(crate) outbound_tx: mpsc::UnboundedSender<Outbound>,
    pub(crate) metrics: Arc<Metrics>,
    /// Periodic timers start on the first configuration only
    pub(crate) timers_started: bool,
}

impl Gateway {
    pub fn new(
        config: Config,
        scheduler: Scheduler,
        batch_tx: mpsc::UnboundedSender<Batch>,
        outbound_tx: mpsc::UnboundedSender<Outbound>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let sink = TelemetrySink::new(&config, scheduler.clone(), batch_tx, metrics.clone());
        let router = IngressRouter::new(config.sensors().clone(), metrics.clone());
        let client =
            AlarmClient::new(config.app_id(), config.night().client_id.as_str(), outbound_tx.clone());
        let resolver = Box::new(NamingConventionResolver::new(config.doorway()));

        Self {
            config,
            router,
            sink,
            resolver,
            occupancy: OccupancyMonitor::default(),
            wandering: None,
            client,
            scheduler,
            outbound_tx,
            metrics,
            timers_started: false,
        }
    }

    /// Replace the naming-convention doorway resolver
    pub fn with_resolver(mut self, resolver: Box<dyn TopologyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run until the inbound channel closes
    pub async fn run(
        &mut self,
        mut inbound_rx: mpsc::Receiver<Inbound>,
        mut timer_rx: mpsc::UnboundedReceiver<Timer>,
        mut requeue_rx: mpsc::UnboundedReceiver<Batch>,
    ) {
        info!("gateway_started");

        loop {
            tokio::select! {
                message = inbound_rx.recv() => {
                    match message {
                        Some(m) => self.process_inbound(m),
                        None => break, // Transport gone
                    }
                }
                Some(timer) = timer_rx.recv() => {
                    self.handle_timer(timer);
                }
                Some(batch) = requeue_rx.recv() => {
                    self.sink.requeue(batch);
                }
            }
        }

        info!(pending_devices = %self.sink.armed_devices(), "gateway_stopped");
    }

    /// Dispatch one transport message to its handler
    pub fn process_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Configure(config) => self.handle_configure(&config),
            Inbound::Service(announcement) => self.handle_service(&announcement),
            Inbound::Data(data) => self.handle_data(&data),
            Inbound::ClientAck(ack) => self.handle_client_ack(&ack),
        }
    }

    pub(crate) fn send(&self, message: Outbound) {
        if self.outbound_tx.send(message).is_err() {
            warn!("outbound_channel_closed");
        }
    }

    pub(crate) fn report_state(&self, state: &'static str) {
        info!(state = %state, "app_state");
        self.send(Outbound::State(StateReport::new(self.config.app_id(), state)));
    }
}

//! Sensor gateway - telemetry relay and home-activity detectors
//!
//! Receives adaptor samples over MQTT, reduces them to change events and
//! ships them to the time-series collector. Derives doorway occupancy
//! actions and night-time wandering alarms from motion and contact sensors.
//!
//! Module structure:
//! - `domain/` - Core types (Sample, Event, wire messages)
//! - `io/` - External interfaces (MQTT, collector HTTP, Prometheus)
//! - `services/` - Business logic (Gateway loop, filters, detectors)
//! - `infra/` - Infrastructure (Config, Metrics, Scheduler)

use clap::Parser;
use sensor_gateway::infra::{Config, Metrics, Scheduler};
use sensor_gateway::io::{mqtt, HttpCollector, MqttPublisher, Topics};
use sensor_gateway::services::{create_delivery_worker, Gateway};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Sensor gateway - adaptor telemetry relay and activity detection
#[derive(Parser, Debug)]
#[command(name = "sensor-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "sensor-gateway starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        bridge_id = %config.bridge_id(),
        app_id = %config.app_id(),
        collector = %config.collector_base_url(),
        flush_window_secs = %config.flush_window().as_secs(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_prefix = %config.mqtt_topic_prefix(),
        night_enabled = %config.night().enabled,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let (scheduler, timer_rx) = Scheduler::new();

    // Start delivery worker
    let collector = Arc::new(HttpCollector::new(&config)?);
    let (batch_tx, requeue_rx, worker) = create_delivery_worker(collector, metrics.clone());
    tokio::spawn(worker.run());

    // Create transport channels (inbound bounded for backpressure)
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    // Start MQTT ingress and egress on one connection
    let topics = Topics::new(config.mqtt_topic_prefix());
    let (client, eventloop) = mqtt::connect(&config);

    let publisher = MqttPublisher::new(client.clone(), topics.clone(), outbound_rx);
    let publisher_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        mqtt::run_ingress(client, eventloop, topics, inbound_tx, mqtt_metrics, mqtt_shutdown).await;
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_bridge = config.bridge_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = sensor_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_bridge,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run gateway - consumes messages until the transport closes
    let mut gateway = Gateway::new(config, scheduler, batch_tx, outbound_tx, metrics);
    gateway.run(inbound_rx, timer_rx, requeue_rx).await;

    info!("sensor-gateway shutdown complete");
    Ok(())
}

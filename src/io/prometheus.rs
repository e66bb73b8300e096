//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with bridge label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    bridge: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{bridge=\"{bridge}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, bridge: &str) -> String {
    let mut output = String::with_capacity(2048);

    write_ingress_metrics(&mut output, bridge, summary);
    write_delivery_metrics(&mut output, bridge, summary);
    write_detector_metrics(&mut output, bridge, summary);

    output
}

fn write_ingress_metrics(output: &mut String, bridge: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_gateway_samples_total",
        "Raw samples received from adaptors",
        MetricType::Counter,
        bridge,
        summary.samples_total,
    );
    write_metric(
        output,
        "sensor_gateway_samples_dropped_total",
        "Samples dropped as unknown, malformed or over capacity",
        MetricType::Counter,
        bridge,
        summary.samples_dropped,
    );
    write_metric(
        output,
        "sensor_gateway_events_emitted_total",
        "Events emitted by change-detection filters",
        MetricType::Counter,
        bridge,
        summary.events_emitted,
    );
}

fn write_delivery_metrics(output: &mut String, bridge: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_gateway_batches_delivered_total",
        "Batches accepted by the collector",
        MetricType::Counter,
        bridge,
        summary.batches_delivered,
    );
    write_metric(
        output,
        "sensor_gateway_batches_failed_total",
        "Batch delivery attempts that failed and were re-queued",
        MetricType::Counter,
        bridge,
        summary.batches_failed,
    );
    write_metric(
        output,
        "sensor_gateway_events_delivered_total",
        "Events accepted by the collector",
        MetricType::Counter,
        bridge,
        summary.events_delivered,
    );
    write_metric(
        output,
        "sensor_gateway_events_overflowed_total",
        "Events discarded by the per-device buffer cap",
        MetricType::Counter,
        bridge,
        summary.events_overflowed,
    );
    write_metric(
        output,
        "sensor_gateway_armed_devices",
        "Devices holding buffered events",
        MetricType::Gauge,
        bridge,
        summary.armed_devices,
    );
}

fn write_detector_metrics(output: &mut String, bridge: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_gateway_occupancy_actions_total",
        "Classified doorway actions",
        MetricType::Counter,
        bridge,
        summary.occupancy_actions,
    );
    write_metric(
        output,
        "sensor_gateway_wandering_alarms_total",
        "Night wandering alarms sent",
        MetricType::Counter,
        bridge,
        summary.wandering_alarms,
    );
    write_metric(
        output,
        "sensor_gateway_client_messages_total",
        "Messages sent to the remote client",
        MetricType::Counter,
        bridge,
        summary.client_messages_sent,
    );
    write_metric(
        output,
        "sensor_gateway_client_acks_total",
        "Client acknowledgements matched to a sent message",
        MetricType::Counter,
        bridge,
        summary.client_acks,
    );
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    bridge: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.snapshot(), &bridge);
            Ok(respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body))
        }
        (&Method::GET, "/health") => Ok(respond(StatusCode::OK, "text/plain", "ok")),
        _ => Ok(respond(StatusCode::NOT_FOUND, "text/plain", "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    bridge_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let bridge = Arc::new(bridge_id);

    info!(port = %port, bridge = %bridge, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let bridge = bridge.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let bridge = bridge.clone();
                                async move { handle_request(req, metrics, bridge).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

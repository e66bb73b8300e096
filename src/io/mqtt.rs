//! MQTT transport - adaptor and manager messages in, requests and alarms out
//!
//! Topics hang off the configured prefix:
//! - `{prefix}/in/configure` - manager configuration (adaptor list)
//! - `{prefix}/in/service` - adaptor service announcements
//! - `{prefix}/in/data` - adaptor samples
//! - `{prefix}/in/conc` - client acknowledgements
//! - `{prefix}/out/service/{adaptor}` - service requests (QoS 1)
//! - `{prefix}/out/conc` - client alarm messages (QoS 1)
//! - `{prefix}/out/state` - app state reports (QoS 1)

use crate::domain::messages::{AdaptorData, ClientAck, ManagerConfig, ServiceAnnouncement};
use crate::domain::{Inbound, Outbound};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Topic layout under one prefix
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.trim_end_matches('/').to_string() }
    }

    /// Subscription filter for everything inbound
    pub fn inbound_filter(&self) -> String {
        format!("{}/in/#", self.prefix)
    }

    /// Decode an inbound publish. `Ok(None)` for topics we do not handle.
    pub fn parse_inbound(&self, topic: &str, payload: &[u8]) -> Result<Option<Inbound>, serde_json::Error> {
        let Some(kind) = topic.strip_prefix(&self.prefix).and_then(|t| t.strip_prefix("/in/")) else {
            return Ok(None);
        };
        let message = match kind {
            "configure" => Inbound::Configure(serde_json::from_slice::<ManagerConfig>(payload)?),
            "service" => Inbound::Service(serde_json::from_slice::<ServiceAnnouncement>(payload)?),
            "data" => Inbound::Data(serde_json::from_slice::<AdaptorData>(payload)?),
            "conc" => Inbound::ClientAck(serde_json::from_slice::<ClientAck>(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Topic and JSON payload for an outbound message
    pub fn encode_outbound(&self, message: &Outbound) -> Result<(String, Vec<u8>), serde_json::Error> {
        match message {
            Outbound::ServiceRequest { adaptor_id, request } => Ok((
                format!("{}/out/service/{}", self.prefix, adaptor_id),
                serde_json::to_vec(request)?,
            )),
            Outbound::Client(client) => {
                Ok((format!("{}/out/conc", self.prefix), serde_json::to_vec(client)?))
            }
            Outbound::State(state) => {
                Ok((format!("{}/out/state", self.prefix), serde_json::to_vec(state)?))
            }
        }
    }
}

/// Create the MQTT client and its event loop
pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    let client_id = format!("sensor-gateway-{}", Uuid::now_v7().simple());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    AsyncClient::new(mqttoptions, 100)
}

/// Drive the MQTT event loop, forwarding inbound messages to the gateway
///
/// Messages are sent via try_send so a busy gateway never stalls the MQTT
/// keep-alive. Dropped messages are counted and logged (rate-limited).
/// The subscription is renewed on every (re)connect.
pub async fn run_ingress(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    inbound_tx: mpsc::Sender<Inbound>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return;
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let filter = topics.inbound_filter();
                        if let Err(e) = client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
                            error!(error = %e, "mqtt_subscribe_failed");
                        } else {
                            info!(topic = %filter, "mqtt_connected_and_subscribed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = match topics.parse_inbound(&publish.topic, &publish.payload) {
                            Ok(Some(message)) => message,
                            Ok(None) => {
                                debug!(topic = %publish.topic, "mqtt_topic_ignored");
                                continue;
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_invalid");
                                continue;
                            }
                        };
                        match inbound_tx.try_send(message) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_sample_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("mqtt_inbound_dropped: channel full");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("inbound_channel_closed");
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// MQTT publisher actor
///
/// Receives outbound messages from the gateway and publishes them.
pub struct MqttPublisher {
    client: AsyncClient,
    topics: Topics,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, topics: Topics, rx: mpsc::UnboundedReceiver<Outbound>) -> Self {
        Self { client, topics, rx }
    }

    /// Publish until the gateway goes away or shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("mqtt_publisher_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Drain remaining messages
                        while let Ok(message) = self.rx.try_recv() {
                            self.publish(message).await;
                        }
                        info!("mqtt_publisher_shutdown");
                        return;
                    }
                }
                message = self.rx.recv() => {
                    match message {
                        Some(m) => self.publish(m).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish(&self, message: Outbound) {
        let (topic, payload) = match self.topics.encode_outbound(&message) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "mqtt_outbound_encode_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic.as_str(), QoS::AtLeastOnce, false, payload).await {
            error!(topic = %topic, error = %e, "mqtt_publish_failed");
        } else {
            debug!(topic = %topic, "mqtt_published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{ServiceEntry, ServiceRequest, StateReport};

    fn topics() -> Topics {
        Topics::new("bridge/sch_app/")
    }

    #[test]
    fn test_inbound_filter() {
        assert_eq!(topics().inbound_filter(), "bridge/sch_app/in/#");
    }

    #[test]
    fn test_parse_data() {
        let payload =
            br#"{"id":"dev1","characteristic":"temperature","timeStamp":1400000000.5,"data":21.5}"#;
        let message = topics().parse_inbound("bridge/sch_app/in/data", payload).unwrap();
        let Some(Inbound::Data(data)) = message else {
            panic!("expected data message");
        };
        assert_eq!(data.id, "dev1");
        assert_eq!(data.timestamp, 1400000000.5);
    }

    #[test]
    fn test_parse_configure() {
        let payload = br#"{"adaptors":[{"id":"dev1","name":"tag","friendly_name":"Kitchen Tag"}]}"#;
        let message = topics().parse_inbound("bridge/sch_app/in/configure", payload).unwrap();
        let Some(Inbound::Configure(config)) = message else {
            panic!("expected configure message");
        };
        assert_eq!(config.adaptors[0].friendly_name, "Kitchen Tag");
    }

    #[test]
    fn test_parse_service_and_ack() {
        let service = br#"{"id":"dev1","service":[{"characteristic":"temperature","interval":300}]}"#;
        assert!(matches!(
            topics().parse_inbound("bridge/sch_app/in/service", service),
            Ok(Some(Inbound::Service(_)))
        ));

        let ack = br#"{"source":"CID7","body":{"n":3}}"#;
        assert!(matches!(
            topics().parse_inbound("bridge/sch_app/in/conc", ack),
            Ok(Some(Inbound::ClientAck(_)))
        ));
    }

    #[test]
    fn test_unknown_topics_ignored() {
        assert!(topics().parse_inbound("bridge/sch_app/in/other", b"{}").unwrap().is_none());
        assert!(topics().parse_inbound("elsewhere/in/data", b"{}").unwrap().is_none());
    }

    #[test]
    fn test_invalid_payload_is_error() {
        assert!(topics().parse_inbound("bridge/sch_app/in/data", b"not json").is_err());
    }

    #[test]
    fn test_encode_outbound_topics() {
        let request = Outbound::ServiceRequest {
            adaptor_id: "dev1".to_string(),
            request: ServiceRequest::new(
                "sch_app",
                vec![ServiceEntry { characteristic: "binary_sensor", interval: 0.0 }],
            ),
        };
        let (topic, payload) = topics().encode_outbound(&request).unwrap();
        assert_eq!(topic, "bridge/sch_app/out/service/dev1");
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["id"], "sch_app");
        assert_eq!(json["request"], "service");

        let state = Outbound::State(StateReport::new("sch_app", "running"));
        let (topic, payload) = topics().encode_outbound(&state).unwrap();
        assert_eq!(topic, "bridge/sch_app/out/state");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&payload).unwrap(),
            serde_json::json!({"id": "sch_app", "status": "state", "state": "running"})
        );
    }
}

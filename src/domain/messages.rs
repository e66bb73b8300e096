//! Wire messages exchanged with the transport collaborator
//!
//! Inbound: manager configuration, adaptor service announcements, adaptor
//! data samples and client acknowledgements. Outbound: service requests,
//! client (alarm) messages and application state reports.

use serde::{Deserialize, Serialize};

/// One adaptor (device) known to the manager
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptorInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub friendly_name: String,
}

/// Manager configuration listing the adaptors this app may talk to
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub adaptors: Vec<AdaptorInfo>,
}

/// A characteristic offered by an adaptor
#[derive(Debug, Clone, Deserialize)]
pub struct OfferedService {
    pub characteristic: String,
    #[serde(default)]
    pub interval: Option<f64>,
}

/// Adaptor service announcement
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAnnouncement {
    pub id: String,
    #[serde(default)]
    pub service: Vec<OfferedService>,
}

/// Raw sample message from an adaptor
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptorData {
    pub id: String,
    pub characteristic: String,
    #[serde(rename = "timeStamp")]
    pub timestamp: f64,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Requested characteristic and polling interval (0 = push)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceEntry {
    pub characteristic: &'static str,
    pub interval: f64,
}

/// Response to a service announcement
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRequest {
    pub id: String,
    pub request: &'static str,
    pub service: Vec<ServiceEntry>,
}

impl ServiceRequest {
    pub fn new(id: &str, service: Vec<ServiceEntry>) -> Self {
        Self { id: id.to_string(), request: "service", service }
    }
}

/// Body of an outbound client message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientBody {
    /// Message type, e.g. "alarm"
    pub m: String,
    /// Sensor name
    pub s: String,
    /// Epoch seconds
    pub t: f64,
    /// Sequence number, assigned by the client on send
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
}

/// Outbound message to the remote client (concentrator)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMessage {
    pub source: String,
    pub destination: String,
    pub body: ClientBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckBody {
    #[serde(default)]
    pub n: Option<u64>,
}

/// Inbound message from the remote client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientAck {
    #[serde(default)]
    pub body: Option<AckBody>,
}

/// Application state report for the manager
#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub id: String,
    pub status: &'static str,
    pub state: &'static str,
}

impl StateReport {
    pub fn new(id: &str, state: &'static str) -> Self {
        Self { id: id.to_string(), status: "state", state }
    }
}

/// Messages delivered into the gateway loop by the transport
#[derive(Debug, Clone)]
pub enum Inbound {
    Configure(ManagerConfig),
    Service(ServiceAnnouncement),
    Data(AdaptorData),
    ClientAck(ClientAck),
}

/// Messages the gateway hands to the transport
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Service request addressed to one adaptor
    ServiceRequest { adaptor_id: String, request: ServiceRequest },
    Client(ClientMessage),
    State(StateReport),
}

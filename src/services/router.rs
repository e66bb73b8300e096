//! Ingress router - device registry, service registration and sample dispatch
//!
//! Raw adaptor messages come in as JSON-shaped payloads. The router keeps
//! the device registry from the manager configuration, answers service
//! announcements by registering filters, and turns adaptor data into typed
//! samples for the filter bank. Unknown devices, unknown characteristics
//! and undecodable payloads are dropped here, before any state changes.

use crate::domain::messages::{
    AdaptorData, ManagerConfig, ServiceAnnouncement, ServiceEntry, ServiceRequest,
};
use crate::domain::{Sample, SampleValue, SensorKind};
use crate::infra::config::SensorSettings;
use crate::infra::metrics::Metrics;
use crate::services::filters::{Emitted, FilterBank};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A registered adaptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub friendly_name: String,
    /// Collector series name: friendly name with spaces replaced by `_`
    pub series: String,
}

impl Device {
    pub fn new(friendly_name: &str) -> Self {
        Self { friendly_name: friendly_name.to_string(), series: friendly_name.replace(' ', "_") }
    }
}

/// A decoded sample and the events its filter emitted
#[derive(Debug)]
pub struct Routed {
    pub sample: Sample,
    /// Series to store `events` under
    pub series: String,
    pub events: Emitted,
}

pub struct IngressRouter {
    devices: BTreeMap<String, Device>,
    filters: FilterBank,
    metrics: Arc<Metrics>,
}

impl IngressRouter {
    pub fn new(settings: SensorSettings, metrics: Arc<Metrics>) -> Self {
        Self { devices: BTreeMap::new(), filters: FilterBank::new(settings), metrics }
    }

    /// Register adaptors from a manager configuration.
    /// Adaptors already known keep their entry; returns how many were added.
    pub fn configure(&mut self, config: &ManagerConfig) -> usize {
        let mut added = 0;
        for adaptor in &config.adaptors {
            if self.devices.contains_key(&adaptor.id) {
                continue;
            }
            let device = Device::new(&adaptor.friendly_name);
            info!(
                device = %adaptor.id,
                name = %adaptor.name,
                friendly_name = %device.friendly_name,
                series = %device.series,
                "device_registered"
            );
            self.devices.insert(adaptor.id.clone(), device);
            added += 1;
        }
        added
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Device id -> friendly name for every registered device
    pub fn friendly_names(&self) -> BTreeMap<String, String> {
        self.devices
            .iter()
            .map(|(id, device)| (id.clone(), device.friendly_name.clone()))
            .collect()
    }

    /// Create filters for the offered characteristics we want and build the
    /// service request naming them. None if the device is not registered.
    pub fn register_services(
        &mut self,
        app_id: &str,
        announcement: &ServiceAnnouncement,
    ) -> Option<ServiceRequest> {
        if !self.devices.contains_key(&announcement.id) {
            warn!(device = %announcement.id, "service_from_unknown_device");
            return None;
        }

        let mut service = Vec::new();
        for offered in &announcement.service {
            let Some(kind) = SensorKind::from_characteristic(&offered.characteristic) else {
                debug!(
                    device = %announcement.id,
                    characteristic = %offered.characteristic,
                    "service_characteristic_unsupported"
                );
                continue;
            };
            if self.filters.register(&announcement.id, kind) {
                service.push(ServiceEntry {
                    characteristic: kind.as_str(),
                    interval: self.filters.settings().polling_interval(kind),
                });
            }
        }

        info!(device = %announcement.id, requested = %service.len(), "service_registered");
        Some(ServiceRequest::new(app_id, service))
    }

    /// Decode a data message and run it through its filter.
    /// None if the message is dropped.
    pub fn route(&mut self, data: &AdaptorData) -> Option<Routed> {
        self.metrics.record_sample();

        let Some(kind) = SensorKind::from_characteristic(&data.characteristic) else {
            debug!(
                device = %data.id,
                characteristic = %data.characteristic,
                "sample_dropped_unknown_characteristic"
            );
            self.metrics.record_sample_dropped();
            return None;
        };
        let Some(device) = self.devices.get(&data.id) else {
            debug!(device = %data.id, characteristic = %kind, "sample_dropped_unknown_device");
            self.metrics.record_sample_dropped();
            return None;
        };
        let Some(value) = decode_value(kind, &data.data).filter(|_| data.timestamp.is_finite())
        else {
            warn!(
                device = %data.id,
                characteristic = %kind,
                data = %data.data,
                "sample_dropped_malformed"
            );
            self.metrics.record_sample_dropped();
            return None;
        };

        let series = device.series.clone();
        let sample = Sample { device_id: data.id.clone(), kind, timestamp: data.timestamp, value };
        let events = self.filters.apply(&sample).unwrap_or_default();
        self.metrics.record_events_emitted(events.len());

        Some(Routed { sample, series, events })
    }
}

/// Decode the `data` payload into the shape expected for `kind`
pub fn decode_value(kind: SensorKind, data: &Value) -> Option<SampleValue> {
    match kind {
        SensorKind::Temperature
        | SensorKind::IrTemperature
        | SensorKind::Humidity
        | SensorKind::Luminance
        | SensorKind::Battery
        | SensorKind::Power => data.as_f64().map(SampleValue::Scalar),
        SensorKind::Acceleration | SensorKind::Gyro | SensorKind::Magnetometer => {
            let axis = |name: &str| data.get(name).and_then(Value::as_f64);
            Some(SampleValue::Vector([axis("x")?, axis("y")?, axis("z")?]))
        }
        SensorKind::Binary | SensorKind::Connected => decode_switch(data).map(SampleValue::Binary),
        SensorKind::Buttons => {
            let button = |name: &str| data.get(name).and_then(decode_button);
            Some(SampleValue::Buttons { left: button("leftButton")?, right: button("rightButton")? })
        }
    }
}

fn decode_switch(data: &Value) -> Option<bool> {
    match data {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "on" | "true" => Some(true),
            "off" | "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

fn decode_button(data: &Value) -> Option<i64> {
    match data {
        Value::Bool(b) => Some(i64::from(*b)),
        other => other.as_i64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::{AdaptorInfo, OfferedService};
    use crate::domain::Event;
    use serde_json::json;

    fn router() -> IngressRouter {
        let mut router = IngressRouter::new(SensorSettings::default(), Arc::new(Metrics::new()));
        router.configure(&ManagerConfig {
            adaptors: vec![
                AdaptorInfo {
                    id: "dev1".to_string(),
                    name: "SensorTag".to_string(),
                    friendly_name: "Kitchen Tag".to_string(),
                },
                AdaptorInfo {
                    id: "dev2".to_string(),
                    name: "zwave".to_string(),
                    friendly_name: "PIR Inside Door".to_string(),
                },
            ],
        });
        router
    }

    fn announce(id: &str, characteristics: &[&str]) -> ServiceAnnouncement {
        ServiceAnnouncement {
            id: id.to_string(),
            service: characteristics
                .iter()
                .map(|c| OfferedService { characteristic: c.to_string(), interval: None })
                .collect(),
        }
    }

    fn data(id: &str, characteristic: &str, timestamp: f64, value: Value) -> AdaptorData {
        AdaptorData {
            id: id.to_string(),
            characteristic: characteristic.to_string(),
            timestamp,
            data: value,
        }
    }

    #[test]
    fn test_configure_adds_only_new_devices() {
        let mut router = router();
        assert_eq!(router.device("dev1").unwrap().series, "Kitchen_Tag");

        let added = router.configure(&ManagerConfig {
            adaptors: vec![
                AdaptorInfo {
                    id: "dev1".to_string(),
                    name: String::new(),
                    friendly_name: "Renamed".to_string(),
                },
                AdaptorInfo {
                    id: "dev3".to_string(),
                    name: String::new(),
                    friendly_name: "Hall".to_string(),
                },
            ],
        });
        assert_eq!(added, 1);
        assert_eq!(router.device("dev1").unwrap().friendly_name, "Kitchen Tag");
        assert_eq!(router.device_count(), 3);
    }

    #[test]
    fn test_service_request_lists_enabled_characteristics() {
        let mut router = router();
        let request = router
            .register_services(
                "sch_app",
                &announce("dev1", &["temperature", "acceleration", "binary_sensor", "buttons", "smell"]),
            )
            .unwrap();

        assert_eq!(request.id, "sch_app");
        assert_eq!(
            request.service,
            vec![
                ServiceEntry { characteristic: "temperature", interval: 600.0 },
                ServiceEntry { characteristic: "binary_sensor", interval: 0.0 },
            ]
        );
    }

    #[test]
    fn test_service_from_unknown_device() {
        let mut router = router();
        assert!(router.register_services("sch_app", &announce("ghost", &["temperature"])).is_none());
    }

    #[test]
    fn test_route_applies_filter_under_series_name() {
        let mut router = router();
        router.register_services("sch_app", &announce("dev1", &["temperature"]));

        let routed = router.route(&data("dev1", "temperature", 100.0, json!(21.5))).unwrap();
        assert_eq!(routed.series, "Kitchen_Tag");
        assert_eq!(routed.sample.kind, SensorKind::Temperature);
        assert_eq!(routed.events.as_slice(), &[Event::new("temperature", 21.5, 100.0)]);

        let routed = router.route(&data("dev1", "temperature", 101.0, json!(21.6))).unwrap();
        assert!(routed.events.is_empty());
    }

    #[test]
    fn test_route_without_filter_still_decodes() {
        let mut router = router();
        let routed = router.route(&data("dev2", "binary_sensor", 10.0, json!("on"))).unwrap();
        assert_eq!(routed.sample.value, SampleValue::Binary(true));
        assert!(routed.events.is_empty());
    }

    #[test]
    fn test_route_drops_unknown_and_malformed() {
        let metrics = Arc::new(Metrics::new());
        let mut router = IngressRouter::new(SensorSettings::default(), metrics.clone());
        router.configure(&ManagerConfig {
            adaptors: vec![AdaptorInfo {
                id: "dev1".to_string(),
                name: String::new(),
                friendly_name: "Tag".to_string(),
            }],
        });

        assert!(router.route(&data("ghost", "temperature", 1.0, json!(20.0))).is_none());
        assert!(router.route(&data("dev1", "smell", 1.0, json!(20.0))).is_none());
        assert!(router.route(&data("dev1", "temperature", 1.0, json!("warm"))).is_none());
        assert!(router.route(&data("dev1", "acceleration", 1.0, json!({"x": 1.0}))).is_none());
        assert!(router.route(&data("dev1", "temperature", f64::NAN, json!(20.0))).is_none());
        assert_eq!(metrics.samples_total(), 5);
        assert_eq!(metrics.samples_dropped(), 5);
    }

    #[test]
    fn test_decode_shapes() {
        assert_eq!(
            decode_value(SensorKind::Gyro, &json!({"x": 1, "y": 2.5, "z": -3})),
            Some(SampleValue::Vector([1.0, 2.5, -3.0]))
        );
        assert_eq!(decode_value(SensorKind::Binary, &json!("off")), Some(SampleValue::Binary(false)));
        assert_eq!(decode_value(SensorKind::Connected, &json!(true)), Some(SampleValue::Binary(true)));
        assert_eq!(decode_value(SensorKind::Binary, &json!("maybe")), None);
        assert_eq!(
            decode_value(SensorKind::Buttons, &json!({"leftButton": 1, "rightButton": false})),
            Some(SampleValue::Buttons { left: 1, right: 0 })
        );
        assert_eq!(decode_value(SensorKind::Power, &json!(null)), None);
    }
}

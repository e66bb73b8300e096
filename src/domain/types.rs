//! Shared types for the sensor gateway

use serde::Serialize;
use std::fmt;

/// Sensor characteristic offered by an adaptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    IrTemperature,
    Humidity,
    Luminance,
    Battery,
    Power,
    Acceleration,
    Gyro,
    Magnetometer,
    Binary,
    Connected,
    Buttons,
}

impl SensorKind {
    pub const ALL: [SensorKind; 12] = [
        SensorKind::Temperature,
        SensorKind::IrTemperature,
        SensorKind::Humidity,
        SensorKind::Luminance,
        SensorKind::Battery,
        SensorKind::Power,
        SensorKind::Acceleration,
        SensorKind::Gyro,
        SensorKind::Magnetometer,
        SensorKind::Binary,
        SensorKind::Connected,
        SensorKind::Buttons,
    ];

    /// Characteristic name as used on the wire
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::IrTemperature => "ir_temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Luminance => "luminance",
            SensorKind::Battery => "battery",
            SensorKind::Power => "power",
            SensorKind::Acceleration => "acceleration",
            SensorKind::Gyro => "gyro",
            SensorKind::Magnetometer => "magnetometer",
            SensorKind::Binary => "binary_sensor",
            SensorKind::Connected => "connected",
            SensorKind::Buttons => "buttons",
        }
    }

    /// Parse a wire characteristic name
    pub fn from_characteristic(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded value of a raw sample; shape depends on the sensor kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    Vector([f64; 3]),
    Binary(bool),
    Buttons { left: i64, right: i64 },
}

/// One raw sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub device_id: String,
    pub kind: SensorKind,
    /// Epoch seconds
    pub timestamp: f64,
    pub value: SampleValue,
}

/// Value carried by a reportable event
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Int(i64),
    Float(f64),
}

impl Reading {
    #[inline]
    pub fn from_bool(value: bool) -> Self {
        Reading::Int(i64::from(value))
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Float(value)
    }
}

impl From<i64> for Reading {
    fn from(value: i64) -> Self {
        Reading::Int(value)
    }
}

/// A reportable fact ready for delivery, serialized as `{"n", "v", "t"}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "n")]
    pub name: &'static str,
    #[serde(rename = "v")]
    pub value: Reading,
    #[serde(rename = "t")]
    pub timestamp: f64,
}

impl Event {
    #[inline]
    pub fn new(name: &'static str, value: impl Into<Reading>, timestamp: f64) -> Self {
        Self { name, value: value.into(), timestamp }
    }
}

/// Which collector series family a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Raw device telemetry
    Telemetry,
    /// Synthesized activity events (entry/exit pulses)
    DerivedActivity,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Telemetry => "telemetry",
            Route::DerivedActivity => "da",
        }
    }
}

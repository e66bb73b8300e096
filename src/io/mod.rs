//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT transport for manager, adaptor and client messages
//! - `collector` - HTTP client for the time-series collector
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod collector;
pub mod mqtt;
pub mod prometheus;

// Re-export commonly used types
pub use collector::HttpCollector;
pub use mqtt::{MqttPublisher, Topics};

//! Domain models - core data types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Sample` - one raw sensor reading
//! - `Event` - a reportable fact ready for delivery
//! - `SensorKind` - characteristic offered by an adaptor
//! - wire messages exchanged with the transport

pub mod messages;
pub mod types;

pub use messages::{Inbound, Outbound};
pub use types::{Event, Reading, Route, Sample, SampleValue, SensorKind};

/// Current wall clock time in epoch seconds
#[inline]
pub fn epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `gateway` - Central event loop owning all mutable state
//! - `router` - Device registry, service registration and sample decoding
//! - `filters` - Per-characteristic change detection
//! - `sink` - Per-device event buffers with flush timers
//! - `delivery` - Async batch delivery worker
//! - `topology` - Doorway sensor pairing
//! - `occupancy` - Doorway state machines and action classification
//! - `wandering` - Night-time motion alarms
//! - `client` - Sequenced alarm messages to the remote client

pub mod client;
pub mod delivery;
pub mod filters;
pub mod gateway;
pub mod occupancy;
pub mod router;
pub mod sink;
pub mod topology;
pub mod wandering;

// Re-export commonly used types
pub use delivery::{create_delivery_worker, Collector, DeliveryError, DeliveryWorker};
pub use gateway::Gateway;
pub use sink::{Batch, TelemetrySink};
pub use topology::{DoorwayLocation, NamingConventionResolver, TopologyResolver};

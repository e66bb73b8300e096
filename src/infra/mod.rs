//! Infrastructure - configuration, metrics, and timers
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `scheduler` - One-shot and periodic timers feeding the event loop

pub mod config;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, TemperatureMode};
pub use metrics::Metrics;
pub use scheduler::{Scheduler, Timer};

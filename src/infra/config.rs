//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key has a default, so a partial file is valid.

use crate::domain::SensorKind;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

/// Temperature reporting mode, fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureMode {
    /// Report when the value moves by at least the minimum change
    OnChange,
    /// Report once per calendar minute
    Regular,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge identifier, used to build collector series URLs
    pub id: String,
    /// This application's identifier on the bus
    pub app_id: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { id: "BID0".to_string(), app_id: "sch_app".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub base_url: String,
    /// Basic-auth key for the collector
    pub key: String,
    /// Time to gather values for a device before sending them
    pub flush_window_secs: u64,
    pub timeout_ms: u64,
    /// Per-device cap on buffered events (oldest dropped beyond it)
    pub max_buffered_events: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://geras.1248.io/series/".to_string(),
            key: "undefined".to_string(),
            flush_window_secs: 20,
            timeout_ms: 10_000,
            max_buffered_events: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            topic_prefix: "bridge/sch_app".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Per sensor kind enable flags, thresholds and polling intervals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub temperature: bool,
    pub temp_min_change: f64,
    pub temperature_mode: TemperatureMode,
    pub irtemperature: bool,
    pub irtemp_min_change: f64,
    pub humidity: bool,
    pub humidity_min_change: f64,
    pub buttons: bool,
    pub accel: bool,
    pub accel_min_change: f64,
    pub accel_polling_interval: f64,
    pub gyro: bool,
    pub gyro_min_change: f64,
    pub gyro_polling_interval: f64,
    pub magnet: bool,
    pub magnet_min_change: f64,
    pub magnet_polling_interval: f64,
    pub binary: bool,
    pub luminance: bool,
    pub luminance_min_change: f64,
    pub power: bool,
    pub power_min_change: f64,
    pub battery: bool,
    pub battery_min_change: f64,
    pub connected: bool,
    pub slow_polling_interval: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            temperature: true,
            temp_min_change: 0.2,
            temperature_mode: TemperatureMode::OnChange,
            irtemperature: false,
            irtemp_min_change: 0.5,
            humidity: true,
            humidity_min_change: 0.2,
            buttons: false,
            accel: false,
            accel_min_change: 0.02,
            accel_polling_interval: 3.0,
            gyro: false,
            gyro_min_change: 0.5,
            gyro_polling_interval: 3.0,
            magnet: false,
            magnet_min_change: 1.5,
            magnet_polling_interval: 3.0,
            binary: true,
            luminance: true,
            luminance_min_change: 1.0,
            power: true,
            power_min_change: 1.0,
            battery: true,
            battery_min_change: 1.0,
            connected: true,
            slow_polling_interval: 600.0,
        }
    }
}

impl SensorSettings {
    /// Whether readings of this kind are collected at all
    pub fn is_enabled(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::IrTemperature => self.irtemperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::Luminance => self.luminance,
            SensorKind::Battery => self.battery,
            SensorKind::Power => self.power,
            SensorKind::Acceleration => self.accel,
            SensorKind::Gyro => self.gyro,
            SensorKind::Magnetometer => self.magnet,
            SensorKind::Binary => self.binary,
            SensorKind::Connected => self.connected,
            SensorKind::Buttons => self.buttons,
        }
    }

    /// Polling interval requested from the adaptor, 0 meaning push
    pub fn polling_interval(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Temperature | SensorKind::IrTemperature | SensorKind::Humidity => {
                self.slow_polling_interval
            }
            SensorKind::Acceleration => self.accel_polling_interval,
            SensorKind::Gyro => self.gyro_polling_interval,
            SensorKind::Magnetometer => self.magnet_polling_interval,
            SensorKind::Luminance
            | SensorKind::Battery
            | SensorKind::Power
            | SensorKind::Binary
            | SensorKind::Connected
            | SensorKind::Buttons => 0.0,
        }
    }
}

/// Nocturnal wandering detection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NightSettings {
    pub enabled: bool,
    /// Window start, "HH:MM"
    pub start: String,
    /// Window end, "HH:MM" (may be earlier than start, wrapping midnight)
    pub end: String,
    /// Friendly names of watched sensors; empty watches every device
    pub sensors: Vec<String>,
    /// Minimum seconds between alarms
    pub ignore_secs: f64,
    /// Destination client id for alarm messages
    pub client_id: String,
    /// Send a periodic test alarm
    pub client_test: bool,
}

impl Default for NightSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "00:30".to_string(),
            end: "07:00".to_string(),
            sensors: Vec::new(),
            ignore_secs: 600.0,
            client_id: "none".to_string(),
            client_test: false,
        }
    }
}

/// Name tokens identifying doorway sensors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoorwayMarkers {
    pub contact_marker: String,
    pub motion_marker: String,
    pub inside_marker: String,
}

impl Default for DoorwayMarkers {
    fn default() -> Self {
        Self {
            contact_marker: "magsw".to_string(),
            motion_marker: "pir".to_string(),
            inside_marker: "inside".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60, prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub bridge: BridgeConfig,
    pub collector: CollectorConfig,
    pub mqtt: MqttConfig,
    pub sensors: SensorSettings,
    pub night: NightSettings,
    pub doorway: DoorwayMarkers,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    bridge_id: String,
    app_id: String,
    collector_base_url: String,
    collector_key: String,
    flush_window_secs: u64,
    collector_timeout_ms: u64,
    max_buffered_events: usize,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic_prefix: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    sensors: SensorSettings,
    night: NightSettings,
    doorway: DoorwayMarkers,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            bridge_id: toml_config.bridge.id,
            app_id: toml_config.bridge.app_id,
            collector_base_url: toml_config.collector.base_url,
            collector_key: toml_config.collector.key,
            flush_window_secs: toml_config.collector.flush_window_secs,
            collector_timeout_ms: toml_config.collector.timeout_ms,
            max_buffered_events: toml_config.collector.max_buffered_events,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic_prefix: toml_config.mqtt.topic_prefix,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            sensors: toml_config.sensors,
            night: toml_config.night,
            doorway: toml_config.doorway,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Config file path: the `--config` value, else `CONFIG_FILE`, else the default
    pub fn resolve_config_path(cli: Option<String>) -> String {
        Self::choose_config_path(cli, env::var("CONFIG_FILE").ok())
    }

    fn choose_config_path(cli: Option<String>, env_path: Option<String>) -> String {
        cli.or(env_path).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {source}"))?;
        Ok(Self::from_toml(toml_config, source.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn collector_base_url(&self) -> &str {
        &self.collector_base_url
    }

    pub fn collector_key(&self) -> &str {
        &self.collector_key
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_secs(self.flush_window_secs)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }

    pub fn max_buffered_events(&self) -> usize {
        self.max_buffered_events
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn sensors(&self) -> &SensorSettings {
        &self.sensors
    }

    pub fn night(&self) -> &NightSettings {
        &self.night
    }

    pub fn doorway(&self) -> &DoorwayMarkers {
        &self.doorway
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the flush window
    #[cfg(test)]
    pub fn with_flush_window_secs(mut self, secs: u64) -> Self {
        self.flush_window_secs = secs;
        self
    }

    /// Builder method for tests to replace sensor settings
    #[cfg(test)]
    pub fn with_sensors(mut self, sensors: SensorSettings) -> Self {
        self.sensors = sensors;
        self
    }

    /// Builder method for tests to replace night settings
    #[cfg(test)]
    pub fn with_night(mut self, night: NightSettings) -> Self {
        self.night = night;
        self
    }
}

//! Integration tests for configuration loading

use sensor_gateway::domain::SensorKind;
use sensor_gateway::infra::{Config, TemperatureMode};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[bridge]
id = "BID42"
app_id = "sch_app"

[collector]
base_url = "http://collector.test/series/"
key = "secret"
flush_window_secs = 5
max_buffered_events = 100

[mqtt]
host = "test-host"
port = 1884
topic_prefix = "bridge/test"

[sensors]
temperature_mode = "regular"
accel = true
binary = false

[night]
enabled = true
start = "23:00"
end = "06:30"
sensors = ["PIR Hall"]
ignore_secs = 300
client_id = "CID9"

[doorway]
contact_marker = "door"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.bridge_id(), "BID42");
    assert_eq!(config.collector_key(), "secret");
    assert_eq!(config.flush_window(), Duration::from_secs(5));
    assert_eq!(config.max_buffered_events(), 100);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic_prefix(), "bridge/test");
    assert_eq!(config.sensors().temperature_mode, TemperatureMode::Regular);
    assert!(config.sensors().is_enabled(SensorKind::Acceleration));
    assert!(!config.sensors().is_enabled(SensorKind::Binary));
    assert!(config.sensors().is_enabled(SensorKind::Temperature));
    assert!(config.night().enabled);
    assert_eq!(config.night().sensors, vec!["PIR Hall".to_string()]);
    assert_eq!(config.night().client_id, "CID9");
    assert_eq!(config.doorway().contact_marker, "door");
    assert_eq!(config.doorway().motion_marker, "pir");
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_invalid_config_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[collector]\nflush_window_secs = \"soon\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.flush_window(), Duration::from_secs(20));
    assert!(!config.night().enabled);
}

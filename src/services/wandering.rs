//! Night wandering detection
//!
//! Motion at a watched sensor inside the nightly window raises an alarm,
//! then stays quiet until more than the ignore interval has passed since
//! that alarm. The window may wrap midnight.

use crate::infra::config::NightSettings;
use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Daily time window given as `HH:MM` start and end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl NightWindow {
    pub fn parse(start: &str, end: &str) -> anyhow::Result<Self> {
        Ok(Self { start: parse_hhmm(start)?, end: parse_hhmm(end)? })
    }

    /// Whether epoch time `t` falls inside the window in timezone `tz`.
    ///
    /// Looks at yesterday's and today's start and end instants and takes the
    /// latest one at or before `t`: inside if it was a start.
    pub fn contains<Tz: TimeZone>(&self, t: f64, tz: &Tz) -> bool {
        let Some(utc) = DateTime::<Utc>::from_timestamp(t.floor() as i64, 0) else {
            return false;
        };
        let today = utc.with_timezone(tz).date_naive();
        let Some(yesterday) = today.pred_opt() else {
            return false;
        };

        let mut nearest: Option<(f64, bool)> = None;
        for date in [yesterday, today] {
            for (time, is_start) in [(self.start, true), (self.end, false)] {
                let Some(boundary) = boundary_epoch(date, time, tz) else {
                    continue;
                };
                let since = t - boundary;
                if since >= 0.0 && nearest.map_or(true, |(best, _)| since < best) {
                    nearest = Some((since, is_start));
                }
            }
        }
        nearest.is_some_and(|(_, is_start)| is_start)
    }
}

fn parse_hhmm(value: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("invalid time of day {value:?}, expected HH:MM"))
}

/// Epoch seconds of `time` on local `date`; None inside a DST gap
fn boundary_epoch<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> Option<f64> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|instant| instant.timestamp() as f64)
}

/// Alarm raised for one motion event
#[derive(Debug, Clone, PartialEq)]
pub struct WanderingAlarm {
    /// Friendly name of the sensor
    pub sensor: String,
    pub timestamp: f64,
}

/// Watches motion sensors for activity inside the night window
pub struct WanderingDetector<Tz: TimeZone = Local> {
    window: NightWindow,
    tz: Tz,
    /// Watched device id -> friendly name
    watched: FxHashMap<String, String>,
    ignore_secs: f64,
    last_alarm: Option<f64>,
    last_activity: Option<f64>,
}

impl<Tz: TimeZone> WanderingDetector<Tz> {
    /// Build from settings and the device id -> friendly name registry.
    /// An empty sensor list watches every device.
    pub fn new(
        settings: &NightSettings,
        names: &BTreeMap<String, String>,
        tz: Tz,
    ) -> anyhow::Result<Self> {
        let window = NightWindow::parse(&settings.start, &settings.end)
            .context("invalid night window")?;

        let watched: FxHashMap<String, String> = if settings.sensors.is_empty() {
            names.iter().map(|(id, name)| (id.clone(), name.clone())).collect()
        } else {
            let mut watched = FxHashMap::default();
            for wanted in &settings.sensors {
                match names.iter().find(|(_, name)| *name == wanted) {
                    Some((id, name)) => {
                        watched.insert(id.clone(), name.clone());
                    }
                    None => info!(sensor = %wanted, "night_sensor_not_found"),
                }
            }
            watched
        };
        debug!(watched = %watched.len(), "night_sensors_resolved");

        Ok(Self {
            window,
            tz,
            watched,
            ignore_secs: settings.ignore_secs,
            last_alarm: None,
            last_activity: None,
        })
    }

    pub fn watches(&self, device_id: &str) -> bool {
        self.watched.contains_key(device_id)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Time of the latest motion seen inside the window
    pub fn last_activity(&self) -> Option<f64> {
        self.last_activity
    }

    /// Keep the alarm debounce and activity time of the detector this one replaces
    pub fn carry_over(&mut self, previous: &WanderingDetector<Tz>) {
        self.last_alarm = previous.last_alarm;
        self.last_activity = previous.last_activity;
    }

    /// Handle a motion change; returns an alarm when one should be sent
    pub fn on_motion(&mut self, device_id: &str, timestamp: f64, on: bool) -> Option<WanderingAlarm> {
        if !on {
            return None;
        }
        let name = self.watched.get(device_id)?;
        if !self.window.contains(timestamp, &self.tz) {
            return None;
        }
        self.last_activity = Some(timestamp);

        let due = self.last_alarm.map_or(true, |prev| timestamp - prev > self.ignore_secs);
        if !due {
            debug!(sensor = %name, "night_motion_within_ignore_interval");
            return None;
        }
        self.last_alarm = Some(timestamp);
        Some(WanderingAlarm { sensor: name.clone(), timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Epoch seconds for a UTC wall-clock time on 2024-03-10
    fn at(hour: u32, minute: u32) -> f64 {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap().timestamp() as f64
    }

    fn names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(id, name)| (id.to_string(), name.to_string())).collect()
    }

    fn settings(start: &str, end: &str, sensors: &[&str]) -> NightSettings {
        NightSettings {
            enabled: true,
            start: start.to_string(),
            end: end.to_string(),
            sensors: sensors.iter().map(|s| s.to_string()).collect(),
            ..NightSettings::default()
        }
    }

    #[test]
    fn test_window_after_midnight() {
        let window = NightWindow::parse("00:30", "07:00").unwrap();
        assert!(window.contains(at(6, 59), &Utc));
        assert!(!window.contains(at(7, 1), &Utc));
        assert!(window.contains(at(0, 30), &Utc));
        assert!(!window.contains(at(0, 29), &Utc));
        assert!(!window.contains(at(12, 0), &Utc));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let window = NightWindow::parse("22:00", "06:00").unwrap();
        assert!(window.contains(at(23, 0), &Utc));
        assert!(window.contains(at(3, 0), &Utc));
        assert!(!window.contains(at(6, 0), &Utc));
        assert!(!window.contains(at(21, 59), &Utc));
    }

    #[test]
    fn test_invalid_window_rejected() {
        assert!(NightWindow::parse("25:00", "07:00").is_err());
        assert!(NightWindow::parse("00:30", "seven").is_err());
    }

    #[test]
    fn test_alarm_debounced_by_ignore_interval() {
        let mut detector = WanderingDetector::new(
            &settings("22:00", "06:00", &[]),
            &names(&[("dev1", "PIR Hall")]),
            Utc,
        )
        .unwrap();

        let first = detector.on_motion("dev1", at(23, 0), true);
        assert_eq!(first, Some(WanderingAlarm { sensor: "PIR Hall".to_string(), timestamp: at(23, 0) }));

        assert_eq!(detector.on_motion("dev1", at(23, 5), true), None);
        assert_eq!(detector.last_activity(), Some(at(23, 5)));

        assert!(detector.on_motion("dev1", at(23, 11), true).is_some());
    }

    #[test]
    fn test_motion_exactly_at_ignore_interval_suppressed() {
        let mut detector = WanderingDetector::new(
            &settings("22:00", "06:00", &[]),
            &names(&[("dev1", "PIR Hall")]),
            Utc,
        )
        .unwrap();

        assert!(detector.on_motion("dev1", at(23, 0), true).is_some());
        assert_eq!(detector.on_motion("dev1", at(23, 10), true), None);
        assert!(detector.on_motion("dev1", at(23, 10) + 1.0, true).is_some());
    }

    #[test]
    fn test_carry_over_keeps_debounce() {
        let night = settings("22:00", "06:00", &[]);
        let registry = names(&[("dev1", "PIR Hall")]);
        let mut old = WanderingDetector::new(&night, &registry, Utc).unwrap();
        assert!(old.on_motion("dev1", at(23, 0), true).is_some());

        let mut new = WanderingDetector::new(&night, &registry, Utc).unwrap();
        new.carry_over(&old);
        assert_eq!(new.last_activity(), Some(at(23, 0)));
        assert_eq!(new.on_motion("dev1", at(23, 2), true), None);
        assert!(new.on_motion("dev1", at(23, 11), true).is_some());
    }

    #[test]
    fn test_motion_off_and_daytime_ignored() {
        let mut detector = WanderingDetector::new(
            &settings("22:00", "06:00", &[]),
            &names(&[("dev1", "PIR Hall")]),
            Utc,
        )
        .unwrap();

        assert_eq!(detector.on_motion("dev1", at(23, 0), false), None);
        assert_eq!(detector.on_motion("dev1", at(12, 0), true), None);
        assert_eq!(detector.last_activity(), None);
    }

    #[test]
    fn test_named_sensors_restrict_watch_list() {
        let mut detector = WanderingDetector::new(
            &settings("22:00", "06:00", &["PIR Bedroom", "Missing"]),
            &names(&[("dev1", "PIR Hall"), ("dev2", "PIR Bedroom")]),
            Utc,
        )
        .unwrap();

        assert_eq!(detector.watched_count(), 1);
        assert!(!detector.watches("dev1"));
        assert_eq!(detector.on_motion("dev1", at(23, 0), true), None);
        assert!(detector.on_motion("dev2", at(23, 0), true).is_some());
    }
}

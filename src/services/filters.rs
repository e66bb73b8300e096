//! Change-detection filters
//!
//! One stateful filter per (device, sensor kind) decides whether a raw
//! sample becomes zero, one or several reportable events:
//! - threshold kinds report when the value moved by at least `min_change`
//! - vector kinds report all three axes when any axis moved by more than `min_change`
//! - edge kinds report a transition as a back-filled pair (old value at `t - 1`, new at `t`)
//! - power is a threshold kind that back-fills when the previous report is over 2s old
//! - buttons are reported unconditionally
//! - temperature can instead report once per calendar minute

use crate::domain::{Event, Reading, Sample, SampleValue, SensorKind};
use crate::infra::config::{SensorSettings, TemperatureMode};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

/// Events produced by one sample (at most three for every filter kind)
pub type Emitted = SmallVec<[Event; 3]>;

/// Power readings further apart than this get a back-fill event
const POWER_BACKFILL_GAP_SECS: f64 = 2.0;

/// Offset of the back-fill event before the transition
const BACKFILL_OFFSET_SECS: f64 = 1.0;

const ACCEL_NAMES: [&str; 3] = ["accel_x", "accel_y", "accel_z"];
const GYRO_NAMES: [&str; 3] = ["gyro_x", "gyro_y", "gyro_z"];
const MAGNET_NAMES: [&str; 3] = ["magnet_x", "magnet_y", "magnet_z"];

/// A change-detection policy together with its state
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Threshold { name: &'static str, min_change: f64, last: f64 },
    PerMinute { name: &'static str, minute: Option<i64>, last_seen: Option<f64> },
    Vector { names: [&'static str; 3], min_change: f64, last: [f64; 3] },
    Edge { name: &'static str, previous: bool },
    Power { min_change: f64, last: f64, last_emitted_at: Option<f64> },
    Buttons,
}

impl Filter {
    /// Build the filter for a sensor kind with thresholds from settings
    pub fn for_kind(kind: SensorKind, settings: &SensorSettings) -> Self {
        let temperature = |name: &'static str, min_change: f64| match settings.temperature_mode {
            TemperatureMode::OnChange => Filter::threshold(name, min_change),
            TemperatureMode::Regular => Filter::PerMinute { name, minute: None, last_seen: None },
        };

        match kind {
            SensorKind::Temperature => temperature("temperature", settings.temp_min_change),
            SensorKind::IrTemperature => temperature("ir_temperature", settings.irtemp_min_change),
            SensorKind::Humidity => Filter::threshold("humidity", settings.humidity_min_change),
            SensorKind::Luminance => Filter::threshold("luminance", settings.luminance_min_change),
            SensorKind::Battery => Filter::threshold("battery", settings.battery_min_change),
            SensorKind::Power => Filter::Power {
                min_change: settings.power_min_change,
                last: 0.0,
                last_emitted_at: None,
            },
            SensorKind::Acceleration => Filter::vector(ACCEL_NAMES, settings.accel_min_change),
            SensorKind::Gyro => Filter::vector(GYRO_NAMES, settings.gyro_min_change),
            SensorKind::Magnetometer => Filter::vector(MAGNET_NAMES, settings.magnet_min_change),
            SensorKind::Binary => Filter::Edge { name: "binary", previous: false },
            SensorKind::Connected => Filter::Edge { name: "connected", previous: false },
            SensorKind::Buttons => Filter::Buttons,
        }
    }

    fn threshold(name: &'static str, min_change: f64) -> Self {
        Filter::Threshold { name, min_change, last: 0.0 }
    }

    fn vector(names: [&'static str; 3], min_change: f64) -> Self {
        Filter::Vector { names, min_change, last: [0.0; 3] }
    }

    /// Process one sample, returning the events worth reporting
    pub fn apply(&mut self, sample: &Sample) -> Emitted {
        let t = sample.timestamp;

        match (self, sample.value) {
            (Filter::Threshold { name, min_change, last }, SampleValue::Scalar(v)) => {
                if (v - *last).abs() >= *min_change {
                    *last = v;
                    smallvec![Event::new(*name, v, t)]
                } else {
                    SmallVec::new()
                }
            }
            (Filter::PerMinute { name, minute, last_seen }, SampleValue::Scalar(v)) => {
                let this_minute = (t - t.rem_euclid(60.0)) as i64;
                let mut out = SmallVec::new();
                match *minute {
                    Some(prev) if prev != this_minute => {
                        if let Some(seen) = *last_seen {
                            out.push(Event::new(*name, seen, prev as f64));
                        }
                        *minute = Some(this_minute);
                    }
                    Some(_) => {}
                    None => *minute = Some(this_minute),
                }
                *last_seen = Some(v);
                out
            }
            (Filter::Vector { names, min_change, last }, SampleValue::Vector(axes)) => {
                let tripped = axes.iter().zip(last.iter()).any(|(a, l)| (a - l).abs() > *min_change);
                if tripped {
                    *last = axes;
                    names.iter().zip(axes).map(|(n, a)| Event::new(*n, a, t)).collect()
                } else {
                    SmallVec::new()
                }
            }
            (Filter::Edge { name, previous }, SampleValue::Binary(on)) => {
                if on == *previous {
                    return SmallVec::new();
                }
                let old = std::mem::replace(previous, on);
                smallvec![
                    Event::new(*name, Reading::from_bool(old), t - BACKFILL_OFFSET_SECS),
                    Event::new(*name, Reading::from_bool(on), t),
                ]
            }
            (Filter::Power { min_change, last, last_emitted_at }, SampleValue::Scalar(v)) => {
                if (v - *last).abs() < *min_change {
                    return SmallVec::new();
                }
                let mut out = SmallVec::new();
                let gap_exceeded =
                    (*last_emitted_at).map_or(true, |prev| t - prev > POWER_BACKFILL_GAP_SECS);
                if gap_exceeded {
                    out.push(Event::new("power", *last, t - BACKFILL_OFFSET_SECS));
                }
                out.push(Event::new("power", v, t));
                *last = v;
                *last_emitted_at = Some(t);
                out
            }
            (Filter::Buttons, SampleValue::Buttons { left, right }) => smallvec![
                Event::new("left_button", left, t),
                Event::new("right_button", right, t),
            ],
            (filter, value) => {
                debug!(
                    device = %sample.device_id,
                    kind = %sample.kind,
                    filter = ?filter,
                    value = ?value,
                    "filter_value_shape_mismatch"
                );
                SmallVec::new()
            }
        }
    }
}

/// All filters, keyed by device and sensor kind
pub struct FilterBank {
    filters: FxHashMap<String, FxHashMap<SensorKind, Filter>>,
    settings: SensorSettings,
}

impl FilterBank {
    pub fn new(settings: SensorSettings) -> Self {
        Self { filters: FxHashMap::default(), settings }
    }

    pub fn settings(&self) -> &SensorSettings {
        &self.settings
    }

    /// Create the filter for a device's characteristic if that kind is enabled.
    /// Re-registering keeps the existing filter state.
    /// Returns false when the kind is disabled.
    pub fn register(&mut self, device_id: &str, kind: SensorKind) -> bool {
        if !self.settings.is_enabled(kind) {
            return false;
        }
        let device = self.filters.entry(device_id.to_string()).or_default();
        device.entry(kind).or_insert_with(|| Filter::for_kind(kind, &self.settings));
        true
    }

    pub fn contains(&self, device_id: &str, kind: SensorKind) -> bool {
        self.filters.get(device_id).is_some_and(|device| device.contains_key(&kind))
    }

    /// Run a sample through its filter. `None` when no filter is registered.
    pub fn apply(&mut self, sample: &Sample) -> Option<Emitted> {
        let filter = self.filters.get_mut(&sample.device_id)?.get_mut(&sample.kind)?;
        Some(filter.apply(sample))
    }

    /// Number of registered filters
    pub fn len(&self) -> usize {
        self.filters.values().map(|device| device.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Doorway occupancy state machines
//!
//! Each doorway pairs a door contact with the motion sensor just inside it.
//! Sensor changes only record flags and timestamps; classification happens
//! on the 1 s tick, which re-evaluates the state against them:
//!
//! ```text
//! Idle -> CheckGoingOut -> CheckWentOut -> Idle            (went_out / answered_door)
//! Idle -> CheckComingIn -> WaitDoorClose -> Idle           (came_in / open_and_close)
//!                          WaitDoorClose -> WaitLongDoorOpen -> Idle (door_open_too_long)
//! ```
//!
//! Every classified action becomes a 0/1/0 pulse at door-open time, +1 s
//! and +2 s, stored under the doorway's location on the derived route.

use crate::domain::Event;
use crate::services::topology::DoorwayLocation;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Max gap between inside motion and the door opening for a way out (seconds)
pub const IN_PIR_TO_DOOR_TIME: f64 = 30.0;
/// Wait after the door closes before deciding went_out vs answered_door
pub const DOOR_CLOSE_TO_IN_PIR_TIME: f64 = 10.0;
/// Wait for inside motion after the door opens before open_and_close
pub const DOOR_OPEN_TO_IN_PIR_TIME: f64 = 15.0;
/// Door open longer than this is reported once
pub const MAX_DOOR_OPEN_TIME: f64 = 60.0;
/// Motion that stopped this recently still counts as someone inside
pub const RECENT_MOTION_TIME: f64 = DOOR_CLOSE_TO_IN_PIR_TIME - 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorwayState {
    Idle,
    CheckGoingOut,
    CheckWentOut,
    CheckComingIn,
    WaitDoorClose,
    WaitLongDoorOpen,
}

impl DoorwayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorwayState::Idle => "idle",
            DoorwayState::CheckGoingOut => "check_going_out",
            DoorwayState::CheckWentOut => "check_went_out",
            DoorwayState::CheckComingIn => "check_coming_in",
            DoorwayState::WaitDoorClose => "wait_door_close",
            DoorwayState::WaitLongDoorOpen => "wait_long_door_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyAction {
    WentOut,
    AnsweredDoor,
    CameIn,
    OpenAndClose,
    DoorOpenTooLong,
}

impl OccupancyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyAction::WentOut => "went_out",
            OccupancyAction::AnsweredDoor => "answered_door",
            OccupancyAction::CameIn => "came_in",
            OccupancyAction::OpenAndClose => "open_and_close",
            OccupancyAction::DoorOpenTooLong => "door_open_too_long",
        }
    }
}

/// Which half of a doorway a device is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorwaySensor {
    Contact,
    Motion,
}

/// State machine for one doorway
#[derive(Debug, Clone)]
pub struct DoorwayMonitor {
    location: String,
    state: DoorwayState,
    door_open: bool,
    door_open_time: f64,
    door_close_time: f64,
    motion_on: bool,
    /// Latest motion-on and motion-off; None until the sensor reports
    motion_on_time: Option<f64>,
    motion_off_time: Option<f64>,
}

impl DoorwayMonitor {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            state: DoorwayState::Idle,
            door_open: false,
            door_open_time: 0.0,
            door_close_time: 0.0,
            motion_on: false,
            motion_on_time: None,
            motion_off_time: None,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn state(&self) -> DoorwayState {
        self.state
    }

    /// Record a sensor change; `on` means door open or motion detected
    pub fn on_change(&mut self, sensor: DoorwaySensor, timestamp: f64, on: bool) {
        match (sensor, on) {
            (DoorwaySensor::Contact, true) => {
                self.door_open = true;
                self.door_open_time = timestamp;
            }
            (DoorwaySensor::Contact, false) => {
                self.door_open = false;
                self.door_close_time = timestamp;
            }
            (DoorwaySensor::Motion, true) => {
                self.motion_on = true;
                self.motion_on_time = Some(timestamp);
            }
            (DoorwaySensor::Motion, false) => {
                self.motion_on = false;
                self.motion_off_time = Some(timestamp);
            }
        }
    }

    /// Re-evaluate the state at wall-clock time `now`
    pub fn tick(&mut self, now: f64) -> Option<OccupancyAction> {
        let (next, action) = self.evaluate(now);
        if next != self.state {
            debug!(
                location = %self.location,
                from = %self.state.as_str(),
                to = %next.as_str(),
                "doorway_state_changed"
            );
            self.state = next;
        }
        action
    }

    fn evaluate(&self, now: f64) -> (DoorwayState, Option<OccupancyAction>) {
        use DoorwayState::*;
        use OccupancyAction::*;

        match self.state {
            Idle if self.door_open => {
                let motion_before_open = self
                    .motion_on_time
                    .is_some_and(|t| self.door_open_time - t < IN_PIR_TO_DOOR_TIME);
                if motion_before_open || self.motion_on {
                    (CheckGoingOut, None)
                } else {
                    (CheckComingIn, None)
                }
            }
            CheckGoingOut if !self.door_open => (CheckWentOut, None),
            CheckWentOut if now - self.door_close_time >= DOOR_CLOSE_TO_IN_PIR_TIME => {
                let someone_inside = self.motion_on
                    || self.motion_off_time.is_some_and(|t| now - t < RECENT_MOTION_TIME);
                (Idle, Some(if someone_inside { AnsweredDoor } else { WentOut }))
            }
            CheckComingIn if self.motion_on => (WaitDoorClose, Some(CameIn)),
            CheckComingIn if now - self.door_open_time >= DOOR_OPEN_TO_IN_PIR_TIME => {
                (WaitDoorClose, Some(OpenAndClose))
            }
            WaitDoorClose | WaitLongDoorOpen if !self.door_open => (Idle, None),
            WaitDoorClose if now - self.door_open_time >= MAX_DOOR_OPEN_TIME => {
                (WaitLongDoorOpen, Some(DoorOpenTooLong))
            }
            state => (state, None),
        }
    }

    /// 0/1/0 pulse for an action, anchored at the last door opening
    pub fn pulse(&self, action: OccupancyAction) -> [Event; 3] {
        let name = action.as_str();
        let t = self.door_open_time;
        [Event::new(name, 0i64, t), Event::new(name, 1i64, t + 1.0), Event::new(name, 0i64, t + 2.0)]
    }
}

/// A classified doorway action, ready for the sink
#[derive(Debug, Clone, PartialEq)]
pub struct DoorwayPulse {
    pub location: String,
    pub action: OccupancyAction,
    pub events: [Event; 3],
}

/// All doorway state machines, addressed by sensor device id
#[derive(Default)]
pub struct OccupancyMonitor {
    doorways: Vec<DoorwayMonitor>,
    /// Sensor wiring of each doorway, parallel to `doorways`
    layout: Vec<DoorwayLocation>,
    sensors: FxHashMap<String, Vec<(usize, DoorwaySensor)>>,
}

impl OccupancyMonitor {
    pub fn new(locations: &[DoorwayLocation]) -> Self {
        let mut monitor = Self::default();
        for (index, doorway) in locations.iter().enumerate() {
            monitor.doorways.push(DoorwayMonitor::new(doorway.location.clone()));
            monitor.layout.push(doorway.clone());
            monitor
                .sensors
                .entry(doorway.contact_id.clone())
                .or_default()
                .push((index, DoorwaySensor::Contact));
            monitor
                .sensors
                .entry(doorway.motion_id.clone())
                .or_default()
                .push((index, DoorwaySensor::Motion));
        }
        monitor
    }

    /// Replace the doorway set. Doorways whose location and sensors are
    /// unchanged keep their state machine; the rest start idle.
    pub fn reconfigure(&mut self, locations: &[DoorwayLocation]) {
        let mut previous: Vec<(DoorwayLocation, DoorwayMonitor)> = std::mem::take(&mut self.layout)
            .into_iter()
            .zip(std::mem::take(&mut self.doorways))
            .collect();
        *self = Self::new(locations);

        let mut kept = 0usize;
        for (index, location) in locations.iter().enumerate() {
            if let Some(pos) = previous.iter().position(|(wiring, _)| wiring == location) {
                self.doorways[index] = previous.swap_remove(pos).1;
                kept += 1;
            }
        }
        debug!(doorways = %locations.len(), kept = %kept, "doorways_reconfigured");
    }

    pub fn watches(&self, device_id: &str) -> bool {
        self.sensors.contains_key(device_id)
    }

    pub fn is_empty(&self) -> bool {
        self.doorways.is_empty()
    }

    pub fn doorways(&self) -> &[DoorwayMonitor] {
        &self.doorways
    }

    /// Forward a binary sensor change to every doorway using the device
    pub fn on_change(&mut self, device_id: &str, timestamp: f64, on: bool) {
        let Some(targets) = self.sensors.get(device_id) else {
            return;
        };
        for &(index, sensor) in targets {
            self.doorways[index].on_change(sensor, timestamp, on);
        }
    }

    /// Tick every doorway; returns the actions classified on this tick
    pub fn tick(&mut self, now: f64) -> Vec<DoorwayPulse> {
        self.doorways
            .iter_mut()
            .filter_map(|doorway| {
                doorway.tick(now).map(|action| DoorwayPulse {
                    location: doorway.location.clone(),
                    action,
                    events: doorway.pulse(action),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tick once per second over `from..=to`, collecting actions
    fn run(monitor: &mut DoorwayMonitor, from: u32, to: u32) -> Vec<(u32, OccupancyAction)> {
        (from..=to).filter_map(|t| monitor.tick(t as f64).map(|a| (t, a))).collect()
    }

    #[test]
    fn test_answered_door_when_motion_stays_on() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Motion, -5.0, true);
        door.on_change(DoorwaySensor::Contact, 0.0, true);

        assert_eq!(door.tick(0.0), None);
        assert_eq!(door.state(), DoorwayState::CheckGoingOut);

        door.on_change(DoorwaySensor::Contact, 2.0, false);
        assert!(run(&mut door, 1, 2).is_empty());
        assert_eq!(door.state(), DoorwayState::CheckWentOut);

        assert!(run(&mut door, 3, 11).is_empty());
        assert_eq!(door.tick(12.0), Some(OccupancyAction::AnsweredDoor));
        assert_eq!(door.state(), DoorwayState::Idle);
    }

    #[test]
    fn test_answered_door_from_first_second() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Motion, 0.0, true);
        door.on_change(DoorwaySensor::Contact, 0.0, true);
        assert_eq!(door.tick(0.0), None);
        assert_eq!(door.state(), DoorwayState::CheckGoingOut);

        door.on_change(DoorwaySensor::Contact, 2.0, false);
        let actions = run(&mut door, 1, 12);
        assert_eq!(actions, vec![(12, OccupancyAction::AnsweredDoor)]);
        assert_eq!(door.state(), DoorwayState::Idle);
    }

    #[test]
    fn test_came_in_from_first_second() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 0.0, true);
        assert!(run(&mut door, 0, 4).is_empty());
        assert_eq!(door.state(), DoorwayState::CheckComingIn);

        door.on_change(DoorwaySensor::Motion, 5.0, true);
        assert_eq!(door.tick(5.0), Some(OccupancyAction::CameIn));
        assert_eq!(door.state(), DoorwayState::WaitDoorClose);

        door.on_change(DoorwaySensor::Contact, 8.0, false);
        assert!(run(&mut door, 6, 8).is_empty());
        assert_eq!(door.state(), DoorwayState::Idle);
    }

    #[test]
    fn test_no_motion_ever_means_coming_in() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 20.0, true);
        assert_eq!(door.tick(20.0), None);
        assert_eq!(door.state(), DoorwayState::CheckComingIn);
    }

    #[test]
    fn test_came_in_then_door_closes() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 1000.0, true);

        assert!(run(&mut door, 1000, 1004).is_empty());
        assert_eq!(door.state(), DoorwayState::CheckComingIn);

        door.on_change(DoorwaySensor::Motion, 1005.0, true);
        assert_eq!(door.tick(1005.0), Some(OccupancyAction::CameIn));
        assert_eq!(door.state(), DoorwayState::WaitDoorClose);

        door.on_change(DoorwaySensor::Contact, 1008.0, false);
        assert!(run(&mut door, 1006, 1008).is_empty());
        assert_eq!(door.state(), DoorwayState::Idle);
    }

    #[test]
    fn test_went_out_when_inside_quiet() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Motion, 990.0, true);
        door.on_change(DoorwaySensor::Motion, 992.0, false);
        door.on_change(DoorwaySensor::Contact, 1000.0, true);
        assert_eq!(door.tick(1000.0), None);
        assert_eq!(door.state(), DoorwayState::CheckGoingOut);

        door.on_change(DoorwaySensor::Contact, 1003.0, false);
        let actions = run(&mut door, 1001, 1020);
        assert_eq!(actions, vec![(1013, OccupancyAction::WentOut)]);
    }

    #[test]
    fn test_recent_motion_off_counts_as_answered() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Motion, 995.0, true);
        door.on_change(DoorwaySensor::Contact, 1000.0, true);
        door.tick(1000.0);
        door.on_change(DoorwaySensor::Contact, 1002.0, false);
        door.on_change(DoorwaySensor::Motion, 1008.0, false);

        let actions = run(&mut door, 1001, 1012);
        assert_eq!(actions, vec![(1012, OccupancyAction::AnsweredDoor)]);
    }

    #[test]
    fn test_open_and_close_without_motion() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 1000.0, true);

        let actions = run(&mut door, 1000, 1016);
        assert_eq!(actions, vec![(1015, OccupancyAction::OpenAndClose)]);
        assert_eq!(door.state(), DoorwayState::WaitDoorClose);
    }

    #[test]
    fn test_door_open_too_long_reported_once() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 1000.0, true);

        let actions = run(&mut door, 1000, 1120);
        assert_eq!(
            actions,
            vec![(1015, OccupancyAction::OpenAndClose), (1060, OccupancyAction::DoorOpenTooLong)]
        );
        assert_eq!(door.state(), DoorwayState::WaitLongDoorOpen);

        door.on_change(DoorwaySensor::Contact, 1121.0, false);
        assert_eq!(door.tick(1121.0), None);
        assert_eq!(door.state(), DoorwayState::Idle);
    }

    #[test]
    fn test_pulse_anchored_at_door_open() {
        let mut door = DoorwayMonitor::new("Door");
        door.on_change(DoorwaySensor::Contact, 500.0, true);
        let events = door.pulse(OccupancyAction::CameIn);

        assert_eq!(
            events,
            [
                Event::new("came_in", 0i64, 500.0),
                Event::new("came_in", 1i64, 501.0),
                Event::new("came_in", 0i64, 502.0),
            ]
        );
    }

    #[test]
    fn test_monitor_routes_by_device() {
        let locations = vec![DoorwayLocation {
            location: "Door".to_string(),
            contact_id: "magsw".to_string(),
            motion_id: "pir".to_string(),
        }];
        let mut monitor = OccupancyMonitor::new(&locations);
        assert!(monitor.watches("magsw"));
        assert!(monitor.watches("pir"));
        assert!(!monitor.watches("other"));

        monitor.on_change("magsw", 1000.0, true);
        monitor.on_change("other", 1001.0, true);
        let mut pulses = Vec::new();
        for t in 1000..=1015 {
            pulses.extend(monitor.tick(t as f64));
        }

        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses[0].location, "Door");
        assert_eq!(pulses[0].action, OccupancyAction::OpenAndClose);
        assert_eq!(pulses[0].events[1], Event::new("open_and_close", 1i64, 1001.0));
    }

    fn doorway(location: &str, contact: &str, motion: &str) -> DoorwayLocation {
        DoorwayLocation {
            location: location.to_string(),
            contact_id: contact.to_string(),
            motion_id: motion.to_string(),
        }
    }

    #[test]
    fn test_reconfigure_keeps_unchanged_doorways() {
        let front = doorway("Front", "magsw1", "pir1");
        let back = doorway("Back", "magsw2", "pir2");
        let mut monitor = OccupancyMonitor::new(&[front.clone(), back.clone()]);
        monitor.on_change("magsw1", 1000.0, true);
        monitor.on_change("magsw2", 1000.0, true);
        assert!(monitor.tick(1000.0).is_empty());

        let moved = doorway("Back", "magsw2", "pir3");
        monitor.reconfigure(&[moved, front]);

        assert_eq!(monitor.doorways()[0].state(), DoorwayState::Idle);
        assert_eq!(monitor.doorways()[1].location(), "Front");
        assert_eq!(monitor.doorways()[1].state(), DoorwayState::CheckComingIn);
        assert!(monitor.watches("pir3"));
        assert!(!monitor.watches("pir2"));

        monitor.on_change("pir1", 1003.0, true);
        let pulses = monitor.tick(1003.0);
        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses[0].location, "Front");
        assert_eq!(pulses[0].action, OccupancyAction::CameIn);
    }
}

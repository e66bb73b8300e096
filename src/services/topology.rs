//! Doorway topology discovery
//!
//! Pairs each door contact sensor with the motion sensor just inside the
//! same door. The default resolver reads the pairing from device friendly
//! names, e.g. `Magsw Front Door` + `PIR Inside Door`:
//! - contact: first token starts with the contact marker, third token is the location
//! - motion: first token starts with the motion marker, second token is the
//!   inside marker, third token matches the location (case-insensitive)
//!
//! Names split on spaces, or on `-` when they contain no space.

use crate::infra::config::DoorwayMarkers;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One monitored doorway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorwayLocation {
    /// Location as written in the contact sensor's name
    pub location: String,
    pub contact_id: String,
    pub motion_id: String,
}

/// Source of doorway pairings, given device id -> friendly name
pub trait TopologyResolver: Send {
    fn resolve(&self, names: &BTreeMap<String, String>) -> Vec<DoorwayLocation>;
}

/// Resolves doorways from device naming conventions
pub struct NamingConventionResolver {
    contact_marker: String,
    motion_marker: String,
    inside_marker: String,
}

impl NamingConventionResolver {
    pub fn new(markers: &DoorwayMarkers) -> Self {
        Self {
            contact_marker: markers.contact_marker.to_lowercase(),
            motion_marker: markers.motion_marker.to_lowercase(),
            inside_marker: markers.inside_marker.to_lowercase(),
        }
    }

    fn tokens(name: &str) -> Vec<&str> {
        let tokens: Vec<&str> = name.split(' ').collect();
        if tokens.len() == 1 {
            name.split('-').collect()
        } else {
            tokens
        }
    }

    /// Location token if this name marks a door contact sensor
    fn contact_location<'a>(&self, tokens: &[&'a str]) -> Option<&'a str> {
        match tokens {
            [kind, _, location, ..] if kind.to_lowercase().starts_with(&self.contact_marker) => {
                Some(*location)
            }
            _ => None,
        }
    }

    fn is_inside_motion_for(&self, tokens: &[&str], location: &str) -> bool {
        match tokens {
            [kind, side, place, ..] => {
                kind.to_lowercase().starts_with(&self.motion_marker)
                    && side.to_lowercase() == self.inside_marker
                    && place.to_lowercase() == location.to_lowercase()
            }
            _ => false,
        }
    }
}

impl TopologyResolver for NamingConventionResolver {
    fn resolve(&self, names: &BTreeMap<String, String>) -> Vec<DoorwayLocation> {
        let split: Vec<(&String, Vec<&str>)> =
            names.iter().map(|(id, name)| (id, Self::tokens(name))).collect();

        let mut locations = Vec::new();
        for (contact_id, tokens) in &split {
            let Some(location) = self.contact_location(tokens) else {
                continue;
            };

            let motion = split
                .iter()
                .find(|(_, other)| self.is_inside_motion_for(other, location));

            match motion {
                Some((motion_id, _)) => {
                    debug!(
                        location = %location,
                        contact = %contact_id,
                        motion = %motion_id,
                        "doorway_resolved"
                    );
                    locations.push(DoorwayLocation {
                        location: location.to_string(),
                        contact_id: (*contact_id).clone(),
                        motion_id: (*motion_id).clone(),
                    });
                }
                None => {
                    info!(location = %location, contact = %contact_id, "doorway_without_motion_sensor");
                }
            }
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(id, name)| (id.to_string(), name.to_string())).collect()
    }

    fn resolver() -> NamingConventionResolver {
        NamingConventionResolver::new(&DoorwayMarkers::default())
    }

    #[test]
    fn test_pairs_contact_with_inside_motion() {
        let locations = resolver().resolve(&names(&[
            ("dev1", "Magsw Front Door"),
            ("dev2", "PIR Inside door"),
            ("dev3", "PIR Outside Door"),
            ("dev4", "Kitchen Tag"),
        ]));

        assert_eq!(
            locations,
            vec![DoorwayLocation {
                location: "Door".to_string(),
                contact_id: "dev1".to_string(),
                motion_id: "dev2".to_string(),
            }]
        );
    }

    #[test]
    fn test_hyphenated_names() {
        let locations =
            resolver().resolve(&names(&[("a", "magsw-back-porch"), ("b", "pir-inside-Porch")]));
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location, "porch");
        assert_eq!(locations[0].motion_id, "b");
    }

    #[test]
    fn test_marker_is_a_prefix() {
        let locations =
            resolver().resolve(&names(&[("a", "MagSwitch Back Hall"), ("b", "PIRsensor inside hall")]));
        assert_eq!(locations.len(), 1);
    }

    #[test]
    fn test_unmatched_contact_is_ignored() {
        let locations = resolver().resolve(&names(&[
            ("a", "Magsw Front Door"),
            ("b", "PIR Inside Kitchen"),
        ]));
        assert!(locations.is_empty());
    }

    #[test]
    fn test_short_names_are_skipped() {
        let locations = resolver().resolve(&names(&[("a", "Magsw"), ("b", "PIR Inside")]));
        assert!(locations.is_empty());
    }

    #[test]
    fn test_custom_markers() {
        let markers = DoorwayMarkers {
            contact_marker: "Contact".to_string(),
            motion_marker: "Motion".to_string(),
            inside_marker: "In".to_string(),
        };
        let locations = NamingConventionResolver::new(&markers)
            .resolve(&names(&[("a", "contact main hall"), ("b", "motion in HALL")]));
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location, "hall");
    }
}

// corridor_resolver.rs
//
// Turns an ambulance position and destination into the ordered list of signals
// it will pass. A signal is on the corridor when its perpendicular foot lands on
// the current->destination segment and it sits closer to that segment than the
// corridor width. The resolver is pure: identical inputs give identical output.

use crate::data_structures::{GeoPoint, SignalId};
use crate::route_engine::geometry::{haversine_km, project_onto_segment};
use crate::route_engine::signals::SignalRegistry;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One signal on an ambulance's corridor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorEntry {
    pub signal_id: SignalId,
    /// Perpendicular distance from the route segment.
    pub distance_from_route_km: f64,
    /// Distance travelled along the route before reaching the signal.
    pub along_route_km: f64,
    /// Straight-line distance from the ambulance to the signal.
    pub distance_km: f64,
}

/// Returns the signals on the route from `current` to `destination`,
/// nearest (along the route) first.
pub fn resolve_corridor(
    current: GeoPoint,
    destination: GeoPoint,
    registry: &SignalRegistry,
    corridor_width_km: f64,
) -> Vec<CorridorEntry> {
    let mut corridor: Vec<CorridorEntry> = registry
        .iter()
        .filter_map(|site| {
            let projection = project_onto_segment(current, destination, site.position)?;
            let on_segment = (0.0..=1.0).contains(&projection.fraction);
            if !on_segment || projection.offset_km >= corridor_width_km {
                return None;
            }
            Some(CorridorEntry {
                signal_id: site.id.clone(),
                distance_from_route_km: projection.offset_km,
                along_route_km: projection.along_km,
                distance_km: haversine_km(current, site.position),
            })
        })
        .collect();

    corridor.sort_by(|a, b| {
        a.along_route_km
            .partial_cmp(&b.along_route_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.signal_id.cmp(&b.signal_id))
    });
    corridor
}

/// The part of the corridor the ambulance should hold right now: the first
/// `max_signals` entries that lie within `prepare_band_km` of the ambulance.
pub fn active_corridor(
    corridor: &[CorridorEntry],
    prepare_band_km: f64,
    max_signals: usize,
) -> Vec<CorridorEntry> {
    corridor
        .iter()
        .filter(|entry| entry.distance_km <= prepare_band_km)
        .take(max_signals)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::SignalSite;

    fn registry() -> SignalRegistry {
        SignalRegistry::new(vec![
            SignalSite::new("NORTH", "north", 13.030, 80.2500),
            SignalSite::new("MID", "mid", 13.015, 80.2505),
            SignalSite::new("START", "start", 13.000, 80.2500),
            // beside the ambulance but well off the route
            SignalSite::new("OFF", "off", 13.001, 80.2600),
            // on the line, but past the destination
            SignalSite::new("BEYOND", "beyond", 13.050, 80.2500),
            // behind the ambulance
            SignalSite::new("BEHIND", "behind", 12.990, 80.2500),
        ])
        .unwrap()
    }

    fn ids(entries: &[CorridorEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.signal_id.as_str()).collect()
    }

    #[test]
    fn orders_on_route_signals_by_along_distance() {
        let corridor = resolve_corridor(
            GeoPoint::new(13.000, 80.25),
            GeoPoint::new(13.040, 80.25),
            &registry(),
            0.3,
        );
        assert_eq!(ids(&corridor), vec!["START", "MID", "NORTH"]);
        assert!(corridor[1].distance_from_route_km > 0.0);
        assert!(corridor[1].distance_from_route_km < 0.3);
    }

    #[test]
    fn same_position_and_destination_is_empty() {
        let p = GeoPoint::new(13.0, 80.25);
        assert!(resolve_corridor(p, p, &registry(), 0.3).is_empty());
    }

    #[test]
    fn empty_registry_is_empty() {
        let corridor = resolve_corridor(
            GeoPoint::new(13.0, 80.25),
            GeoPoint::new(13.04, 80.25),
            &SignalRegistry::default(),
            0.3,
        );
        assert!(corridor.is_empty());
    }

    #[test]
    fn resolving_twice_gives_identical_results() {
        let registry = registry();
        let a = resolve_corridor(GeoPoint::new(13.0, 80.25), GeoPoint::new(13.04, 80.25), &registry, 0.3);
        let b = resolve_corridor(GeoPoint::new(13.0, 80.25), GeoPoint::new(13.04, 80.25), &registry, 0.3);
        assert_eq!(a, b);
    }

    #[test]
    fn active_corridor_caps_by_band_and_count() {
        let corridor = resolve_corridor(
            GeoPoint::new(13.000, 80.25),
            GeoPoint::new(13.040, 80.25),
            &registry(),
            0.3,
        );
        // MID is ~1.67 km away, NORTH ~3.3 km.
        assert_eq!(ids(&active_corridor(&corridor, 1.5, 3)), vec!["START"]);
        assert_eq!(ids(&active_corridor(&corridor, 2.0, 3)), vec!["START", "MID"]);
        assert_eq!(ids(&active_corridor(&corridor, 5.0, 2)), vec!["START", "MID"]);
    }
}

// ambulance_simulation.rs
//
// Synthetic dispatch feed: ambulances driving straight between junctions of the
// registry, reporting a full `AmbulanceUpdate` every tick.

use crate::clock::current_timestamp;
use crate::communication::dispatch_channel::UpdatePublisher;
use crate::data_structures::{AmbulanceId, GeoPoint, Severity, Timestamp, TripState};
use crate::error::EngineResult;
use crate::route_engine::geometry::haversine_km;
use crate::route_engine::signals::SignalRegistry;
use crate::shared_data::AmbulanceUpdate;
use log::{info, warn};
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::time::{sleep, Duration};

const SEVERITIES: [Severity; 4] = [Severity::Low, Severity::Moderate, Severity::High, Severity::Critical];

#[derive(Debug, Clone)]
pub struct SimulatedAmbulance {
    pub id: AmbulanceId,
    pub severity: Severity,
    pub position: GeoPoint,
    pub destination: GeoPoint,
    pub speed_kmh: f64,
    pub trip_state: TripState,
}

impl SimulatedAmbulance {
    pub fn new(id: AmbulanceId, severity: Severity, start: GeoPoint, destination: GeoPoint, speed_kmh: f64) -> Self {
        Self {
            id,
            severity,
            position: start,
            destination,
            speed_kmh,
            trip_state: TripState::EnRoute,
        }
    }

    pub fn remaining_km(&self) -> f64 {
        haversine_km(self.position, self.destination)
    }

    /// Moves the ambulance `dt_secs` along its route and reports where it is.
    /// Reaching the destination marks the trip delivered.
    pub fn step(&mut self, dt_secs: f64, now: Timestamp) -> AmbulanceUpdate {
        if self.trip_state == TripState::EnRoute {
            let travel = self.speed_kmh * dt_secs / 3600.0;
            let remaining = self.remaining_km();
            if travel >= remaining {
                self.position = self.destination;
                self.trip_state = TripState::Delivered;
            } else {
                let f = travel / remaining;
                self.position = GeoPoint::new(
                    self.position.lat + (self.destination.lat - self.position.lat) * f,
                    self.position.lng + (self.destination.lng - self.position.lng) * f,
                );
            }
        }
        self.update(now)
    }

    pub fn update(&self, now: Timestamp) -> AmbulanceUpdate {
        AmbulanceUpdate {
            ambulance_id: self.id.clone(),
            current_position: self.position,
            destination_position: self.destination,
            severity: self.severity,
            trip_state: self.trip_state,
            reported_at: now,
        }
    }
}

/// Picks two distinct junctions and drives between them. `None` when the
/// registry has fewer than two signals.
pub fn spawn_random_ambulance<R: Rng + ?Sized>(
    rng: &mut R,
    registry: &SignalRegistry,
    index: u64,
) -> Option<SimulatedAmbulance> {
    let sites: Vec<_> = registry.iter().collect();
    if sites.len() < 2 {
        return None;
    }
    let from = rng.random_range(0..sites.len());
    let mut to = rng.random_range(0..sites.len() - 1);
    if to >= from {
        to += 1;
    }
    let severity = *SEVERITIES.choose(rng)?;
    let speed_kmh = rng.random_range(30.0..70.0);
    Some(SimulatedAmbulance::new(
        AmbulanceId::new(format!("AMB-{:03}", index)),
        severity,
        sites[from].position,
        sites[to].position,
        speed_kmh,
    ))
}

/// Keeps `fleet_size` ambulances on the road and publishes their updates every
/// `tick`. Delivered ambulances report once more and are replaced.
pub async fn run_dispatch_simulation(
    registry: SignalRegistry,
    publisher: UpdatePublisher,
    fleet_size: usize,
    tick: Duration,
) -> EngineResult<()> {
    let mut next_index = 1;
    let mut fleet: Vec<SimulatedAmbulance> = Vec::with_capacity(fleet_size);
    loop {
        while fleet.len() < fleet_size {
            let spawned = {
                let mut rng = rand::rng();
                spawn_random_ambulance(&mut rng, &registry, next_index)
            };
            let Some(ambulance) = spawned else {
                warn!("Need at least two signals to simulate trips");
                return Ok(());
            };
            info!(
                "Dispatched {} ({}) at {:.1} km/h, {:.2} km to go",
                ambulance.id,
                ambulance.severity,
                ambulance.speed_kmh,
                ambulance.remaining_km()
            );
            next_index += 1;
            fleet.push(ambulance);
        }

        let now = current_timestamp();
        for ambulance in fleet.iter_mut() {
            let update = ambulance.step(tick.as_secs_f64(), now);
            publisher.publish(&update)?;
        }
        fleet.retain(|a| {
            if a.trip_state.is_terminal() {
                info!("{} delivered", a.id);
            }
            !a.trip_state.is_terminal()
        });

        sleep(tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_engine::signals::create_signals;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn ambulance_arrives_and_reports_delivery() {
        let start = GeoPoint::new(13.00, 80.25);
        let dest = GeoPoint::new(13.01, 80.25);
        let mut amb = SimulatedAmbulance::new(AmbulanceId::new("A"), Severity::High, start, dest, 60.0);
        let total = amb.remaining_km();

        let first = amb.step(30.0, 1);
        assert_eq!(first.trip_state, TripState::EnRoute);
        assert!((amb.remaining_km() - (total - 0.5)).abs() < 0.01);

        let last = amb.step(3600.0, 2);
        assert_eq!(last.trip_state, TripState::Delivered);
        assert_eq!(last.current_position, dest);
        assert_eq!(last.reported_at, 2);
    }

    #[test]
    fn random_ambulances_use_distinct_endpoints() {
        let registry = SignalRegistry::new(create_signals()).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        for i in 0..20 {
            let amb = spawn_random_ambulance(&mut rng, &registry, i).unwrap();
            assert_ne!(amb.position, amb.destination);
            assert!((30.0..70.0).contains(&amb.speed_kmh));
            assert!(amb.update(0).validate().is_ok());
        }
    }
}

// arbitration.rs
//
// Deterministic priority rule used when two ambulances want the same signal.
// Keys, in order: severity (higher wins), distance to the signal (smaller
// wins, equal within epsilon is a tie), request timestamp (earlier wins) and
// finally the ambulance id (smaller wins). The last key makes the order total,
// so the outcome never depends on which request arrived first.

use crate::data_structures::{AmbulanceId, Severity, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An ambulance's claim on a signal: what arbitration looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contender {
    pub ambulance_id: AmbulanceId,
    pub severity: Severity,
    pub distance_km: f64,
    pub requested_at: Timestamp,
}

/// Which key decided a contest (or `CleanGrant` when there was no contest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArbitrationReason {
    CleanGrant,
    Severity,
    Distance,
    RequestTime,
    AmbulanceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Incumbent,
    Challenger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arbitration {
    pub verdict: Verdict,
    pub reason: ArbitrationReason,
}

/// Compares two contenders. `Ordering::Greater` means `a` has priority over `b`.
pub fn compare_priority(a: &Contender, b: &Contender, epsilon_km: f64) -> (Ordering, ArbitrationReason) {
    if a.severity != b.severity {
        return (a.severity.cmp(&b.severity), ArbitrationReason::Severity);
    }
    if (a.distance_km - b.distance_km).abs() > epsilon_km {
        // closer is more urgent
        let ord = b
            .distance_km
            .partial_cmp(&a.distance_km)
            .unwrap_or(Ordering::Equal);
        return (ord, ArbitrationReason::Distance);
    }
    if a.requested_at != b.requested_at {
        return (b.requested_at.cmp(&a.requested_at), ArbitrationReason::RequestTime);
    }
    (b.ambulance_id.cmp(&a.ambulance_id), ArbitrationReason::AmbulanceId)
}

/// Decides between the current lock holder and a new claimant.
pub fn arbitrate(incumbent: &Contender, challenger: &Contender, epsilon_km: f64) -> Arbitration {
    let (ord, reason) = compare_priority(challenger, incumbent, epsilon_km);
    let verdict = if ord == Ordering::Greater {
        Verdict::Challenger
    } else {
        Verdict::Incumbent
    };
    Arbitration { verdict, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 0.001;

    fn contender(id: &str, severity: Severity, distance_km: f64, requested_at: Timestamp) -> Contender {
        Contender {
            ambulance_id: AmbulanceId::new(id),
            severity,
            distance_km,
            requested_at,
        }
    }

    #[test]
    fn higher_severity_beats_closer_distance() {
        let a = contender("A", Severity::Critical, 0.5, 10);
        let b = contender("B", Severity::High, 0.1, 5);

        let r = arbitrate(&a, &b, EPS);
        assert_eq!(r.verdict, Verdict::Incumbent);
        assert_eq!(r.reason, ArbitrationReason::Severity);

        let r = arbitrate(&b, &a, EPS);
        assert_eq!(r.verdict, Verdict::Challenger);
    }

    #[test]
    fn equal_severity_prefers_closer() {
        let near = contender("NEAR", Severity::High, 0.2, 50);
        let far = contender("FAR", Severity::High, 0.9, 10);

        assert_eq!(arbitrate(&far, &near, EPS).verdict, Verdict::Challenger);
        assert_eq!(arbitrate(&near, &far, EPS).verdict, Verdict::Incumbent);
        assert_eq!(arbitrate(&near, &far, EPS).reason, ArbitrationReason::Distance);
    }

    #[test]
    fn distance_within_epsilon_falls_through_to_timestamp() {
        let early = contender("Z", Severity::Moderate, 0.4000, 100);
        let late = contender("A", Severity::Moderate, 0.4005, 200);

        let r = arbitrate(&late, &early, EPS);
        assert_eq!(r.verdict, Verdict::Challenger);
        assert_eq!(r.reason, ArbitrationReason::RequestTime);
    }

    #[test]
    fn full_tie_is_broken_by_ambulance_id() {
        let a = contender("AMB-1", Severity::Low, 1.0, 7);
        let b = contender("AMB-2", Severity::Low, 1.0, 7);

        assert_eq!(arbitrate(&b, &a, EPS).verdict, Verdict::Challenger);
        assert_eq!(arbitrate(&a, &b, EPS).verdict, Verdict::Incumbent);
        assert_eq!(arbitrate(&a, &b, EPS).reason, ArbitrationReason::AmbulanceId);
    }

    #[test]
    fn winner_is_independent_of_arrival_order() {
        let x = contender("X", Severity::High, 0.3, 1);
        let y = contender("Y", Severity::High, 0.3, 2);

        let winner_when_x_first = match arbitrate(&x, &y, EPS).verdict {
            Verdict::Incumbent => "X",
            Verdict::Challenger => "Y",
        };
        let winner_when_y_first = match arbitrate(&y, &x, EPS).verdict {
            Verdict::Incumbent => "Y",
            Verdict::Challenger => "X",
        };
        assert_eq!(winner_when_x_first, winner_when_y_first);
    }
}

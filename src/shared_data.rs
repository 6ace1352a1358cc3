// src/shared_data.rs

use crate::data_structures::{AmbulanceId, GeoPoint, Severity, Timestamp, TripState};
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};

/// Per-ambulance report from the dispatch service, sent every polling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbulanceUpdate {
    pub ambulance_id: AmbulanceId,
    pub current_position: GeoPoint,
    pub destination_position: GeoPoint,
    pub severity: Severity,
    pub trip_state: TripState,
    /// When dispatch took the reading; used as the request timestamp.
    pub reported_at: Timestamp,
}

impl AmbulanceUpdate {
    pub fn validate(&self) -> EngineResult<()> {
        self.ambulance_id.validate()?;
        self.current_position.validate()?;
        self.destination_position.validate()?;
        Ok(())
    }
}

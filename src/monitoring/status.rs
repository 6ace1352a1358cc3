// status.rs
//
// Read-only views for dashboards. Nothing here triggers arbitration or moves
// an FSM; every method takes a consistent-enough snapshot one signal at a time.

use crate::control_system::preemption_engine::PreemptionEngine;
use crate::control_system::signal_fsm::{SignalRecord, SignalState, Transition};
use crate::control_system::suppression::SuppressionEntry;
use crate::control_system::{lock_or_recover, read_or_recover};
use crate::data_structures::{AmbulanceId, GeoPoint, SignalId, Timestamp};
use crate::error::{EngineError, EngineResult};
use crate::global_variables::{AMBULANCE_DECISION_WINDOW, SIGNAL_DECISION_WINDOW};
use crate::monitoring::decision_log::{write_csv, DecisionLogEntry};
use crate::route_engine::corridor_resolver::{active_corridor, resolve_corridor};
use crate::shared_data::AmbulanceUpdate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSnapshot {
    pub id: SignalId,
    pub name: String,
    pub position: GeoPoint,
    pub fsm_state: SignalState,
    pub controlled_by: Option<AmbulanceId>,
    pub green_time_remaining_ms: u64,
}

impl SignalSnapshot {
    fn of(record: &SignalRecord, now: Timestamp) -> Self {
        let site = record.site();
        Self {
            id: site.id.clone(),
            name: site.name.clone(),
            position: site.position,
            fsm_state: record.state(),
            controlled_by: record.controlled_by().cloned(),
            green_time_remaining_ms: record.green_time_remaining(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    /// Ambulances holding at least one lock.
    pub active_ambulance_ids: Vec<AmbulanceId>,
    pub locked_resources: BTreeMap<SignalId, AmbulanceId>,
    pub suppressed_ambulance_ids: Vec<AmbulanceId>,
    pub recent_decisions: Vec<DecisionLogEntry>,
    pub generated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorridorSignalState {
    pub signal: SignalSnapshot,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorridorSnapshot {
    pub ambulance_id: AmbulanceId,
    pub full_route_signal_ids: Vec<SignalId>,
    pub active_corridor_signal_ids: Vec<SignalId>,
    pub per_signal_state: Vec<CorridorSignalState>,
}

impl PreemptionEngine {
    /// Signal -> holder, for every locked signal.
    pub fn lock_table(&self) -> BTreeMap<SignalId, AmbulanceId> {
        self.signals
            .iter()
            .filter_map(|slot| {
                let record = lock_or_recover(slot);
                record.controlled_by().map(|holder| (record.id().clone(), holder.clone()))
            })
            .collect()
    }

    pub fn signal_snapshot(&self, signal_id: &SignalId) -> EngineResult<SignalSnapshot> {
        let now = self.now();
        let record = lock_or_recover(self.slot(signal_id)?);
        Ok(SignalSnapshot::of(&record, now))
    }

    /// Every signal in registry order.
    pub fn signal_snapshots(&self) -> Vec<SignalSnapshot> {
        let now = self.now();
        self.signals
            .iter()
            .map(|slot| SignalSnapshot::of(&lock_or_recover(slot), now))
            .collect()
    }

    pub fn system_snapshot(&self) -> SystemSnapshot {
        // excludes a half-finished trip cancellation
        let _gate = read_or_recover(&self.trip_gate);
        let now = self.now();
        let locked_resources = self.lock_table();
        let active: BTreeSet<AmbulanceId> = locked_resources.values().cloned().collect();
        let suppressed_ambulance_ids = lock_or_recover(&self.suppressed).ambulance_ids(now);
        let recent_decisions = lock_or_recover(&self.decisions).tail(self.config.decision_tail_len);
        SystemSnapshot {
            active_ambulance_ids: active.into_iter().collect(),
            locked_resources,
            suppressed_ambulance_ids,
            recent_decisions,
            generated_at: now,
        }
    }

    /// Live suppression windows, sorted by ambulance then signal.
    pub fn suppression_entries(&self) -> Vec<SuppressionEntry> {
        let now = self.now();
        lock_or_recover(&self.suppressed).entries(now)
    }

    /// What the corridor of this update looks like right now, without requesting anything.
    pub fn corridor_snapshot(&self, update: &AmbulanceUpdate) -> EngineResult<CorridorSnapshot> {
        update.validate()?;
        let full_route = resolve_corridor(
            update.current_position,
            update.destination_position,
            &self.registry,
            self.config.corridor_width_km,
        );
        let active = active_corridor(&full_route, self.config.prepare_band_km, self.config.max_active_signals);
        let per_signal_state = full_route
            .iter()
            .map(|entry| {
                Ok(CorridorSignalState {
                    signal: self.signal_snapshot(&entry.signal_id)?,
                    distance_km: entry.distance_km,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(CorridorSnapshot {
            ambulance_id: update.ambulance_id.clone(),
            full_route_signal_ids: full_route.into_iter().map(|e| e.signal_id).collect(),
            active_corridor_signal_ids: active.into_iter().map(|e| e.signal_id).collect(),
            per_signal_state,
        })
    }

    pub fn decision_history(&self) -> Vec<DecisionLogEntry> {
        lock_or_recover(&self.decisions).entries()
    }

    pub fn recent_decisions(&self) -> Vec<DecisionLogEntry> {
        lock_or_recover(&self.decisions).tail(self.config.decision_tail_len)
    }

    /// Last decisions the ambulance won or lost. Unknown ambulances just have none.
    pub fn decisions_for_ambulance(&self, ambulance_id: &AmbulanceId) -> Vec<DecisionLogEntry> {
        lock_or_recover(&self.decisions).for_ambulance(ambulance_id, AMBULANCE_DECISION_WINDOW)
    }

    pub fn decisions_for_signal(&self, signal_id: &SignalId) -> EngineResult<Vec<DecisionLogEntry>> {
        if !self.registry.contains(signal_id) {
            return Err(EngineError::SignalNotFound(signal_id.clone()));
        }
        Ok(lock_or_recover(&self.decisions).for_signal(signal_id, SIGNAL_DECISION_WINDOW))
    }

    pub fn signal_history(&self, signal_id: &SignalId) -> EngineResult<Vec<Transition>> {
        let record = lock_or_recover(self.slot(signal_id)?);
        Ok(record.history().cloned().collect())
    }

    /// Writes the retained decision log to `path`, replacing the file.
    pub fn export_decisions_csv(&self, path: impl AsRef<Path>) -> EngineResult<usize> {
        let entries = self.decision_history();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        write_csv(&entries, file, true)?;
        Ok(entries.len())
    }
}

use crate::data_structures::{AmbulanceId, SignalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A losing ambulance barred from re-contesting one signal until `until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionEntry {
    pub ambulance_id: AmbulanceId,
    pub signal_id: SignalId,
    pub until: Timestamp,
}

/// Ambulances that lost an arbitration, keyed per (ambulance, signal).
#[derive(Debug, Clone, Default)]
pub struct SuppressedSet {
    entries: HashMap<(AmbulanceId, SignalId), Timestamp>,
}

impl SuppressedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or extends a suppression window.
    pub fn suppress(&mut self, ambulance_id: AmbulanceId, signal_id: SignalId, until: Timestamp) {
        let slot = self.entries.entry((ambulance_id, signal_id)).or_insert(until);
        *slot = (*slot).max(until);
    }

    /// End of the suppression window still in force at `now`, if any.
    pub fn active_until(&self, ambulance_id: &AmbulanceId, signal_id: &SignalId, now: Timestamp) -> Option<Timestamp> {
        self.entries
            .get(&(ambulance_id.clone(), signal_id.clone()))
            .copied()
            .filter(|&until| until > now)
    }

    /// Timer callback. Only removes the entry if it was not extended since the
    /// timer was armed.
    pub fn expire(&mut self, ambulance_id: &AmbulanceId, signal_id: &SignalId, until: Timestamp) -> bool {
        let key = (ambulance_id.clone(), signal_id.clone());
        if self.entries.get(&key) == Some(&until) {
            self.entries.remove(&key);
            return true;
        }
        false
    }

    pub fn clear_for_signal(&mut self, ambulance_id: &AmbulanceId, signal_id: &SignalId) -> bool {
        self.entries
            .remove(&(ambulance_id.clone(), signal_id.clone()))
            .is_some()
    }

    /// Drops every entry of the ambulance; returns how many were removed.
    pub fn clear_ambulance(&mut self, ambulance_id: &AmbulanceId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(amb, _), _| amb != ambulance_id);
        before - self.entries.len()
    }

    /// Keeps only the ambulance's entries for signals still relevant to it.
    pub fn retain_signals(&mut self, ambulance_id: &AmbulanceId, relevant: &HashSet<SignalId>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(amb, sig), _| amb != ambulance_id || relevant.contains(sig));
        before - self.entries.len()
    }

    /// Distinct suppressed ambulances at `now`, sorted.
    pub fn ambulance_ids(&self, now: Timestamp) -> Vec<AmbulanceId> {
        self.entries
            .iter()
            .filter(|(_, &until)| until > now)
            .map(|((amb, _), _)| amb.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Live entries at `now`, sorted by ambulance then signal.
    pub fn entries(&self, now: Timestamp) -> Vec<SuppressionEntry> {
        let mut out: Vec<SuppressionEntry> = self
            .entries
            .iter()
            .filter(|(_, &until)| until > now)
            .map(|((amb, sig), &until)| SuppressionEntry {
                ambulance_id: amb.clone(),
                signal_id: sig.clone(),
                until,
            })
            .collect();
        out.sort_by(|a, b| (&a.ambulance_id, &a.signal_id).cmp(&(&b.ambulance_id, &b.signal_id)));
        out
    }
}

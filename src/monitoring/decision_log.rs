use crate::control_system::arbitration::ArbitrationReason;
use crate::data_structures::{AmbulanceId, SignalId, Timestamp};
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;

/// One arbitration outcome. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub resource: SignalId,
    pub winner: AmbulanceId,
    /// Empty for a clean grant.
    pub losers: Vec<AmbulanceId>,
    pub reason: ArbitrationReason,
    pub timestamp: Timestamp,
}

impl DecisionLogEntry {
    pub fn involves(&self, ambulance_id: &AmbulanceId) -> bool {
        &self.winner == ambulance_id || self.losers.contains(ambulance_id)
    }
}

/// Append-only ring buffer; the oldest entries fall off past `capacity`.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    entries: VecDeque<DecisionLogEntry>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, entry: DecisionLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Full retained history, oldest first.
    pub fn entries(&self) -> Vec<DecisionLogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<DecisionLogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// The most recent `n` entries the ambulance won or lost.
    pub fn for_ambulance(&self, ambulance_id: &AmbulanceId, n: usize) -> Vec<DecisionLogEntry> {
        last_matching(&self.entries, n, |e| e.involves(ambulance_id))
    }

    /// The most recent `n` entries about one signal.
    pub fn for_signal(&self, signal_id: &SignalId, n: usize) -> Vec<DecisionLogEntry> {
        last_matching(&self.entries, n, |e| &e.resource == signal_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn last_matching(
    entries: &VecDeque<DecisionLogEntry>,
    n: usize,
    pred: impl Fn(&DecisionLogEntry) -> bool,
) -> Vec<DecisionLogEntry> {
    let mut out: Vec<DecisionLogEntry> = entries.iter().rev().filter(|e| pred(e)).take(n).cloned().collect();
    out.reverse();
    out
}

/// Flat CSV row; losers are joined with ';'.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: Timestamp,
    pub resource: String,
    pub winner: String,
    pub losers: String,
    pub reason: ArbitrationReason,
}

impl From<&DecisionLogEntry> for DecisionRecord {
    fn from(entry: &DecisionLogEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            resource: entry.resource.0.clone(),
            winner: entry.winner.0.clone(),
            losers: entry
                .losers
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            reason: entry.reason,
        }
    }
}

/// Writes entries as CSV rows, with a header line when `with_headers` is set.
pub fn write_csv<W: Write>(entries: &[DecisionLogEntry], writer: W, with_headers: bool) -> EngineResult<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(with_headers)
        .from_writer(writer);
    for entry in entries {
        wtr.serialize(DecisionRecord::from(entry))?;
    }
    wtr.flush()?;
    Ok(())
}

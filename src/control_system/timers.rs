use crate::data_structures::{AmbulanceId, SignalId, Timestamp};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Deferred work. Timers name their target by id and carry enough context
/// (episode, window end) to recognise when the target has moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    GreenExpired { signal_id: SignalId, episode: u64 },
    CooldownElapsed { signal_id: SignalId, episode: u64 },
    SuppressionExpired { ambulance_id: AmbulanceId, signal_id: SignalId, until: Timestamp },
}

#[derive(Debug)]
struct ScheduledTimer {
    due: Timestamp,
    seq: u64,
    event: TimerEvent,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTimer {}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Min-heap of timers ordered by due time, then by scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<ScheduledTimer>>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Timestamp, event: TimerEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledTimer { due, seq, event }));
    }

    /// Removes and returns every timer due at or before `now`, in firing order.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<TimerEvent> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(timer)) = self.heap.pop() {
                due.push(timer.event);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green(signal: &str, episode: u64) -> TimerEvent {
        TimerEvent::GreenExpired {
            signal_id: SignalId::new(signal),
            episode,
        }
    }

    #[test]
    fn pops_only_due_timers_in_order() {
        let mut q = TimerQueue::new();
        q.schedule(300, green("S3", 1));
        q.schedule(100, green("S1", 1));
        q.schedule(100, green("S2", 1));
        q.schedule(200, green("S4", 1));

        assert!(q.pop_due(99).is_empty());
        assert_eq!(q.pop_due(200), vec![green("S1", 1), green("S2", 1), green("S4", 1)]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(1_000), vec![green("S3", 1)]);
        assert!(q.is_empty());
    }
}

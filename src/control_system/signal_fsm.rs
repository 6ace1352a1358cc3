// signal_fsm.rs
//
// Per-signal preemption state machine:
//
//   NORMAL -> PREPARE_PRIORITY -> GREEN_FOR_AMBULANCE -> COOLDOWN -> NORMAL
//
// PREPARE_PRIORITY may be skipped, never re-entered from green. The lock on a
// signal is its `holder`: set exactly while the state is PREPARE_PRIORITY or
// GREEN_FOR_AMBULANCE. Every change bumps `episode`; timers remember the
// episode they were armed in and are ignored once it has moved on.

use crate::control_system::arbitration::Contender;
use crate::data_structures::{AmbulanceId, SignalId, SignalSite, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Normal,
    PreparePriority,
    GreenForAmbulance,
    Cooldown,
}

impl SignalState {
    /// States in which the signal is locked by an ambulance.
    pub fn is_controlled(&self) -> bool {
        matches!(self, SignalState::PreparePriority | SignalState::GreenForAmbulance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionReason {
    GrantedPrepare,
    GrantedGreen,
    AmbulanceClosing,
    HolderChanged,
    GreenExpired,
    HolderReleased,
    PrepareAbandoned,
    CooldownElapsed,
    TripEnded,
}

/// Inputs that can move a signal.
#[derive(Debug, Clone)]
pub enum SignalEvent {
    /// An ambulance that owns (or has just been awarded) the lock reports its distance.
    /// `immediate` is true when it is inside the immediate band.
    Approach { contender: Contender, immediate: bool },
    GreenExpired { episode: u64 },
    CooldownElapsed { episode: u64 },
    /// The holder no longer needs the signal (left its corridor or released explicitly).
    Release { ambulance_id: AmbulanceId },
    /// The holder's trip is over; go straight back to NORMAL.
    TripEnded { ambulance_id: AmbulanceId },
}

/// A completed state change, kept in the signal's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub signal_id: SignalId,
    pub from: SignalState,
    pub to: SignalState,
    pub previous_holder: Option<AmbulanceId>,
    pub holder: Option<AmbulanceId>,
    pub reason: TransitionReason,
    pub episode: u64,
    pub at: Timestamp,
    /// When the new state times out on its own (green expiry or end of cooldown).
    pub deadline: Option<Timestamp>,
}

impl Transition {
    /// The ambulance that lost control through this transition, if any.
    pub fn released(&self) -> Option<&AmbulanceId> {
        match (&self.previous_holder, &self.holder) {
            (Some(prev), Some(now)) if prev == now => None,
            (Some(prev), _) => Some(prev),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignalTimings {
    pub green_time_ms: u64,
    pub cooldown_ms: u64,
}

/// One arena slot: a registry site plus its live FSM.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    site: SignalSite,
    state: SignalState,
    holder: Option<Contender>,
    green_until: Option<Timestamp>,
    cooldown_until: Option<Timestamp>,
    episode: u64,
    timings: SignalTimings,
    history: VecDeque<Transition>,
    history_len: usize,
}

impl SignalRecord {
    pub fn new(site: SignalSite, timings: SignalTimings, history_len: usize) -> Self {
        Self {
            site,
            state: SignalState::Normal,
            holder: None,
            green_until: None,
            cooldown_until: None,
            episode: 0,
            timings,
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn site(&self) -> &SignalSite {
        &self.site
    }

    pub fn id(&self) -> &SignalId {
        &self.site.id
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn holder(&self) -> Option<&Contender> {
        self.holder.as_ref()
    }

    pub fn controlled_by(&self) -> Option<&AmbulanceId> {
        self.holder.as_ref().map(|h| &h.ambulance_id)
    }

    pub fn is_held_by(&self, ambulance_id: &AmbulanceId) -> bool {
        self.controlled_by() == Some(ambulance_id)
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn cooldown_until(&self) -> Option<Timestamp> {
        self.cooldown_until
    }

    /// Milliseconds of green left; zero outside GREEN_FOR_AMBULANCE.
    pub fn green_time_remaining(&self, now: Timestamp) -> u64 {
        match (self.state, self.green_until) {
            (SignalState::GreenForAmbulance, Some(until)) => until.saturating_sub(now),
            _ => 0,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    /// Applies an event. Returns the transition taken, or `None` when the event
    /// does not apply to the current state (stale timer, repeat request, ...).
    pub fn apply(&mut self, event: SignalEvent, now: Timestamp) -> Option<Transition> {
        match event {
            SignalEvent::Approach { contender, immediate } => self.approach(contender, immediate, now),
            SignalEvent::GreenExpired { episode } => {
                if self.state != SignalState::GreenForAmbulance || episode != self.episode {
                    return None;
                }
                Some(self.enter_cooldown(now, TransitionReason::GreenExpired))
            }
            SignalEvent::CooldownElapsed { episode } => {
                if self.state != SignalState::Cooldown || episode != self.episode {
                    return None;
                }
                Some(self.move_to(SignalState::Normal, None, TransitionReason::CooldownElapsed, now))
            }
            SignalEvent::Release { ambulance_id } => {
                if !self.is_held_by(&ambulance_id) {
                    return None;
                }
                match self.state {
                    SignalState::GreenForAmbulance => {
                        Some(self.enter_cooldown(now, TransitionReason::HolderReleased))
                    }
                    // no green was shown, nothing to cool down from
                    _ => Some(self.move_to(
                        SignalState::Normal,
                        None,
                        TransitionReason::PrepareAbandoned,
                        now,
                    )),
                }
            }
            SignalEvent::TripEnded { ambulance_id } => {
                if !self.is_held_by(&ambulance_id) {
                    return None;
                }
                Some(self.move_to(SignalState::Normal, None, TransitionReason::TripEnded, now))
            }
        }
    }

    fn approach(&mut self, contender: Contender, immediate: bool, now: Timestamp) -> Option<Transition> {
        match self.state {
            SignalState::Cooldown => None,
            SignalState::Normal => {
                let (to, reason) = if immediate {
                    (SignalState::GreenForAmbulance, TransitionReason::GrantedGreen)
                } else {
                    (SignalState::PreparePriority, TransitionReason::GrantedPrepare)
                };
                Some(self.move_to(to, Some(contender), reason, now))
            }
            SignalState::PreparePriority | SignalState::GreenForAmbulance => {
                let mut contender = contender;
                let same_holder = match &self.holder {
                    Some(current) if current.ambulance_id == contender.ambulance_id => {
                        // the hold dates from its grant, not from the latest tick
                        contender.requested_at = current.requested_at;
                        true
                    }
                    _ => false,
                };
                let target = if immediate || self.state == SignalState::GreenForAmbulance {
                    SignalState::GreenForAmbulance
                } else {
                    SignalState::PreparePriority
                };
                if same_holder {
                    if target == self.state {
                        // refresh only
                        self.holder = Some(contender);
                        return None;
                    }
                    return Some(self.move_to(target, Some(contender), TransitionReason::AmbulanceClosing, now));
                }
                Some(self.move_to(target, Some(contender), TransitionReason::HolderChanged, now))
            }
        }
    }

    fn enter_cooldown(&mut self, now: Timestamp, reason: TransitionReason) -> Transition {
        self.move_to(SignalState::Cooldown, None, reason, now)
    }

    fn move_to(
        &mut self,
        to: SignalState,
        holder: Option<Contender>,
        reason: TransitionReason,
        now: Timestamp,
    ) -> Transition {
        let from = self.state;
        let previous_holder = self.holder.take().map(|h| h.ambulance_id);
        let holder_id = holder.as_ref().map(|h| h.ambulance_id.clone());

        self.state = to;
        self.holder = holder;
        self.episode += 1;
        self.green_until = None;
        self.cooldown_until = None;
        let deadline = match to {
            SignalState::GreenForAmbulance => {
                let until = now.saturating_add(self.timings.green_time_ms);
                self.green_until = Some(until);
                Some(until)
            }
            SignalState::Cooldown => {
                let until = now.saturating_add(self.timings.cooldown_ms);
                self.cooldown_until = Some(until);
                Some(until)
            }
            _ => None,
        };

        let transition = Transition {
            signal_id: self.site.id.clone(),
            from,
            to,
            previous_holder,
            holder: holder_id,
            reason,
            episode: self.episode,
            at: now,
            deadline,
        };
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Severity;

    const TIMINGS: SignalTimings = SignalTimings {
        green_time_ms: 60_000,
        cooldown_ms: 5_000,
    };

    fn record() -> SignalRecord {
        SignalRecord::new(SignalSite::new("S1", "Harbour", 13.06, 80.25), TIMINGS, 4)
    }

    fn approach(id: &str, immediate: bool) -> SignalEvent {
        SignalEvent::Approach {
            contender: Contender {
                ambulance_id: AmbulanceId::new(id),
                severity: Severity::High,
                distance_km: if immediate { 0.2 } else { 1.0 },
                requested_at: 0,
            },
            immediate,
        }
    }

    fn assert_lock_invariant(r: &SignalRecord) {
        assert_eq!(r.controlled_by().is_some(), r.state().is_controlled());
    }

    #[test]
    fn full_episode_walks_every_state() {
        let mut r = record();
        let t = r.apply(approach("A", false), 0).unwrap();
        assert_eq!((t.from, t.to), (SignalState::Normal, SignalState::PreparePriority));
        assert_lock_invariant(&r);

        let t = r.apply(approach("A", true), 1_000).unwrap();
        assert_eq!(t.to, SignalState::GreenForAmbulance);
        assert_eq!(t.reason, TransitionReason::AmbulanceClosing);
        assert_eq!(t.deadline, Some(61_000));
        assert_eq!(r.green_time_remaining(31_000), 30_000);

        let t = r.apply(SignalEvent::GreenExpired { episode: r.episode() }, 61_000).unwrap();
        assert_eq!(t.to, SignalState::Cooldown);
        assert_eq!(t.released(), Some(&AmbulanceId::new("A")));
        assert_eq!(r.controlled_by(), None);
        assert_eq!(r.green_time_remaining(61_000), 0);

        let t = r.apply(SignalEvent::CooldownElapsed { episode: r.episode() }, 66_000).unwrap();
        assert_eq!(t.to, SignalState::Normal);
        assert_lock_invariant(&r);
    }

    #[test]
    fn prepare_can_be_skipped() {
        let mut r = record();
        let t = r.apply(approach("A", true), 0).unwrap();
        assert_eq!(t.to, SignalState::GreenForAmbulance);
        assert_eq!(t.reason, TransitionReason::GrantedGreen);
    }

    #[test]
    fn repeat_approach_is_a_no_op() {
        let mut r = record();
        r.apply(approach("A", true), 0);
        let episode = r.episode();
        assert!(r.apply(approach("A", true), 10).is_none());
        assert!(r.apply(approach("A", false), 20).is_none(), "green never goes back to prepare");
        assert_eq!(r.episode(), episode);
        assert_eq!(r.state(), SignalState::GreenForAmbulance);
    }

    #[test]
    fn refresh_keeps_the_grant_time() {
        let mut r = record();
        r.apply(approach("A", false), 0);
        let mut closer = approach("A", true);
        if let SignalEvent::Approach { contender, .. } = &mut closer {
            contender.requested_at = 500;
        }
        r.apply(closer, 500);
        let mut later = approach("A", true);
        if let SignalEvent::Approach { contender, .. } = &mut later {
            contender.requested_at = 900;
            contender.distance_km = 0.1;
        }
        assert!(r.apply(later, 900).is_none());

        let holder = r.holder().unwrap();
        assert_eq!(holder.requested_at, 0);
        assert_eq!(holder.distance_km, 0.1);
    }

    #[test]
    fn stale_timers_are_ignored() {
        let mut r = record();
        r.apply(approach("A", true), 0);
        let armed = r.episode();
        r.apply(SignalEvent::Release { ambulance_id: AmbulanceId::new("A") }, 10);
        assert_eq!(r.state(), SignalState::Cooldown);

        assert!(r.apply(SignalEvent::GreenExpired { episode: armed }, 60_000).is_none());
        assert!(r.apply(SignalEvent::CooldownElapsed { episode: armed }, 60_000).is_none());
        assert_eq!(r.state(), SignalState::Cooldown);
    }

    #[test]
    fn cooldown_refuses_new_holders() {
        let mut r = record();
        r.apply(approach("A", true), 0);
        r.apply(SignalEvent::Release { ambulance_id: AmbulanceId::new("A") }, 10);
        assert!(r.apply(approach("B", false), 20).is_none());
        assert_eq!(r.controlled_by(), None);
    }

    #[test]
    fn abandoned_prepare_goes_straight_to_normal() {
        let mut r = record();
        r.apply(approach("A", false), 0);
        let t = r.apply(SignalEvent::Release { ambulance_id: AmbulanceId::new("A") }, 5).unwrap();
        assert_eq!(t.to, SignalState::Normal);
        assert_eq!(t.reason, TransitionReason::PrepareAbandoned);
    }

    #[test]
    fn transfer_keeps_green_for_new_holder() {
        let mut r = record();
        r.apply(approach("A", true), 0);
        let t = r.apply(approach("B", false), 10_000).unwrap();
        assert_eq!(t.to, SignalState::GreenForAmbulance);
        assert_eq!(t.reason, TransitionReason::HolderChanged);
        assert_eq!(t.released(), Some(&AmbulanceId::new("A")));
        assert_eq!(r.controlled_by(), Some(&AmbulanceId::new("B")));
        assert_eq!(r.green_time_remaining(10_000), 60_000);
    }

    #[test]
    fn release_by_non_holder_and_trip_end_for_stranger_are_ignored() {
        let mut r = record();
        r.apply(approach("A", false), 0);
        assert!(r.apply(SignalEvent::Release { ambulance_id: AmbulanceId::new("B") }, 1).is_none());
        assert!(r.apply(SignalEvent::TripEnded { ambulance_id: AmbulanceId::new("B") }, 1).is_none());
        let t = r.apply(SignalEvent::TripEnded { ambulance_id: AmbulanceId::new("A") }, 2).unwrap();
        assert_eq!(t.to, SignalState::Normal);
    }

    #[test]
    fn history_is_bounded() {
        let mut r = record();
        for i in 0..5u64 {
            r.apply(approach("A", false), i * 10);
            r.apply(SignalEvent::Release { ambulance_id: AmbulanceId::new("A") }, i * 10 + 1);
        }
        assert_eq!(r.history().count(), 4);
        assert_eq!(r.history().last().map(|t| t.to), Some(SignalState::Normal));
    }
}

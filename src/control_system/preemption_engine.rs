// preemption_engine.rs
//
// Lock & arbitration manager. Signals live in an arena (one mutex per signal,
// indexed by registry position); the lock on a signal is the holder stored in
// its FSM record, so the lock table and `controlledBy` cannot disagree.
//
// Lock order: signal record -> suppressed set -> decision log -> timer queue.
// No code path holds two signal records at once. `trip_gate` is taken shared
// by every mutating operation and exclusively by `complete_trip`, which makes
// trip cancellation atomic with respect to arbitration.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::control_system::arbitration::{arbitrate, ArbitrationReason, Contender, Verdict};
use crate::control_system::signal_fsm::{SignalEvent, SignalRecord, SignalState, SignalTimings, Transition};
use crate::control_system::suppression::SuppressedSet;
use crate::control_system::timers::{TimerEvent, TimerQueue};
use crate::control_system::{lock_or_recover, read_or_recover, write_or_recover};
use crate::data_structures::{AmbulanceId, Severity, SignalId, Timestamp};
use crate::error::{EngineError, EngineResult};
use crate::monitoring::decision_log::{DecisionLog, DecisionLogEntry};
use crate::route_engine::corridor_resolver::{active_corridor, resolve_corridor, CorridorEntry};
use crate::route_engine::signals::SignalRegistry;
use crate::shared_data::AmbulanceUpdate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::{sleep, Duration};

/// A single `RequestControl` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub signal_id: SignalId,
    pub ambulance_id: AmbulanceId,
    pub severity: Severity,
    /// Distance from the ambulance to the signal in km. Required.
    pub distance_km: Option<f64>,
    pub requested_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeferReason {
    OutOfRange { distance_km: f64, prepare_band_km: f64 },
    CoolingDown { until: Timestamp },
    BelowPriorityThreshold { severity: Severity, minimum: Severity },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlOutcome {
    /// The signal was free and is now locked by the requester.
    Granted { state: SignalState },
    /// The requester already held the lock.
    Refreshed { state: SignalState },
    /// The requester beat the previous holder and took the lock.
    Won { state: SignalState, losers: Vec<AmbulanceId> },
    /// The requester lost arbitration just now and is suppressed until `until`.
    Lost { holder: AmbulanceId, until: Timestamp },
    /// The requester is still inside an earlier suppression window.
    Suppressed { until: Timestamp },
    /// Not contested yet; try again on a later tick.
    Deferred { reason: DeferReason },
}

impl ControlOutcome {
    pub fn holds_lock(&self) -> bool {
        matches!(
            self,
            ControlOutcome::Granted { .. } | ControlOutcome::Refreshed { .. } | ControlOutcome::Won { .. }
        )
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ControlOutcome::Lost { .. } | ControlOutcome::Suppressed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalOutcome {
    pub signal_id: SignalId,
    pub distance_km: f64,
    pub outcome: ControlOutcome,
}

/// Result of processing one dispatch update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub ambulance_id: AmbulanceId,
    pub full_route: Vec<CorridorEntry>,
    pub active_corridor: Vec<SignalId>,
    pub outcomes: Vec<SignalOutcome>,
    pub released: Vec<SignalId>,
    pub trip_completed: bool,
}

pub struct PreemptionEngine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: SignalRegistry,
    pub(crate) signals: Vec<Mutex<SignalRecord>>,
    pub(crate) suppressed: Mutex<SuppressedSet>,
    pub(crate) decisions: Mutex<DecisionLog>,
    timers: Mutex<TimerQueue>,
    pub(crate) trip_gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl PreemptionEngine {
    pub fn new(config: EngineConfig, registry: SignalRegistry) -> EngineResult<Self> {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        registry: SignalRegistry,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let timings = SignalTimings {
            green_time_ms: config.green_time_ms,
            cooldown_ms: config.cooldown_ms,
        };
        let signals = registry
            .iter()
            .map(|site| Mutex::new(SignalRecord::new(site.clone(), timings, config.signal_history_len)))
            .collect();
        info!("Preemption engine ready with {} signals", registry.len());
        Ok(Self {
            decisions: Mutex::new(DecisionLog::new(config.decision_log_capacity)),
            suppressed: Mutex::new(SuppressedSet::new()),
            timers: Mutex::new(TimerQueue::new()),
            trip_gate: RwLock::new(()),
            signals,
            registry,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn slot(&self, signal_id: &SignalId) -> EngineResult<&Mutex<SignalRecord>> {
        self.registry
            .position(signal_id)
            .and_then(|i| self.signals.get(i))
            .ok_or_else(|| EngineError::SignalNotFound(signal_id.clone()))
    }

    /// Asks for control of one signal on behalf of an ambulance.
    pub fn request_control(&self, request: ControlRequest) -> EngineResult<ControlOutcome> {
        let distance_km = match validate_request(&request) {
            Ok(d) => d,
            Err(e) => {
                warn!("Rejected control request for {}: {}", request.signal_id, e);
                return Err(e);
            }
        };
        let slot = self.slot(&request.signal_id)?;
        let _gate = read_or_recover(&self.trip_gate);
        Ok(self.request_control_locked(slot, request, distance_km))
    }

    fn request_control_locked(
        &self,
        slot: &Mutex<SignalRecord>,
        request: ControlRequest,
        distance_km: f64,
    ) -> ControlOutcome {
        let now = self.now();
        let mut record = lock_or_recover(slot);
        let signal_id = record.id().clone();
        let immediate = distance_km <= self.config.immediate_band_km;
        let challenger = Contender {
            ambulance_id: request.ambulance_id,
            severity: request.severity,
            distance_km,
            requested_at: request.requested_at,
        };

        if record.is_held_by(&challenger.ambulance_id) {
            let ambulance_id = challenger.ambulance_id.clone();
            match record.apply(SignalEvent::Approach { contender: challenger, immediate }, now) {
                Some(t) => self.after_transition(&t),
                None => debug!("{} refreshed its hold on {}", ambulance_id, signal_id),
            }
            return ControlOutcome::Refreshed { state: record.state() };
        }

        if let Some(until) = lock_or_recover(&self.suppressed).active_until(&challenger.ambulance_id, &signal_id, now) {
            debug!("{} is suppressed on {} until {}", challenger.ambulance_id, signal_id, until);
            return ControlOutcome::Suppressed { until };
        }

        if challenger.severity < self.config.min_priority_severity {
            return ControlOutcome::Deferred {
                reason: DeferReason::BelowPriorityThreshold {
                    severity: challenger.severity,
                    minimum: self.config.min_priority_severity,
                },
            };
        }

        if distance_km > self.config.prepare_band_km {
            debug!(
                "{} is {:.3} km from {}, outside the prepare band",
                challenger.ambulance_id, distance_km, signal_id
            );
            return ControlOutcome::Deferred {
                reason: DeferReason::OutOfRange {
                    distance_km,
                    prepare_band_km: self.config.prepare_band_km,
                },
            };
        }

        if record.state() == SignalState::Cooldown {
            let until = record.cooldown_until().unwrap_or(now);
            debug!("{} is cooling down until {}; deferring {}", signal_id, until, challenger.ambulance_id);
            return ControlOutcome::Deferred {
                reason: DeferReason::CoolingDown { until },
            };
        }

        let Some(incumbent) = record.holder().cloned() else {
            let winner = challenger.ambulance_id.clone();
            if let Some(t) = record.apply(SignalEvent::Approach { contender: challenger, immediate }, now) {
                self.after_transition(&t);
            }
            self.record_decision(&signal_id, winner.clone(), Vec::new(), ArbitrationReason::CleanGrant, now);
            info!("Granted {} to {} ({:?})", signal_id, winner, record.state());
            return ControlOutcome::Granted { state: record.state() };
        };

        let decision = arbitrate(&incumbent, &challenger, self.config.distance_epsilon_km);
        let until = now.saturating_add(self.config.suppression_ms);
        match decision.verdict {
            Verdict::Challenger => {
                let winner = challenger.ambulance_id.clone();
                let loser = incumbent.ambulance_id;
                if let Some(t) = record.apply(SignalEvent::Approach { contender: challenger, immediate }, now) {
                    self.after_transition(&t);
                }
                self.suppress(loser.clone(), signal_id.clone(), until);
                self.record_decision(&signal_id, winner.clone(), vec![loser.clone()], decision.reason, now);
                info!(
                    "{} took {} from {} by {:?}; {} suppressed until {}",
                    winner, signal_id, loser, decision.reason, loser, until
                );
                ControlOutcome::Won {
                    state: record.state(),
                    losers: vec![loser],
                }
            }
            Verdict::Incumbent => {
                let loser = challenger.ambulance_id;
                let holder = incumbent.ambulance_id;
                self.suppress(loser.clone(), signal_id.clone(), until);
                self.record_decision(&signal_id, holder.clone(), vec![loser.clone()], decision.reason, now);
                info!(
                    "{} kept {} against {} by {:?}; {} suppressed until {}",
                    holder, signal_id, loser, decision.reason, loser, until
                );
                ControlOutcome::Lost { holder, until }
            }
        }
    }

    /// Voluntary release of one signal. `Ok(false)` when the ambulance was not the holder.
    pub fn release(&self, signal_id: &SignalId, ambulance_id: &AmbulanceId) -> EngineResult<bool> {
        let slot = self.slot(signal_id)?;
        let _gate = read_or_recover(&self.trip_gate);
        let now = self.now();
        let mut record = lock_or_recover(slot);
        match record.apply(SignalEvent::Release { ambulance_id: ambulance_id.clone() }, now) {
            Some(t) => {
                self.after_transition(&t);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ends an ambulance's trip: every lock it holds goes back to NORMAL and it
    /// leaves the suppressed set. Returns the released signals in registry order.
    pub fn complete_trip(&self, ambulance_id: &AmbulanceId) -> EngineResult<Vec<SignalId>> {
        ambulance_id.validate()?;
        let _gate = write_or_recover(&self.trip_gate);
        let now = self.now();
        let mut released = Vec::new();
        for slot in &self.signals {
            let mut record = lock_or_recover(slot);
            if let Some(t) = record.apply(SignalEvent::TripEnded { ambulance_id: ambulance_id.clone() }, now) {
                self.after_transition(&t);
                released.push(t.signal_id);
            }
        }
        let cleared = lock_or_recover(&self.suppressed).clear_ambulance(ambulance_id);
        info!(
            "Trip of {} ended: released {:?}, cleared {} suppression entries",
            ambulance_id, released, cleared
        );
        Ok(released)
    }

    /// Signals currently locked by the ambulance, in registry order.
    pub fn held_by(&self, ambulance_id: &AmbulanceId) -> Vec<SignalId> {
        self.signals
            .iter()
            .filter_map(|slot| {
                let record = lock_or_recover(slot);
                record.is_held_by(ambulance_id).then(|| record.id().clone())
            })
            .collect()
    }

    /// Processes one dispatch tick for an ambulance.
    pub fn process_update(&self, update: &AmbulanceUpdate) -> EngineResult<TickReport> {
        if let Err(e) = update.validate() {
            warn!("Rejected update for {}: {}", update.ambulance_id, e);
            return Err(e);
        }
        if update.trip_state.is_terminal() {
            let released = self.complete_trip(&update.ambulance_id)?;
            return Ok(TickReport {
                ambulance_id: update.ambulance_id.clone(),
                full_route: Vec::new(),
                active_corridor: Vec::new(),
                outcomes: Vec::new(),
                released,
                trip_completed: true,
            });
        }

        let full_route = resolve_corridor(
            update.current_position,
            update.destination_position,
            &self.registry,
            self.config.corridor_width_km,
        );
        let active = active_corridor(&full_route, self.config.prepare_band_km, self.config.max_active_signals);
        let active_ids: HashSet<SignalId> = active.iter().map(|e| e.signal_id.clone()).collect();

        let _gate = read_or_recover(&self.trip_gate);
        let now = self.now();

        let mut released = Vec::new();
        for slot in &self.signals {
            let mut record = lock_or_recover(slot);
            if !record.is_held_by(&update.ambulance_id) || active_ids.contains(record.id()) {
                continue;
            }
            let event = SignalEvent::Release {
                ambulance_id: update.ambulance_id.clone(),
            };
            if let Some(t) = record.apply(event, now) {
                self.after_transition(&t);
                released.push(t.signal_id);
            }
        }
        lock_or_recover(&self.suppressed).retain_signals(&update.ambulance_id, &active_ids);

        let mut outcomes = Vec::with_capacity(active.len());
        for entry in &active {
            let slot = self.slot(&entry.signal_id)?;
            let request = ControlRequest {
                signal_id: entry.signal_id.clone(),
                ambulance_id: update.ambulance_id.clone(),
                severity: update.severity,
                distance_km: Some(entry.distance_km),
                requested_at: update.reported_at,
            };
            let outcome = self.request_control_locked(slot, request, entry.distance_km);
            outcomes.push(SignalOutcome {
                signal_id: entry.signal_id.clone(),
                distance_km: entry.distance_km,
                outcome,
            });
        }

        Ok(TickReport {
            ambulance_id: update.ambulance_id.clone(),
            active_corridor: active.into_iter().map(|e| e.signal_id).collect(),
            full_route,
            outcomes,
            released,
            trip_completed: false,
        })
    }

    /// Fires every timer due at the engine clock. Returns how many changed state;
    /// stale timers are skipped.
    pub fn fire_due_timers(&self) -> usize {
        let _gate = read_or_recover(&self.trip_gate);
        let now = self.now();
        let due = lock_or_recover(&self.timers).pop_due(now);
        let mut fired = 0;
        for event in due {
            let applied = match event {
                TimerEvent::GreenExpired { signal_id, episode } => {
                    self.fire_signal_timer(&signal_id, SignalEvent::GreenExpired { episode }, now)
                }
                TimerEvent::CooldownElapsed { signal_id, episode } => {
                    self.fire_signal_timer(&signal_id, SignalEvent::CooldownElapsed { episode }, now)
                }
                TimerEvent::SuppressionExpired { ambulance_id, signal_id, until } => {
                    let expired = lock_or_recover(&self.suppressed).expire(&ambulance_id, &signal_id, until);
                    if expired {
                        debug!("Suppression of {} on {} expired", ambulance_id, signal_id);
                    }
                    expired
                }
            };
            if applied {
                fired += 1;
            }
        }
        fired
    }

    fn fire_signal_timer(&self, signal_id: &SignalId, event: SignalEvent, now: Timestamp) -> bool {
        let Ok(slot) = self.slot(signal_id) else {
            return false;
        };
        let mut record = lock_or_recover(slot);
        match record.apply(event, now) {
            Some(t) => {
                self.after_transition(&t);
                true
            }
            None => {
                debug!("Stale timer for {} ignored", signal_id);
                false
            }
        }
    }

    pub fn pending_timers(&self) -> usize {
        lock_or_recover(&self.timers).len()
    }

    /// Drives the engine's timers until the task is dropped.
    pub async fn run_timer_loop(engine: Arc<Self>) {
        let tick = Duration::from_millis(engine.config.timer_tick_ms);
        loop {
            let fired = engine.fire_due_timers();
            if fired > 0 {
                debug!("Timer tick fired {} events", fired);
            }
            sleep(tick).await;
        }
    }

    // Called with the signal's record still locked.
    fn after_transition(&self, t: &Transition) {
        info!(
            "Signal {}: {:?} -> {:?} ({:?}, holder {:?})",
            t.signal_id, t.from, t.to, t.reason, t.holder
        );
        if let Some(released) = t.released() {
            lock_or_recover(&self.suppressed).clear_for_signal(released, &t.signal_id);
        }
        if let Some(deadline) = t.deadline {
            let event = match t.to {
                SignalState::GreenForAmbulance => TimerEvent::GreenExpired {
                    signal_id: t.signal_id.clone(),
                    episode: t.episode,
                },
                SignalState::Cooldown => TimerEvent::CooldownElapsed {
                    signal_id: t.signal_id.clone(),
                    episode: t.episode,
                },
                _ => return,
            };
            lock_or_recover(&self.timers).schedule(deadline, event);
        }
    }

    fn suppress(&self, ambulance_id: AmbulanceId, signal_id: SignalId, until: Timestamp) {
        lock_or_recover(&self.suppressed).suppress(ambulance_id.clone(), signal_id.clone(), until);
        lock_or_recover(&self.timers).schedule(
            until,
            TimerEvent::SuppressionExpired {
                ambulance_id,
                signal_id,
                until,
            },
        );
    }

    fn record_decision(
        &self,
        signal_id: &SignalId,
        winner: AmbulanceId,
        losers: Vec<AmbulanceId>,
        reason: ArbitrationReason,
        now: Timestamp,
    ) {
        lock_or_recover(&self.decisions).append(DecisionLogEntry {
            resource: signal_id.clone(),
            winner,
            losers,
            reason,
            timestamp: now,
        });
    }
}

fn validate_request(request: &ControlRequest) -> EngineResult<f64> {
    request.ambulance_id.validate()?;
    match request.distance_km {
        None => Err(EngineError::invalid("distance is required")),
        Some(d) if !d.is_finite() || d < 0.0 => {
            Err(EngineError::invalid(format!("distance {} must be a non-negative number", d)))
        }
        Some(d) => Ok(d),
    }
}

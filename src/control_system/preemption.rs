use crate::config::ControllerConfig;
use crate::emergency::EmergencyDetector;
pub use crate::emergency::EmergencyRequest;
use crate::intersection::approach_registry::{ApproachId, ApproachRegistry, Phase};
use crate::simulation_engine::traffic_source::VehicleObservation;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Normal,
    AllRed,
    Emergency,
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SignalState::Normal => "NORMAL",
            SignalState::AllRed => "ALL_RED",
            SignalState::Emergency => "EMERGENCY",
        };
        write!(f, "{}", name)
    }
}

/// The single controller state record, owned by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub mode: SignalState,
    /// Tick the current mode was entered.
    pub entered_at: u64,
    /// Tick at which a timed state may transition.
    pub state_deadline: Option<u64>,
    pub active_emergency: Option<EmergencyRequest>,
    /// Tick the active vehicle was first seen off the incoming lanes.
    pub clearance_at: Option<u64>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            mode: SignalState::Normal,
            entered_at: 0,
            state_deadline: None,
            active_emergency: None,
            clearance_at: None,
        }
    }
}

/// What `evaluate` did this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    /// NORMAL left for ALL_RED or straight to EMERGENCY.
    Detected,
    /// ALL_RED buffer over, EMERGENCY entered.
    BufferElapsed,
    /// Vehicle cleared and hold time over, back to NORMAL.
    Released,
    /// Inconsistent emergency record dropped, back to NORMAL.
    Recovered,
}

/// What the machine needs to know about the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub now: u64,
    pub candidate: Option<&'a EmergencyRequest>,
    pub current_green: Option<ApproachId>,
    pub vehicles: &'a [VehicleObservation],
}

/// NORMAL / ALL_RED / EMERGENCY preemption logic.
///
/// With preemption disabled the machine stays in NORMAL and only tracks the
/// nearest emergency vehicle for the responsiveness KPI.
#[derive(Debug, Clone)]
pub struct PreemptionStateMachine {
    state: ControllerState,
    detector: EmergencyDetector,
    all_red_time: u32,
    extra_clear_time: u32,
    enabled: bool,
    history: Vec<EmergencyRequest>,
}

impl PreemptionStateMachine {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            state: ControllerState::default(),
            detector: EmergencyDetector::new(config.detection_radius),
            all_red_time: config.all_red_time,
            extra_clear_time: config.extra_clear_time,
            enabled: config.preemption_enabled,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn mode(&self) -> SignalState {
        self.state.mode
    }

    pub fn detector(&self) -> &EmergencyDetector {
        &self.detector
    }

    pub fn active_emergency(&self) -> Option<&EmergencyRequest> {
        self.state.active_emergency.as_ref()
    }

    /// Finished emergency events, oldest first.
    pub fn history(&self) -> &[EmergencyRequest] {
        &self.history
    }

    /// Applies this tick's transition, if any. Called once per tick before actuation.
    pub fn evaluate(&mut self, ctx: TickContext<'_>, registry: &ApproachRegistry) -> Transition {
        match self.state.mode {
            SignalState::Normal if self.enabled => self.evaluate_normal(ctx),
            SignalState::Normal => {
                self.monitor(ctx, registry);
                Transition::Stay
            }
            SignalState::AllRed => {
                if !self.active_is_well_formed(registry) {
                    return self.recover(ctx.now);
                }
                if self.state.state_deadline.map_or(true, |d| ctx.now >= d) {
                    self.enter(SignalState::Emergency, ctx.now, None);
                    log::info!("[Preemption] t={} ALL_RED -> EMERGENCY", ctx.now);
                    Transition::BufferElapsed
                } else {
                    Transition::Stay
                }
            }
            SignalState::Emergency => self.evaluate_emergency(ctx, registry),
        }
    }

    /// Records the first green shown to the active request's approach.
    pub fn note_actuated(&mut self, phase: Phase, now: u64) {
        let Some(active) = self.state.active_emergency.as_mut() else {
            return;
        };
        if active.first_green_at.is_none() && phase.green_approach() == Some(active.approach) {
            active.first_green_at = Some(now);
            log::info!(
                "[Preemption] t={} emergency {} got green on {} (waited {}s)",
                now,
                active.vehicle_id,
                active.approach,
                now.saturating_sub(active.detected_at)
            );
        }
    }

    fn evaluate_normal(&mut self, ctx: TickContext<'_>) -> Transition {
        let Some(request) = ctx.candidate else {
            return Transition::Stay;
        };
        let direct = ctx.current_green == Some(request.approach) || self.all_red_time == 0;
        log::info!(
            "[Preemption] t={} emergency {} detected on {} at {:.1}m",
            ctx.now,
            request.vehicle_id,
            request.approach,
            request.distance
        );
        self.state.active_emergency = Some(request.clone());
        if direct {
            self.enter(SignalState::Emergency, ctx.now, None);
            log::info!("[Preemption] t={} NORMAL -> EMERGENCY", ctx.now);
        } else {
            let deadline = ctx.now + u64::from(self.all_red_time);
            self.enter(SignalState::AllRed, ctx.now, Some(deadline));
            log::info!("[Preemption] t={} NORMAL -> ALL_RED until t={}", ctx.now, deadline);
        }
        Transition::Detected
    }

    fn evaluate_emergency(&mut self, ctx: TickContext<'_>, registry: &ApproachRegistry) -> Transition {
        if !self.active_is_well_formed(registry) {
            return self.recover(ctx.now);
        }
        let Some(active) = self.state.active_emergency.as_mut() else {
            return self.recover(ctx.now);
        };

        if let Some(candidate) = ctx.candidate.filter(|c| c.vehicle_id == active.vehicle_id) {
            active.distance = candidate.distance;
            if candidate.approach == active.approach {
                active.lane = candidate.lane.clone();
            }
        }

        let cleared = self
            .detector
            .is_cleared(&active.vehicle_id, ctx.vehicles, registry);
        if cleared {
            if self.state.clearance_at.is_none() {
                self.state.clearance_at = Some(ctx.now);
                log::info!(
                    "[Preemption] t={} emergency {} cleared, holding green {}s",
                    ctx.now,
                    active.vehicle_id,
                    self.extra_clear_time
                );
            }
        } else if self.state.clearance_at.take().is_some() {
            log::warn!(
                "[Preemption] t={} emergency {} back on incoming lane, hold cancelled",
                ctx.now,
                active.vehicle_id
            );
        }

        match self.state.clearance_at {
            Some(cleared_at) if ctx.now >= cleared_at + u64::from(self.extra_clear_time) => {
                self.release(ctx.now);
                Transition::Released
            }
            _ => Transition::Stay,
        }
    }

    /// Log-only tracking while preemption is disabled.
    fn monitor(&mut self, ctx: TickContext<'_>, registry: &ApproachRegistry) {
        if let Some(active) = self.state.active_emergency.as_mut() {
            if self
                .detector
                .is_cleared(&active.vehicle_id, ctx.vehicles, registry)
            {
                self.finish_event(ctx.now);
            } else if let Some(candidate) = ctx.candidate.filter(|c| c.vehicle_id == active.vehicle_id) {
                active.distance = candidate.distance;
            }
        }
        if self.state.active_emergency.is_none() {
            if let Some(candidate) = ctx.candidate {
                log::info!(
                    "[Monitor] t={} emergency {} detected on {} at {:.1}m",
                    ctx.now,
                    candidate.vehicle_id,
                    candidate.approach,
                    candidate.distance
                );
                self.state.active_emergency = Some(candidate.clone());
            }
        }
    }

    fn active_is_well_formed(&self, registry: &ApproachRegistry) -> bool {
        self.state
            .active_emergency
            .as_ref()
            .is_some_and(|r| r.is_well_formed(registry))
    }

    fn enter(&mut self, mode: SignalState, now: u64, deadline: Option<u64>) {
        self.state.mode = mode;
        self.state.entered_at = now;
        self.state.state_deadline = deadline;
        self.state.clearance_at = None;
    }

    fn release(&mut self, now: u64) {
        let held = now.saturating_sub(self.state.entered_at);
        self.finish_event(now);
        self.enter(SignalState::Normal, now, None);
        log::info!("[Preemption] t={} EMERGENCY -> NORMAL after {}s", now, held);
    }

    fn finish_event(&mut self, now: u64) {
        if let Some(done) = self.state.active_emergency.take() {
            log::info!(
                "[Emergency] t={} vehicle {} on {} done: detected t={}, green t={:?}, wait {:?}s",
                now,
                done.vehicle_id,
                done.approach,
                done.detected_at,
                done.first_green_at,
                done.wait()
            );
            self.history.push(done);
        }
        self.state.clearance_at = None;
    }

    fn recover(&mut self, now: u64) -> Transition {
        log::warn!(
            "[Preemption] t={} inconsistent emergency record {:?}, resetting to NORMAL",
            now,
            self.state.active_emergency
        );
        self.state.active_emergency = None;
        self.enter(SignalState::Normal, now, None);
        Transition::Recovered
    }
}

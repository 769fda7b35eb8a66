use crate::config::ControllerConfig;
use crate::error::{ConfigError, ControlError, SourceError};
use crate::intersection::approach_registry::{Approach, ApproachId, ApproachRegistry, Phase};
use crate::intersection::queue_sampler::queue_length;
use crate::simulation_engine::traffic_source::TrafficSource;

/// Green/yellow timing shared by every service cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub g_min: u32,
    /// `None` disables gap-out.
    pub gap_time: Option<u32>,
    pub yellow_time: u32,
}

impl PhaseTiming {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            g_min: config.g_min,
            gap_time: config.gap_time,
            yellow_time: config.yellow_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Green,
    Yellow,
    Done,
}

/// One green+yellow cycle for an approach, advanced one tick at a time.
///
/// Per tick the caller does `actuate`, advances the source, then
/// `complete_tick` with the served approach's queue observed after the tick.
#[derive(Debug, Clone)]
pub struct PhaseRunner {
    approach: ApproachId,
    green_phase: usize,
    yellow_phase: usize,
    target_green: u32,
    timing: PhaseTiming,
    stage: Stage,
    stage_actuated: bool,
    green_used: u32,
    yellow_used: u32,
    empty_streak: u32,
    gapped_out: bool,
}

impl PhaseRunner {
    pub fn new(approach: &Approach, target_green: u32, timing: PhaseTiming) -> Self {
        Self {
            approach: approach.id,
            green_phase: approach.green_phase,
            yellow_phase: approach.yellow_phase,
            target_green,
            timing,
            stage: if target_green == 0 { Stage::Yellow } else { Stage::Green },
            stage_actuated: false,
            green_used: 0,
            yellow_used: 0,
            empty_streak: 0,
            gapped_out: false,
        }
    }

    /// Yellow only: closes a green left standing by something other than this runner.
    pub fn exit_interval(approach: &Approach, timing: PhaseTiming) -> Self {
        Self::new(approach, 0, timing)
    }

    pub fn approach(&self) -> ApproachId {
        self.approach
    }

    pub fn target_green(&self) -> u32 {
        self.target_green
    }

    pub fn in_green(&self) -> bool {
        self.stage == Stage::Green
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn gapped_out(&self) -> bool {
        self.gapped_out
    }

    pub fn green_used(&self) -> u32 {
        self.green_used
    }

    /// Seconds consumed so far, green plus yellow.
    pub fn elapsed(&self) -> u32 {
        self.green_used + self.yellow_used
    }

    /// Phase in effect for the coming tick, `None` once the cycle is over.
    pub fn current_phase(&self) -> Option<Phase> {
        match self.stage {
            Stage::Green => Some(Phase::Green(self.approach)),
            Stage::Yellow => Some(Phase::Yellow(self.approach)),
            Stage::Done => None,
        }
    }

    /// Issues the stage's phase command on the first tick of each stage.
    pub fn actuate<S: TrafficSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<Option<Phase>, SourceError> {
        if !self.stage_actuated {
            match self.stage {
                Stage::Green => {
                    source.set_phase(self.green_phase)?;
                    // upper bound; gap-out may end it sooner
                    source.set_phase_duration(self.green_phase, self.target_green)?;
                }
                Stage::Yellow => {
                    source.set_phase(self.yellow_phase)?;
                    source.set_phase_duration(self.yellow_phase, self.timing.yellow_time)?;
                }
                Stage::Done => {}
            }
            self.stage_actuated = true;
        }
        Ok(self.current_phase())
    }

    /// Bookkeeping once the tick has been simulated.
    pub fn complete_tick(&mut self, served_queue: u32) {
        match self.stage {
            Stage::Green => {
                self.green_used += 1;
                if self.green_used >= self.timing.g_min {
                    if served_queue == 0 {
                        self.empty_streak += 1;
                    } else {
                        self.empty_streak = 0;
                    }
                }
                let gap = self
                    .timing
                    .gap_time
                    .is_some_and(|gap| self.empty_streak >= gap);
                if gap {
                    self.gapped_out = true;
                    log::debug!(
                        "Gap-out on {} after {}s of {}s green",
                        self.approach,
                        self.green_used,
                        self.target_green
                    );
                }
                if gap || self.green_used >= self.target_green {
                    self.enter(Stage::Yellow);
                }
            }
            Stage::Yellow => {
                self.yellow_used += 1;
                if self.yellow_used >= self.timing.yellow_time {
                    self.enter(Stage::Done);
                }
            }
            Stage::Done => {}
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.stage_actuated = false;
    }
}

/// Simulated-time budget shared by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    pub now: u64,
    pub end: u64,
}

impl TickBudget {
    pub fn new(end: u64) -> Self {
        Self { now: 0, end }
    }

    pub fn exhausted(&self) -> bool {
        self.now >= self.end
    }
}

/// Runs a whole green (with gap-out) and yellow for `approach`, ticking the
/// source once per second. Returns the seconds consumed; stops early without
/// error when the budget runs out.
pub fn run_green_then_yellow<S: TrafficSource + ?Sized>(
    source: &mut S,
    registry: &ApproachRegistry,
    approach: ApproachId,
    target_green: u32,
    timing: PhaseTiming,
    budget: &mut TickBudget,
) -> Result<u32, ControlError> {
    let served = registry
        .get(approach)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "approach",
            value: approach.to_string(),
        })?;
    let mut runner = PhaseRunner::new(served, target_green, timing);

    while !runner.is_done() && !budget.exhausted() {
        let was_green = runner.in_green();
        runner.actuate(source)?;
        source.advance()?;
        budget.now += 1;
        let served_queue = if was_green {
            queue_length(source, served)?
        } else {
            0
        };
        runner.complete_tick(served_queue);
    }
    Ok(runner.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north() -> Approach {
        Approach {
            id: ApproachId::North,
            lanes: vec!["north_in_0".to_string()],
            green_phase: 0,
            yellow_phase: 1,
        }
    }

    fn timing(gap_time: Option<u32>) -> PhaseTiming {
        PhaseTiming {
            g_min: 10,
            gap_time,
            yellow_time: 3,
        }
    }

    fn drive(runner: &mut PhaseRunner, queues: impl Fn(u32) -> u32) -> Vec<Phase> {
        let mut phases = Vec::new();
        let mut t = 0;
        while let Some(phase) = runner.current_phase() {
            phases.push(phase);
            runner.complete_tick(queues(t));
            t += 1;
            assert!(t < 1000);
        }
        phases
    }

    #[test]
    fn runs_full_green_when_demand_persists() {
        let mut runner = PhaseRunner::new(&north(), 20, timing(Some(3)));
        let phases = drive(&mut runner, |_| 4);
        assert_eq!(runner.elapsed(), 23);
        assert!(!runner.gapped_out());
        assert_eq!(phases.iter().filter(|p| **p == Phase::Green(ApproachId::North)).count(), 20);
        assert_eq!(phases.last(), Some(&Phase::Yellow(ApproachId::North)));
    }

    #[test]
    fn gaps_out_after_min_green() {
        let mut runner = PhaseRunner::new(&north(), 30, timing(Some(3)));
        drive(&mut runner, |_| 0);
        // streak counts from the g_min-th second: 10, 11, 12
        assert_eq!(runner.green_used(), 12);
        assert!(runner.gapped_out());
        assert_eq!(runner.elapsed(), 15);
    }

    #[test]
    fn queue_resets_empty_streak() {
        let mut runner = PhaseRunner::new(&north(), 30, timing(Some(3)));
        // green second t+1 observes queue; a car shows up on the 12th second
        drive(&mut runner, |t| if t == 11 { 1 } else { 0 });
        assert_eq!(runner.green_used(), 15);
    }

    #[test]
    fn gap_out_disabled_runs_to_target() {
        let mut runner = PhaseRunner::new(&north(), 25, timing(None));
        drive(&mut runner, |_| 0);
        assert_eq!(runner.green_used(), 25);
        assert!(!runner.gapped_out());
    }

    #[test]
    fn exit_interval_is_yellow_only() {
        let mut runner = PhaseRunner::exit_interval(&north(), timing(Some(3)));
        let phases = drive(&mut runner, |_| 0);
        assert_eq!(phases, vec![Phase::Yellow(ApproachId::North); 3]);
        assert_eq!(runner.green_used(), 0);
    }
}

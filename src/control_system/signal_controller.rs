use crate::config::{ControllerConfig, SelectionMode};
use crate::control_system::fairness_tracker::FairnessTracker;
use crate::control_system::green_time_allocator::GreenTimeAllocator;
use crate::control_system::phase_runner::{PhaseRunner, PhaseTiming};
use crate::control_system::preemption::{
    PreemptionStateMachine, SignalState, TickContext, Transition,
};
use crate::error::{ConfigError, ControlError};
use crate::intersection::approach_registry::{ApproachId, ApproachRegistry, Phase};
use crate::intersection::queue_sampler::{sample_queues, QueueSnapshot};
use crate::monitoring::metrics::{MetricsRecord, MetricsSink};
use crate::simulation_engine::traffic_source::{TickCounts, TrafficSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Tick budget spent; no tick was simulated.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleKind {
    /// Green + yellow chosen by normal scheduling, charged to fairness.
    Service,
    /// Yellow closing a green left over from preemption.
    ExitInterval,
}

#[derive(Debug, Clone)]
struct Cycle {
    runner: PhaseRunner,
    kind: CycleKind,
}

/// What was put on the signal heads this tick.
struct Actuation {
    phase: Phase,
    served_dir: String,
    green_time: u32,
}

/// Drives one intersection, one simulated second per `step`.
pub struct SignalController<S: TrafficSource, M: MetricsSink> {
    config: ControllerConfig,
    registry: ApproachRegistry,
    source: S,
    sink: M,
    allocator: GreenTimeAllocator,
    fairness: FairnessTracker,
    machine: PreemptionStateMachine,
    timing: PhaseTiming,
    cycle: Option<Cycle>,
    rotation: usize,
    last_phase: Option<Phase>,
    tick: u64,
}

impl<S: TrafficSource, M: MetricsSink> SignalController<S, M> {
    pub fn new(config: ControllerConfig, source: S, sink: M) -> Result<Self, ControlError> {
        let registry = ApproachRegistry::from_config(&config)?;
        let fairness = FairnessTracker::new(registry.ids(), u64::from(config.max_wait));
        Ok(Self {
            allocator: GreenTimeAllocator::from_config(&config),
            machine: PreemptionStateMachine::from_config(&config),
            timing: PhaseTiming::from_config(&config),
            fairness,
            registry,
            config,
            source,
            sink,
            cycle: None,
            rotation: 0,
            last_phase: None,
            tick: 0,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ApproachRegistry {
        &self.registry
    }

    pub fn state(&self) -> SignalState {
        self.machine.mode()
    }

    pub fn machine(&self) -> &PreemptionStateMachine {
        &self.machine
    }

    pub fn fairness(&self) -> &FairnessTracker {
        &self.fairness
    }

    /// Ticks simulated so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn last_phase(&self) -> Option<Phase> {
        self.last_phase
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &M {
        &self.sink
    }

    pub fn into_parts(self) -> (S, M) {
        (self.source, self.sink)
    }

    /// Runs until the tick budget is spent. Returns the number of ticks simulated.
    pub fn run(&mut self) -> Result<u64, ControlError> {
        log::info!(
            "[Controller] starting: {} approaches, {:?} policy, {:?} selection, preemption {}",
            self.registry.approaches().len(),
            self.config.allocation_policy,
            self.config.selection,
            if self.config.preemption_enabled { "on" } else { "log-only" }
        );
        while self.step()? == StepOutcome::Continue {}
        log::info!(
            "[Controller] finished after {}s, {} emergency events",
            self.tick,
            self.machine.history().len()
        );
        Ok(self.tick)
    }

    /// One simulated second: read, decide, actuate, advance, record.
    pub fn step(&mut self) -> Result<StepOutcome, ControlError> {
        if self.tick >= self.config.run_seconds {
            return Ok(StepOutcome::Finished);
        }
        let now = self.tick;

        // queues as seen before actuation; this is what the metrics row reports
        let snapshot = sample_queues(&mut self.source, &self.registry)?;
        let vehicles = self.source.vehicles()?;
        let candidate = self
            .machine
            .detector()
            .find_closest(&vehicles, &self.registry, now);
        let ctx = TickContext {
            now,
            candidate: candidate.as_ref(),
            current_green: self.last_phase.and_then(|p| p.green_approach()),
            vehicles: &vehicles,
        };
        if self.machine.evaluate(ctx, &self.registry) == Transition::Detected {
            self.abort_cycle(now);
        }

        // exactly one branch actuates per tick
        let actuation = match self.machine.mode() {
            SignalState::Normal => self.normal_tick(now, &snapshot)?,
            SignalState::AllRed => self.all_red_tick()?,
            SignalState::Emergency => self.emergency_tick()?,
        };
        self.last_phase = Some(actuation.phase);
        self.machine.note_actuated(actuation.phase, now);

        let counts = self.source.advance()?;
        self.tick += 1;

        // gap-out looks at the queue left after the tick
        let observed = sample_queues(&mut self.source, &self.registry)?;
        self.complete_cycle_tick(now, &observed);
        self.record(now, &actuation, counts, &snapshot);
        Ok(StepOutcome::Continue)
    }

    fn normal_tick(&mut self, now: u64, snapshot: &QueueSnapshot) -> Result<Actuation, ControlError> {
        // a new cycle is planned only once the previous one has finished
        let cycle = match self.cycle.take() {
            Some(cycle) => cycle,
            None => self.plan_cycle(now, snapshot)?,
        };
        let cycle = self.cycle.insert(cycle);
        let phase = cycle
            .runner
            .actuate(&mut self.source)?
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "cycle",
                value: format!("finished cycle for {}", cycle.runner.approach()),
            })?;
        let (served_dir, green_time) = match (cycle.kind, phase) {
            (CycleKind::Service, Phase::Green(id)) => (id.code().to_string(), cycle.runner.target_green()),
            (_, phase) => (phase.label(), self.config.yellow_time),
        };
        Ok(Actuation {
            phase,
            served_dir,
            green_time,
        })
    }

    /// Picks the next approach and its green. A green still standing for a
    /// different approach gets its yellow first.
    fn plan_cycle(&mut self, now: u64, snapshot: &QueueSnapshot) -> Result<Cycle, ControlError> {
        let chosen = self.choose(snapshot).ok_or(ConfigError::NoApproaches)?;

        if let Some(Phase::Green(open)) = self.last_phase {
            if open != chosen {
                let approach = self.registry.get(open).ok_or_else(|| ConfigError::InvalidValue {
                    name: "approach",
                    value: open.to_string(),
                })?;
                log::debug!("[Controller] t={} closing {} green before serving {}", now, open, chosen);
                return Ok(Cycle {
                    runner: PhaseRunner::exit_interval(approach, self.timing),
                    kind: CycleKind::ExitInterval,
                });
            }
        }

        let approach = self.registry.get(chosen).ok_or_else(|| ConfigError::InvalidValue {
            name: "approach",
            value: chosen.to_string(),
        })?;
        let green = self.allocator.allocate(chosen, snapshot);
        if self.config.selection == SelectionMode::Rotation {
            self.rotation += 1;
        }
        log::info!(
            "[Controller] t={} serve {} queue={} green={}s waited={}s{}",
            now,
            chosen,
            snapshot.get(chosen),
            green,
            self.fairness.waited(chosen),
            if self.fairness.is_starving(chosen) { " (starvation override)" } else { "" }
        );
        Ok(Cycle {
            runner: PhaseRunner::new(approach, green, self.timing),
            kind: CycleKind::Service,
        })
    }

    fn choose(&self, snapshot: &QueueSnapshot) -> Option<ApproachId> {
        match self.config.selection {
            SelectionMode::Adaptive => self.fairness.select(snapshot),
            SelectionMode::Rotation => {
                let approaches = self.registry.approaches();
                if approaches.is_empty() {
                    return None;
                }
                Some(approaches[self.rotation % approaches.len()].id)
            }
        }
    }

    fn all_red_tick(&mut self) -> Result<Actuation, ControlError> {
        self.hold(Phase::AllRed)?;
        Ok(Actuation {
            phase: Phase::AllRed,
            served_dir: Phase::AllRed.label(),
            green_time: self.config.all_red_time,
        })
    }

    fn emergency_tick(&mut self) -> Result<Actuation, ControlError> {
        let Some(approach) = self.machine.active_emergency().map(|r| r.approach) else {
            return self.all_red_tick();
        };
        let phase = Phase::Green(approach);
        // reasserted every tick so the actuator never moves on by itself
        self.hold(phase)?;
        Ok(Actuation {
            phase,
            served_dir: format!("EMG_{}", approach.code()),
            green_time: 1,
        })
    }

    /// Actuates `phase` for a single second.
    fn hold(&mut self, phase: Phase) -> Result<(), ControlError> {
        let index = self
            .registry
            .phase_index(phase)
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "phase",
                value: phase.label(),
            })?;
        self.source.set_phase(index)?;
        self.source.set_phase_duration(index, 1)?;
        Ok(())
    }

    /// Preemption cuts the running cycle short; time already spent counts as service.
    fn abort_cycle(&mut self, now: u64) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        let elapsed = cycle.runner.elapsed();
        // exit intervals are never charged
        if cycle.kind == CycleKind::Service && elapsed > 0 {
            self.fairness.advance(cycle.runner.approach(), u64::from(elapsed));
        }
        log::info!(
            "[Controller] t={} preempted {} cycle after {}s",
            now,
            cycle.runner.approach(),
            elapsed
        );
    }

    fn complete_cycle_tick(&mut self, now: u64, observed: &QueueSnapshot) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };
        let served_queue = if cycle.runner.in_green() {
            observed.get(cycle.runner.approach())
        } else {
            0
        };
        cycle.runner.complete_tick(served_queue);
        if !cycle.runner.is_done() {
            return;
        }
        if let Some(done) = self.cycle.take() {
            if done.kind == CycleKind::Service {
                self.fairness
                    .advance(done.runner.approach(), u64::from(done.runner.elapsed()));
                log::debug!(
                    "[Controller] t={} {} cycle done: green {}s of {}s{}",
                    now,
                    done.runner.approach(),
                    done.runner.green_used(),
                    done.runner.target_green(),
                    if done.runner.gapped_out() { " (gap-out)" } else { "" }
                );
            }
        }
    }

    fn record(&mut self, now: u64, actuation: &Actuation, counts: TickCounts, queues: &QueueSnapshot) {
        let mut record = MetricsRecord {
            time: now,
            phase: self.registry.phase_index(actuation.phase),
            phase_label: actuation.phase.label(),
            state: self.machine.mode(),
            served_dir: actuation.served_dir.clone(),
            green_time: actuation.green_time,
            departed: counts.departed,
            arrived: counts.arrived,
            q_n: 0,
            q_e: 0,
            q_s: 0,
            q_w: 0,
            total_queue: 0,
            emg_active: false,
            emg_id: None,
            emg_dir: None,
            emg_dist: None,
            emg_detect_t: None,
            emg_green_t: None,
            emg_wait_time: None,
        };
        record.set_queues(queues);
        record.set_emergency(self.machine.active_emergency());
        self.sink.emit(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::simulation_engine::traffic_source::VehicleObservation;
    use std::collections::HashMap;

    /// Constant per-lane queues; records every actuation.
    #[derive(Default)]
    struct StaticSource {
        halting: HashMap<String, u32>,
        phases: Vec<usize>,
        ticks: u64,
    }

    impl TrafficSource for StaticSource {
        fn halting_count(&mut self, lane: &str) -> Result<u32, SourceError> {
            Ok(self.halting.get(lane).copied().unwrap_or(0))
        }
        fn vehicles(&mut self) -> Result<Vec<VehicleObservation>, SourceError> {
            Ok(Vec::new())
        }
        fn set_phase(&mut self, phase: usize) -> Result<(), SourceError> {
            self.phases.push(phase);
            Ok(())
        }
        fn set_phase_duration(&mut self, _phase: usize, _seconds: u32) -> Result<(), SourceError> {
            Ok(())
        }
        fn advance(&mut self) -> Result<TickCounts, SourceError> {
            self.ticks += 1;
            Ok(TickCounts::default())
        }
    }

    /// North queue grows by one car per simulated second.
    #[derive(Default)]
    struct GrowingSource {
        ticks: u32,
    }

    impl TrafficSource for GrowingSource {
        fn halting_count(&mut self, lane: &str) -> Result<u32, SourceError> {
            Ok(if lane == "north_in_0" { self.ticks } else { 0 })
        }
        fn vehicles(&mut self) -> Result<Vec<VehicleObservation>, SourceError> {
            Ok(Vec::new())
        }
        fn set_phase(&mut self, _phase: usize) -> Result<(), SourceError> {
            Ok(())
        }
        fn set_phase_duration(&mut self, _phase: usize, _seconds: u32) -> Result<(), SourceError> {
            Ok(())
        }
        fn advance(&mut self) -> Result<TickCounts, SourceError> {
            self.ticks += 1;
            Ok(TickCounts::default())
        }
    }

    struct Broken;

    impl TrafficSource for Broken {
        fn halting_count(&mut self, _lane: &str) -> Result<u32, SourceError> {
            Err(SourceError::Disconnected("socket closed".to_string()))
        }
        fn vehicles(&mut self) -> Result<Vec<VehicleObservation>, SourceError> {
            Ok(Vec::new())
        }
        fn set_phase(&mut self, _phase: usize) -> Result<(), SourceError> {
            Ok(())
        }
        fn set_phase_duration(&mut self, _phase: usize, _seconds: u32) -> Result<(), SourceError> {
            Ok(())
        }
        fn advance(&mut self) -> Result<TickCounts, SourceError> {
            Ok(TickCounts::default())
        }
    }

    fn config(run_seconds: u64) -> ControllerConfig {
        ControllerConfig {
            run_seconds,
            ..Default::default()
        }
    }

    #[test]
    fn one_record_per_tick_until_budget() {
        let mut controller =
            SignalController::new(config(40), StaticSource::default(), Vec::new()).unwrap();
        assert_eq!(controller.run().unwrap(), 40);
        assert_eq!(controller.step().unwrap(), StepOutcome::Finished);
        let (source, records) = controller.into_parts();
        assert_eq!(source.ticks, 40);
        assert_eq!(records.len(), 40);
        assert!(records.iter().enumerate().all(|(i, r)| r.time == i as u64));
    }

    #[test]
    fn records_carry_queues_seen_before_the_tick() {
        let mut controller =
            SignalController::new(config(3), GrowingSource::default(), Vec::new()).unwrap();
        controller.run().unwrap();
        let (_, records) = controller.into_parts();
        let queues: Vec<(u64, u32)> = records.iter().map(|r| (r.time, r.q_n)).collect();
        assert_eq!(queues, vec![(0, 0), (1, 1), (2, 2)]);
        assert!(records.iter().all(|r| r.total_queue == r.q_n));
    }

    #[test]
    fn empty_intersection_waits_for_starvation() {
        // all queues tie at zero, so N keeps winning until the others starve
        let mut controller =
            SignalController::new(config(140), StaticSource::default(), Vec::new()).unwrap();
        controller.run().unwrap();
        let (_, records) = controller.into_parts();
        // each cycle gaps out after 12s green + 3s yellow
        for t in [0, 15, 30, 45, 60, 75] {
            assert_eq!(records[t].served_dir, "N", "t={}", t);
        }
        assert_eq!(records[12].served_dir, "N_Y");
        assert_eq!(records[90].served_dir, "E");
        assert_eq!(records[105].served_dir, "S");
        assert_eq!(records[120].served_dir, "W");
        assert_eq!(records[135].served_dir, "N");
        assert!(records.iter().all(|r| r.green_time == 10 || r.green_time == 3));
    }

    #[test]
    fn rotation_serves_in_canonical_order() {
        let cfg = ControllerConfig {
            selection: SelectionMode::Rotation,
            run_seconds: 60,
            ..Default::default()
        };
        let mut halting = HashMap::new();
        halting.insert("west_in_0".to_string(), 20);
        let source = StaticSource {
            halting,
            ..Default::default()
        };
        let mut controller = SignalController::new(cfg, source, Vec::new()).unwrap();
        controller.run().unwrap();
        let (source, _) = controller.into_parts();
        let greens: Vec<usize> = source.phases.iter().copied().filter(|p| p % 2 == 0).collect();
        assert_eq!(&greens[..4], &[0, 2, 4, 6]);
    }

    #[test]
    fn source_failure_aborts_the_run() {
        let mut controller = SignalController::new(config(10), Broken, Vec::new()).unwrap();
        let err = controller.run().unwrap_err();
        assert!(matches!(err, ControlError::Source(SourceError::Disconnected(_))));
        assert!(controller.sink().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = ControllerConfig {
            approaches: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            SignalController::new(cfg, StaticSource::default(), Vec::new()),
            Err(ControlError::Config(ConfigError::NoApproaches))
        ));
    }
}

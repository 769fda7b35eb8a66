// simulation.rs
use crate::error::SourceError;
use crate::intersection::approach_registry::{ApproachId, ApproachRegistry, Phase};
use crate::simulation_engine::traffic_source::{TickCounts, TrafficSource, VehicleObservation};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Bumper-to-bumper spacing kept while queueing (meters).
const MIN_GAP: f64 = 2.5;
/// Below this speed (m/s) a vehicle counts as halting.
const HALTING_SPEED: f64 = 0.1;
/// Length of the outgoing leg before a vehicle leaves the network (meters).
const OUTGOING_LENGTH: f64 = 100.0;

/// Different types of vehicles in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

impl VehicleType {
    pub fn length(self) -> f64 {
        match self {
            VehicleType::Car => 4.5,
            VehicleType::Bus => 12.0,
            VehicleType::Truck => 16.0,
            VehicleType::EmergencyVan => 5.5,
        }
    }

    pub fn is_emergency(self) -> bool {
        self == VehicleType::EmergencyVan
    }

    /// Free-flow speed range in km/h.
    fn speed_range(self) -> std::ops::Range<f64> {
        match self {
            VehicleType::Car => 40.0..60.0,
            VehicleType::Bus => 30.0..45.0,
            VehicleType::Truck => 30.0..40.0,
            VehicleType::EmergencyVan => 50.0..70.0,
        }
    }
}

/// Demand and emergency schedule of the built-in simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    /// Probability per second that a vehicle enters each lane of an approach.
    pub arrival_rates: BTreeMap<ApproachId, f64>,
    /// (tick, approach) at which an emergency van is sent in.
    pub emergency_schedule: Vec<(u64, ApproachId)>,
    pub lane_length: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            arrival_rates: BTreeMap::from([
                (ApproachId::North, 0.12),
                (ApproachId::East, 0.08),
                (ApproachId::South, 0.10),
                (ApproachId::West, 0.05),
            ]),
            emergency_schedule: vec![(120, ApproachId::East), (480, ApproachId::West)],
            lane_length: 300.0,
        }
    }
}

#[derive(Debug, Clone)]
struct SimVehicle {
    id: String,
    vehicle_type: VehicleType,
    /// Free-flow speed, m/s.
    max_speed: f64,
    /// Meters to the stop line.
    position: f64,
    /// Distance covered last tick, m/s.
    speed: f64,
}

#[derive(Debug, Clone)]
struct IncomingLane {
    name: String,
    approach: ApproachId,
    out_lane: String,
    /// Front of the queue first.
    vehicles: VecDeque<SimVehicle>,
}

#[derive(Debug, Clone)]
struct Outbound {
    vehicle: SimVehicle,
    lane: String,
    remaining: f64,
}

/// Stochastic single-intersection simulator: straight-through movements only,
/// one vehicle per lane may cross the stop line each second on green.
pub struct IntersectionSim {
    registry: ApproachRegistry,
    config: SimConfig,
    rng: SmallRng,
    lanes: Vec<IncomingLane>,
    outbound: Vec<Outbound>,
    pending_emergencies: Vec<(u64, ApproachId)>,
    phase: Option<Phase>,
    phase_duration: u32,
    tick: u64,
    next_vehicle_id: u64,
}

fn opposite(id: ApproachId) -> ApproachId {
    match id {
        ApproachId::North => ApproachId::South,
        ApproachId::East => ApproachId::West,
        ApproachId::South => ApproachId::North,
        ApproachId::West => ApproachId::East,
    }
}

impl IntersectionSim {
    pub fn new(registry: ApproachRegistry, config: SimConfig) -> Self {
        let lanes = registry
            .approaches()
            .iter()
            .flat_map(|approach| {
                approach.lanes.iter().enumerate().map(|(i, lane)| IncomingLane {
                    name: lane.clone(),
                    approach: approach.id,
                    out_lane: format!("{}_out_{}", opposite(approach.id).lane_prefix(), i),
                    vehicles: VecDeque::new(),
                })
            })
            .collect();
        let mut pending_emergencies = config.emergency_schedule.clone();
        pending_emergencies.sort();
        Self {
            rng: SmallRng::seed_from_u64(config.seed),
            registry,
            config,
            lanes,
            outbound: Vec::new(),
            pending_emergencies,
            phase: None,
            phase_duration: 0,
            tick: 0,
            next_vehicle_id: 1,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn phase_duration(&self) -> u32 {
        self.phase_duration
    }

    /// Puts a vehicle at the back of `lane`. Returns its id, or `None` when
    /// the lane entry is blocked.
    pub fn spawn(&mut self, lane: &str, vehicle_type: VehicleType) -> Result<Option<String>, SourceError> {
        let idx = self
            .lanes
            .iter()
            .position(|l| l.name == lane)
            .ok_or_else(|| SourceError::UnknownLane(lane.to_string()))?;
        Ok(self.spawn_at(idx, vehicle_type))
    }

    fn spawn_at(&mut self, idx: usize, vehicle_type: VehicleType) -> Option<String> {
        let lane_length = self.config.lane_length;
        let lane = &self.lanes[idx];
        if let Some(last) = lane.vehicles.back() {
            if last.position + last.vehicle_type.length() + MIN_GAP > lane_length {
                return None;
            }
        }
        let prefix = if vehicle_type.is_emergency() { "amb" } else { "veh" };
        let id = format!("{}_{}", prefix, self.next_vehicle_id);
        self.next_vehicle_id += 1;
        let max_speed = self.rng.random_range(vehicle_type.speed_range()) / 3.6;
        self.lanes[idx].vehicles.push_back(SimVehicle {
            id: id.clone(),
            vehicle_type,
            max_speed,
            position: lane_length,
            speed: max_speed,
        });
        Some(id)
    }

    fn random_type(&mut self) -> VehicleType {
        let rand_val: f64 = self.rng.random_range(0.0..1.0);
        if rand_val < 0.80 {
            VehicleType::Car
        } else if rand_val < 0.92 {
            VehicleType::Bus
        } else {
            VehicleType::Truck
        }
    }

    fn green_approach(&self) -> Option<ApproachId> {
        self.phase.and_then(|p| p.green_approach())
    }

    /// Moves every queued vehicle; returns those that crossed the stop line.
    fn move_incoming(&mut self) -> Vec<Outbound> {
        let green = self.green_approach();
        let mut crossed = Vec::new();
        for lane in self.lanes.iter_mut() {
            if green == Some(lane.approach) {
                let head_crosses = lane
                    .vehicles
                    .front()
                    .is_some_and(|v| v.position - v.max_speed <= 0.0);
                if head_crosses {
                    if let Some(vehicle) = lane.vehicles.pop_front() {
                        crossed.push(Outbound {
                            vehicle,
                            lane: lane.out_lane.clone(),
                            remaining: OUTGOING_LENGTH,
                        });
                    }
                }
            }
            // car-following: never closer than the vehicle ahead allows
            let mut limit = 0.0f64;
            for v in lane.vehicles.iter_mut() {
                let next = (v.position - v.max_speed).max(limit);
                v.speed = v.position - next;
                v.position = next;
                limit = next + v.vehicle_type.length() + MIN_GAP;
            }
        }
        crossed
    }

    /// Moves vehicles on the outgoing legs; returns how many left the network.
    fn move_outbound(&mut self) -> u32 {
        let before = self.outbound.len();
        for out in self.outbound.iter_mut() {
            out.remaining -= out.vehicle.max_speed;
            out.vehicle.speed = out.vehicle.max_speed;
        }
        self.outbound.retain(|o| o.remaining > 0.0);
        (before - self.outbound.len()) as u32
    }

    fn spawn_arrivals(&mut self) -> u32 {
        let mut departed = 0;
        for idx in 0..self.lanes.len() {
            let rate = self
                .config
                .arrival_rates
                .get(&self.lanes[idx].approach)
                .copied()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            if self.rng.random_bool(rate) {
                let vehicle_type = self.random_type();
                if self.spawn_at(idx, vehicle_type).is_some() {
                    departed += 1;
                }
            }
        }

        let due: Vec<(u64, ApproachId)> = self
            .pending_emergencies
            .iter()
            .copied()
            .filter(|(t, _)| *t <= self.tick)
            .collect();
        for (t, approach) in due {
            let Some(idx) = self.lanes.iter().position(|l| l.approach == approach) else {
                self.pending_emergencies.retain(|e| *e != (t, approach));
                continue;
            };
            // a blocked entry keeps the van pending for the next tick
            if let Some(id) = self.spawn_at(idx, VehicleType::EmergencyVan) {
                log::info!("[Sim] t={} {} enters {}", self.tick, id, self.lanes[idx].name);
                if let Some(pos) = self.pending_emergencies.iter().position(|e| *e == (t, approach)) {
                    self.pending_emergencies.remove(pos);
                }
                departed += 1;
            }
        }
        departed
    }
}

impl TrafficSource for IntersectionSim {
    fn halting_count(&mut self, lane: &str) -> Result<u32, SourceError> {
        let lane = self
            .lanes
            .iter()
            .find(|l| l.name == lane)
            .ok_or_else(|| SourceError::UnknownLane(lane.to_string()))?;
        Ok(lane
            .vehicles
            .iter()
            .filter(|v| v.speed < HALTING_SPEED)
            .count() as u32)
    }

    fn vehicles(&mut self) -> Result<Vec<VehicleObservation>, SourceError> {
        let incoming = self.lanes.iter().flat_map(|lane| {
            lane.vehicles.iter().map(|v| VehicleObservation {
                id: v.id.clone(),
                lane: Some(lane.name.clone()),
                distance_to_stop_line: v.position,
                is_emergency: v.vehicle_type.is_emergency(),
            })
        });
        let outgoing = self.outbound.iter().map(|o| VehicleObservation {
            id: o.vehicle.id.clone(),
            lane: Some(o.lane.clone()),
            distance_to_stop_line: o.remaining,
            is_emergency: o.vehicle.vehicle_type.is_emergency(),
        });
        Ok(incoming.chain(outgoing).collect())
    }

    fn set_phase(&mut self, phase: usize) -> Result<(), SourceError> {
        self.phase = Some(
            self.registry
                .phase_at(phase)
                .ok_or(SourceError::UnknownPhase(phase))?,
        );
        Ok(())
    }

    fn set_phase_duration(&mut self, phase: usize, seconds: u32) -> Result<(), SourceError> {
        if self.registry.phase_at(phase).is_none() {
            return Err(SourceError::UnknownPhase(phase));
        }
        self.phase_duration = seconds;
        Ok(())
    }

    fn advance(&mut self) -> Result<TickCounts, SourceError> {
        let crossed = self.move_incoming();
        let arrived = self.move_outbound();
        self.outbound.extend(crossed);
        let departed = self.spawn_arrivals();
        self.tick += 1;
        Ok(TickCounts { departed, arrived })
    }
}

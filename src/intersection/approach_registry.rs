use crate::config::ControllerConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One traffic direction into the intersection.
/// Declaration order is the canonical order used for every tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApproachId {
    #[serde(rename = "N")]
    North,
    #[serde(rename = "E")]
    East,
    #[serde(rename = "S")]
    South,
    #[serde(rename = "W")]
    West,
}

impl ApproachId {
    pub const CANONICAL: [ApproachId; 4] = [
        ApproachId::North,
        ApproachId::East,
        ApproachId::South,
        ApproachId::West,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ApproachId::North => "N",
            ApproachId::East => "E",
            ApproachId::South => "S",
            ApproachId::West => "W",
        }
    }

    pub fn lane_prefix(&self) -> &'static str {
        match self {
            ApproachId::North => "north",
            ApproachId::East => "east",
            ApproachId::South => "south",
            ApproachId::West => "west",
        }
    }
}

impl fmt::Display for ApproachId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A signal-head configuration the actuator can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Green(ApproachId),
    Yellow(ApproachId),
    AllRed,
    AllYellow,
}

impl Phase {
    pub fn label(&self) -> String {
        match self {
            Phase::Green(id) => format!("{}_G", id),
            Phase::Yellow(id) => format!("{}_Y", id),
            Phase::AllRed => "ALL_RED".to_string(),
            Phase::AllYellow => "ALL_YELLOW".to_string(),
        }
    }

    /// The approach with right-of-way, if any.
    pub fn green_approach(&self) -> Option<ApproachId> {
        match self {
            Phase::Green(id) => Some(*id),
            _ => None,
        }
    }
}

/// Controlled lanes and phase indices of one approach. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approach {
    pub id: ApproachId,
    pub lanes: Vec<String>,
    pub green_phase: usize,
    pub yellow_phase: usize,
}

/// Static approach table with every phase resolved to its actuator index.
#[derive(Debug, Clone)]
pub struct ApproachRegistry {
    approaches: Vec<Approach>,
    lane_owner: HashMap<String, ApproachId>,
    phase_index: HashMap<Phase, usize>,
    index_phase: HashMap<usize, Phase>,
}

impl ApproachRegistry {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut approaches: Vec<Approach> = config
            .approaches
            .iter()
            .map(|a| Approach {
                id: a.id,
                lanes: a.lanes.clone(),
                green_phase: a.green_phase,
                yellow_phase: a.yellow_phase,
            })
            .collect();
        approaches.sort_by_key(|a| a.id);

        let mut lane_owner = HashMap::new();
        for approach in &approaches {
            for lane in &approach.lanes {
                if let Some(first) = lane_owner.insert(lane.clone(), approach.id) {
                    if first != approach.id {
                        return Err(ConfigError::SharedLane {
                            lane: lane.clone(),
                            first: first.to_string(),
                            second: approach.id.to_string(),
                        });
                    }
                }
            }
        }

        let mut phase_index = HashMap::new();
        for approach in &approaches {
            phase_index.insert(Phase::Green(approach.id), approach.green_phase);
            phase_index.insert(Phase::Yellow(approach.id), approach.yellow_phase);
        }
        phase_index.insert(Phase::AllRed, config.all_red_phase);
        phase_index.insert(Phase::AllYellow, config.all_yellow_phase);
        let index_phase = phase_index.iter().map(|(p, i)| (*i, *p)).collect();

        Ok(Self {
            approaches,
            lane_owner,
            phase_index,
            index_phase,
        })
    }

    /// Approaches in canonical order.
    pub fn approaches(&self) -> &[Approach] {
        &self.approaches
    }

    pub fn ids(&self) -> impl Iterator<Item = ApproachId> + '_ {
        self.approaches.iter().map(|a| a.id)
    }

    pub fn get(&self, id: ApproachId) -> Option<&Approach> {
        self.approaches.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: ApproachId) -> bool {
        self.get(id).is_some()
    }

    pub fn approach_for_lane(&self, lane: &str) -> Option<ApproachId> {
        self.lane_owner.get(lane).copied()
    }

    pub fn is_incoming_lane(&self, lane: &str) -> bool {
        self.lane_owner.contains_key(lane)
    }

    /// Actuator index of a phase. `None` for an approach that is not configured.
    pub fn phase_index(&self, phase: Phase) -> Option<usize> {
        self.phase_index.get(&phase).copied()
    }

    pub fn phase_at(&self, index: usize) -> Option<Phase> {
        self.index_phase.get(&index).copied()
    }
}

use crate::error::ConfigError;
use crate::global_variables::{
    ALL_RED_PHASE, ALL_RED_TIME, ALL_YELLOW_PHASE, DETECTION_RADIUS, EXTRA_CLEAR_TIME, GAP_TIME,
    G_MAX, G_MIN, MAX_WAIT, Q_REF, RUN_SECONDS, YELLOW_TIME,
};
use crate::intersection::approach_registry::ApproachId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// How a green duration is derived from the observed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Linear interpolation between `g_min` and `g_max`, saturating at `q_ref`.
    Linear,
    /// Fixed threshold table.
    Stepped,
    /// Share of the total queue across all approaches.
    Proportional,
    /// Constant green regardless of demand.
    Fixed { green: u32 },
}

/// How the next approach to serve is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Longest queue, with starvation override.
    Adaptive,
    /// Canonical order, one approach after the other.
    Rotation,
}

/// Lane group and actuator phases for one approach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachConfig {
    pub id: ApproachId,
    pub lanes: Vec<String>,
    pub green_phase: usize,
    pub yellow_phase: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub g_min: u32,
    pub g_max: u32,
    pub yellow_time: u32,
    /// Seconds of empty served queue before green ends early. `None` disables gap-out.
    pub gap_time: Option<u32>,
    pub max_wait: u32,
    pub q_ref: u32,
    pub detection_radius: f64,
    pub all_red_time: u32,
    pub extra_clear_time: u32,
    pub run_seconds: u64,
    pub allocation_policy: AllocationPolicy,
    pub selection: SelectionMode,
    pub preemption_enabled: bool,
    pub approaches: Vec<ApproachConfig>,
    pub all_red_phase: usize,
    pub all_yellow_phase: usize,
    /// Publish metrics to RabbitMQ as well as CSV when set.
    pub amqp_url: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            g_min: G_MIN,
            g_max: G_MAX,
            yellow_time: YELLOW_TIME,
            gap_time: Some(GAP_TIME),
            max_wait: MAX_WAIT,
            q_ref: Q_REF,
            detection_radius: DETECTION_RADIUS,
            all_red_time: ALL_RED_TIME,
            extra_clear_time: EXTRA_CLEAR_TIME,
            run_seconds: RUN_SECONDS,
            allocation_policy: AllocationPolicy::Linear,
            selection: SelectionMode::Adaptive,
            preemption_enabled: true,
            approaches: default_approaches(),
            all_red_phase: ALL_RED_PHASE,
            all_yellow_phase: ALL_YELLOW_PHASE,
            amqp_url: None,
        }
    }
}

/// The reference 4-way junction: two incoming lanes per approach, phases
/// ordered N_G, N_Y, E_G, E_Y, S_G, S_Y, W_G, W_Y.
pub fn default_approaches() -> Vec<ApproachConfig> {
    ApproachId::CANONICAL
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let prefix = id.lane_prefix();
            ApproachConfig {
                id,
                lanes: vec![format!("{}_in_0", prefix), format!("{}_in_1", prefix)],
                green_phase: i * 2,
                yellow_phase: i * 2 + 1,
            }
        })
        .collect()
}

impl ControllerConfig {
    /// Two-approach variant (A/B split) served by the proportional policy.
    pub fn two_way() -> Self {
        let approaches = default_approaches()
            .into_iter()
            .filter(|a| matches!(a.id, ApproachId::North | ApproachId::East))
            .collect();
        Self {
            g_max: 35,
            gap_time: None,
            allocation_policy: AllocationPolicy::Proportional,
            selection: SelectionMode::Rotation,
            approaches,
            ..Default::default()
        }
    }

    /// Fixed-time baseline: 30 s greens in rotation, emergency logged but not preempted.
    pub fn fixed_time() -> Self {
        Self {
            gap_time: None,
            allocation_policy: AllocationPolicy::Fixed { green: 30 },
            selection: SelectionMode::Rotation,
            preemption_enabled: false,
            detection_radius: 150.0,
            ..Default::default()
        }
    }

    /// Loads a JSON config. Missing fields fall back to the defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let text = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        let config: ControllerConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_str,
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.g_min == 0 || self.g_min > self.g_max {
            return Err(ConfigError::GreenBounds {
                g_min: self.g_min,
                g_max: self.g_max,
            });
        }
        if self.yellow_time == 0 {
            return Err(invalid("yellow_time", self.yellow_time));
        }
        if self.gap_time == Some(0) {
            return Err(invalid("gap_time", 0));
        }
        if !self.detection_radius.is_finite() || self.detection_radius < 0.0 {
            return Err(invalid("detection_radius", self.detection_radius));
        }
        if self.run_seconds == 0 {
            return Err(invalid("run_seconds", self.run_seconds));
        }
        if let AllocationPolicy::Fixed { green } = self.allocation_policy {
            if green < self.g_min || green > self.g_max {
                return Err(invalid("fixed green", green));
            }
        }
        if self.approaches.is_empty() {
            return Err(ConfigError::NoApproaches);
        }

        let mut seen = HashSet::new();
        for approach in &self.approaches {
            if !seen.insert(approach.id) {
                return Err(ConfigError::DuplicateApproach(approach.id.to_string()));
            }
            if approach.lanes.is_empty() || approach.lanes.iter().any(|l| l.trim().is_empty()) {
                return Err(ConfigError::EmptyLaneSet(approach.id.to_string()));
            }
        }

        let mut phases = HashSet::new();
        let all_phases = self
            .approaches
            .iter()
            .flat_map(|a| [a.green_phase, a.yellow_phase])
            .chain([self.all_red_phase, self.all_yellow_phase]);
        for index in all_phases {
            if !phases.insert(index) {
                return Err(ConfigError::DuplicatePhase(index));
            }
        }
        Ok(())
    }
}

fn invalid<T: ToString>(name: &'static str, value: T) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.approaches.len(), 4);
        assert_eq!(config.approaches[2].lanes, vec!["south_in_0", "south_in_1"]);
        assert_eq!(config.approaches[3].green_phase, 6);
        assert_eq!(config.approaches[3].yellow_phase, 7);
    }

    #[test]
    fn presets_are_valid() {
        assert!(ControllerConfig::two_way().validate().is_ok());
        assert!(ControllerConfig::fixed_time().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_green_bounds() {
        let config = ControllerConfig {
            g_min: 40,
            g_max: 30,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GreenBounds { g_min: 40, g_max: 30 })
        ));
    }

    #[test]
    fn rejects_approach_without_lanes() {
        let mut config = ControllerConfig::default();
        config.approaches[1].lanes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyLaneSet(_))));
    }

    #[test]
    fn rejects_phase_collision_with_all_red() {
        let config = ControllerConfig {
            all_red_phase: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicatePhase(3))));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{ "g_max": 35, "allocation_policy": "stepped", "gap_time": null }"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.g_max, 35);
        assert_eq!(config.g_min, G_MIN);
        assert_eq!(config.gap_time, None);
        assert_eq!(config.allocation_policy, AllocationPolicy::Stepped);
        assert_eq!(config.approaches.len(), 4);
    }

    #[test]
    fn fixed_policy_parses_from_json() {
        let json = r#"{ "allocation_policy": { "fixed": { "green": 20 } }, "selection": "rotation" }"#;
        let config: ControllerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.allocation_policy, AllocationPolicy::Fixed { green: 20 });
        assert_eq!(config.selection, SelectionMode::Rotation);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ControllerConfig::from_json_file("/nonexistent/signal.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

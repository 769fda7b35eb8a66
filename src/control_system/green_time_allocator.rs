use crate::config::{AllocationPolicy, ControllerConfig};
use crate::intersection::approach_registry::ApproachId;
use crate::intersection::queue_sampler::QueueSnapshot;
use std::collections::BTreeMap;

/// Linear mapping: `g_min` at an empty queue, `g_max` from `q_ref` vehicles up.
pub fn linear_green(queue: u32, q_ref: u32, g_min: u32, g_max: u32) -> u32 {
    let span = f64::from(g_max.saturating_sub(g_min));
    let g = f64::from(g_min) + (f64::from(queue) / f64::from(q_ref.max(1))) * span;
    clamp_green(g.round_ties_even(), g_min, g_max)
}

/// Threshold table. The table values do not scale with the bounds; the result
/// is still clamped to `[g_min, g_max]`.
pub fn stepped_green(queue: u32, g_min: u32, g_max: u32) -> u32 {
    let g = match queue {
        0..=2 => 10,
        3..=5 => 15,
        6..=9 => 20,
        10..=13 => 25,
        _ => 35,
    };
    g.clamp(g_min, g_max)
}

/// Splits `g_min + g_max` across approaches in proportion to their queues.
/// An empty intersection gives every approach `g_min`.
pub fn proportional_split(snapshot: &QueueSnapshot, g_min: u32, g_max: u32) -> BTreeMap<ApproachId, u32> {
    let total = snapshot.total();
    snapshot
        .iter()
        .map(|(id, q)| {
            let green = if total == 0 {
                g_min
            } else {
                let share = f64::from(q) / f64::from(total) * (f64::from(g_min) + f64::from(g_max));
                clamp_green(share.round_ties_even(), g_min, g_max)
            };
            (id, green)
        })
        .collect()
}

fn clamp_green(g: f64, g_min: u32, g_max: u32) -> u32 {
    g.clamp(f64::from(g_min), f64::from(g_max)) as u32
}

/// Maps observed queues to a bounded green duration under one policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GreenTimeAllocator {
    pub policy: AllocationPolicy,
    pub g_min: u32,
    pub g_max: u32,
    pub q_ref: u32,
}

impl GreenTimeAllocator {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            policy: config.allocation_policy,
            g_min: config.g_min,
            g_max: config.g_max,
            q_ref: config.q_ref,
        }
    }

    /// Green seconds for `chosen`, always within `[g_min, g_max]`.
    pub fn allocate(&self, chosen: ApproachId, snapshot: &QueueSnapshot) -> u32 {
        let queue = snapshot.get(chosen);
        match self.policy {
            AllocationPolicy::Linear => linear_green(queue, self.q_ref, self.g_min, self.g_max),
            AllocationPolicy::Stepped => stepped_green(queue, self.g_min, self.g_max),
            AllocationPolicy::Proportional => proportional_split(snapshot, self.g_min, self.g_max)
                .get(&chosen)
                .copied()
                .unwrap_or(self.g_min),
            AllocationPolicy::Fixed { green } => green.clamp(self.g_min, self.g_max),
        }
    }
}

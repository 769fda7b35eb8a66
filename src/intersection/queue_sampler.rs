use crate::error::SourceError;
use crate::intersection::approach_registry::{Approach, ApproachId, ApproachRegistry};
use crate::simulation_engine::traffic_source::TrafficSource;
use std::collections::BTreeMap;

/// Halting-vehicle count per approach, valid for exactly one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    queues: BTreeMap<ApproachId, u32>,
}

impl QueueSnapshot {
    pub fn from_pairs<I: IntoIterator<Item = (ApproachId, u32)>>(pairs: I) -> Self {
        Self {
            queues: pairs.into_iter().collect(),
        }
    }

    /// Queue of an approach; approaches absent from the snapshot count as empty.
    pub fn get(&self, id: ApproachId) -> u32 {
        self.queues.get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.queues.values().sum()
    }

    /// Entries in canonical approach order.
    pub fn iter(&self) -> impl Iterator<Item = (ApproachId, u32)> + '_ {
        self.queues.iter().map(|(id, q)| (*id, *q))
    }
}

/// Sum of halting vehicles over the approach's controlled lanes.
pub fn queue_length<S: TrafficSource + ?Sized>(
    source: &mut S,
    approach: &Approach,
) -> Result<u32, SourceError> {
    let mut total = 0u32;
    for lane in &approach.lanes {
        total = total.saturating_add(source.halting_count(lane)?);
    }
    Ok(total)
}

/// Reads every configured approach once.
pub fn sample_queues<S: TrafficSource + ?Sized>(
    source: &mut S,
    registry: &ApproachRegistry,
) -> Result<QueueSnapshot, SourceError> {
    let mut queues = BTreeMap::new();
    for approach in registry.approaches() {
        queues.insert(approach.id, queue_length(source, approach)?);
    }
    Ok(QueueSnapshot { queues })
}

use crate::intersection::approach_registry::ApproachId;
use crate::intersection::queue_sampler::QueueSnapshot;
use std::collections::BTreeMap;

/// Seconds each approach has waited since it was last served.
pub type WaitCounters = BTreeMap<ApproachId, u64>;

/// Longest queue among starving approaches, or among all approaches when none
/// is starving. Ties go to the first approach in canonical order.
pub fn select(snapshot: &QueueSnapshot, waits: &WaitCounters, max_wait: u64) -> Option<ApproachId> {
    let starving: Vec<ApproachId> = waits
        .iter()
        .filter(|(_, w)| **w >= max_wait)
        .map(|(id, _)| *id)
        .collect();
    let candidates: Vec<ApproachId> = if starving.is_empty() {
        waits.keys().copied().collect()
    } else {
        starving
    };

    let mut best: Option<(ApproachId, u32)> = None;
    for id in candidates {
        let q = snapshot.get(id);
        match best {
            Some((_, best_q)) if q <= best_q => {}
            _ => best = Some((id, q)),
        }
    }
    best.map(|(id, _)| id)
}

/// Owns the wait counters; the only writer of them.
#[derive(Debug, Clone)]
pub struct FairnessTracker {
    waits: WaitCounters,
    max_wait: u64,
}

impl FairnessTracker {
    pub fn new<I: IntoIterator<Item = ApproachId>>(approaches: I, max_wait: u64) -> Self {
        Self {
            waits: approaches.into_iter().map(|id| (id, 0)).collect(),
            max_wait,
        }
    }

    pub fn select(&self, snapshot: &QueueSnapshot) -> Option<ApproachId> {
        select(snapshot, &self.waits, self.max_wait)
    }

    pub fn is_starving(&self, id: ApproachId) -> bool {
        self.waited(id) >= self.max_wait
    }

    /// Ends a service cycle: the served approach resets, all others wait `elapsed` more.
    pub fn advance(&mut self, served: ApproachId, elapsed: u64) {
        for (id, wait) in self.waits.iter_mut() {
            if *id == served {
                *wait = 0;
            } else {
                *wait = wait.saturating_add(elapsed);
            }
        }
    }

    pub fn waited(&self, id: ApproachId) -> u64 {
        self.waits.get(&id).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &WaitCounters {
        &self.waits
    }
}

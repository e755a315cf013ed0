//! Placement policies: in which order eligible nodes receive new instances.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use fleetgrid_core::{NodeId, NodeRef};

/// Orders candidate nodes for scale-up, most preferred first.
///
/// `load` maps node id → instances of the deployment already on that node;
/// absent nodes carry none. Implementations must only reorder `candidates`.
pub trait PlacementPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn rank(&self, candidates: Vec<NodeRef>, load: &BTreeMap<NodeId, u32>) -> Vec<NodeRef>;
}

fn load_of(load: &BTreeMap<NodeId, u32>, node: &NodeRef) -> u32 {
    load.get(&node.id).copied().unwrap_or(0)
}

/// Least-loaded node first, ties broken by node id.
///
/// The ordering is total, so repeated passes over the same snapshot pick
/// the same nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spread;

impl PlacementPolicy for Spread {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn rank(&self, mut candidates: Vec<NodeRef>, load: &BTreeMap<NodeId, u32>) -> Vec<NodeRef> {
        candidates.sort_by(|a, b| {
            load_of(load, a)
                .cmp(&load_of(load, b))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }
}

/// Most-loaded node first, ties broken by node id.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinPack;

impl PlacementPolicy for BinPack {
    fn name(&self) -> &'static str {
        "bin-pack"
    }

    fn rank(&self, mut candidates: Vec<NodeRef>, load: &BTreeMap<NodeId, u32>) -> Vec<NodeRef> {
        candidates.sort_by(|a, b| {
            Reverse(load_of(load, a))
                .cmp(&Reverse(load_of(load, b)))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }
}

/// Uniformly random order. Seeded instances are reproducible.
pub struct RandomPolicy {
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn rank(&self, mut candidates: Vec<NodeRef>, _load: &BTreeMap<NodeId, u32>) -> Vec<NodeRef> {
        // Canonical order first so the seed alone decides the outcome.
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        candidates.shuffle(&mut *rng);
        candidates
    }
}

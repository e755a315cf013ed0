//! Node selection: reduce the eligible set to the nodes actually targeted.
//!
//! Scale-up returns at most one target per node per pass, so the result
//! length is `min(demand, |eligible|)`. A shortfall is reported, not
//! treated as an error. Scale-down delegates to the [`VictimPolicy`].

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use fleetgrid_core::config::{PlacementConfig, PlacementPolicyKind, VictimPolicyKind};
use fleetgrid_core::{Instance, NodeId, NodeRef};

use crate::policy::{BinPack, PlacementPolicy, RandomPolicy, Spread};
use crate::victim::{MostLoadedOldestFirst, NewestFirst, VictimPolicy};

/// Targets chosen for a scale-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSelection {
    /// Nodes to dispatch a create to, in dispatch order.
    pub targets: Vec<NodeRef>,
    /// Demand left unmet because too few nodes were eligible.
    pub shortfall: u32,
}

impl TargetSelection {
    pub fn is_partial(&self) -> bool {
        self.shortfall > 0
    }
}

/// Result of a signed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Demand was zero.
    Nothing,
    Create(TargetSelection),
    Remove(Vec<Instance>),
}

/// Applies a placement policy and a victim policy.
pub struct NodeSelector {
    policy: Box<dyn PlacementPolicy>,
    victims: Box<dyn VictimPolicy>,
    max_instances_per_node: Option<u32>,
}

impl NodeSelector {
    pub fn new(policy: Box<dyn PlacementPolicy>, victims: Box<dyn VictimPolicy>) -> Self {
        Self {
            policy,
            victims,
            max_instances_per_node: None,
        }
    }

    /// Nodes already hosting `max` instances are skipped on scale-up.
    pub fn with_max_instances_per_node(mut self, max: Option<u32>) -> Self {
        self.max_instances_per_node = max;
        self
    }

    pub fn from_config(config: &PlacementConfig) -> Self {
        let policy: Box<dyn PlacementPolicy> = match config.policy {
            PlacementPolicyKind::Spread => Box::new(Spread),
            PlacementPolicyKind::BinPack => Box::new(BinPack),
            PlacementPolicyKind::Random => match config.seed {
                Some(seed) => Box::new(RandomPolicy::seeded(seed)),
                None => Box::new(RandomPolicy::new()),
            },
        };
        let victims: Box<dyn VictimPolicy> = match config.victims {
            VictimPolicyKind::MostLoadedOldestFirst => Box::new(MostLoadedOldestFirst),
            VictimPolicyKind::NewestFirst => Box::new(NewestFirst),
        };
        Self::new(policy, victims).with_max_instances_per_node(config.max_instances_per_node)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn victim_policy_name(&self) -> &'static str {
        self.victims.name()
    }

    /// Choose up to `demand` nodes from `eligible` for new instances.
    ///
    /// `current` is the deployment's matched instances; it drives the
    /// per-node load the policy ranks by.
    pub fn select_target_nodes(
        &self,
        eligible: &[NodeRef],
        current: &[Instance],
        demand: u32,
    ) -> TargetSelection {
        if demand == 0 {
            return TargetSelection::default();
        }

        let load = load_by_node(current);
        let candidates: Vec<NodeRef> = eligible
            .iter()
            .filter(|node| {
                self.max_instances_per_node.is_none_or(|max| {
                    load.get(&node.id).copied().unwrap_or(0) < max
                })
            })
            .cloned()
            .collect();

        let mut targets = self.policy.rank(candidates, &load);
        targets.truncate(demand as usize);
        let shortfall = demand - targets.len() as u32;

        debug!(
            policy = self.policy.name(),
            demand,
            eligible = eligible.len(),
            selected = targets.len(),
            shortfall,
            "targets selected"
        );
        TargetSelection { targets, shortfall }
    }

    /// Choose `count` instances to remove from `current`.
    pub fn select_victims(&self, current: &[Instance], count: u32) -> Vec<Instance> {
        let victims = self.victims.choose(current, count as usize);
        debug!(
            policy = self.victims.name(),
            requested = count,
            selected = victims.len(),
            "victims selected"
        );
        victims
    }

    /// Signed entry point: positive demand creates, negative removes.
    pub fn select(&self, eligible: &[NodeRef], current: &[Instance], demand: i64) -> Selection {
        match demand {
            0 => Selection::Nothing,
            d if d > 0 => Selection::Create(self.select_target_nodes(
                eligible,
                current,
                u32::try_from(d).unwrap_or(u32::MAX),
            )),
            d => Selection::Remove(self.select_victims(
                current,
                u32::try_from(d.unsigned_abs()).unwrap_or(u32::MAX),
            )),
        }
    }
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::new(Box::new(Spread), Box::new(MostLoadedOldestFirst))
    }
}

/// Instances per node.
pub fn load_by_node(instances: &[Instance]) -> BTreeMap<NodeId, u32> {
    let mut load = BTreeMap::new();
    for inst in instances {
        *load.entry(inst.node_id.clone()).or_insert(0) += 1;
    }
    load
}

//! Node election: which known nodes may host a deployment.
//!
//! The [`RegionElector`] applies, in order:
//!
//! 1. Resolve the request's region. Missing → nobody is eligible (or
//!    `RegionError::NotFound` when the request asks for strict resolution).
//! 2. If the region sits inside a cluster, widen the scope to the outermost
//!    enclosing cluster. A cluster is never partially targeted.
//! 3. Target regions = regions under the scope flagged `deployment_target`,
//!    or the scope itself when none are flagged.
//! 4. Nodes outside every target region are dropped.
//! 5. Independent nodes must be healthy and carry the required labels.
//! 6. Cluster members are admitted as a group: all of them if every member
//!    passes step 5, none of them otherwise.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use fleetgrid_core::{DeploymentRequest, NodeId, NodeRef};
use fleetgrid_region::{RegionError, RegionId, RegionPath, RegionTree};

use crate::error::PlacementResult;

/// Outcome of an election. A snapshot: it is not kept up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Election {
    /// Absolute name of the effective scope; `None` if the region is unknown.
    pub scope: Option<String>,
    /// Absolute names of the regions nodes had to belong to.
    pub target_regions: Vec<String>,
    /// Eligible nodes, ordered by id.
    pub nodes: Vec<NodeRef>,
    /// Cluster regions admitted as a unit.
    pub clusters: Vec<String>,
    /// Cluster regions turned away because a member failed the checks.
    pub rejected_clusters: Vec<String>,
}

impl Election {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == node_id)
    }
}

/// Computes the eligible-node set for a request.
///
/// Implementations must be side-effect free and deterministic for a given
/// snapshot of `known_nodes`.
pub trait Elector: Send + Sync {
    fn evaluate_eligible_nodes(
        &self,
        request: &DeploymentRequest,
        regions: &RegionTree,
        known_nodes: &[NodeRef],
    ) -> PlacementResult<Election>;
}

/// Region- and label-based election.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionElector;

impl Elector for RegionElector {
    fn evaluate_eligible_nodes(
        &self,
        request: &DeploymentRequest,
        regions: &RegionTree,
        known_nodes: &[NodeRef],
    ) -> PlacementResult<Election> {
        let requested = RegionPath::parse(&request.region)?;

        let Some(resolved) = regions.resolve_path(&requested) else {
            if request.strict_region {
                return Err(RegionError::NotFound(request.region.clone()).into());
            }
            debug!(region = %request.region, "target region does not exist, no node is eligible");
            return Ok(Election::default());
        };

        let resolved_path = regions
            .path(resolved)
            .ok_or_else(|| RegionError::NotFound(request.region.clone()))?;
        let scope = outermost_cluster(regions, &resolved_path).unwrap_or(resolved_path);
        let scope_id = regions
            .resolve_path(&scope)
            .ok_or_else(|| RegionError::NotFound(scope.to_string()))?;

        let targets = target_regions(regions, scope_id, &scope);

        // Group every known node by the cluster it belongs to, if any. Cluster
        // groups are built from the whole snapshot, not only the target scope.
        let mut independent: BTreeMap<&str, (&NodeRef, RegionPath)> = BTreeMap::new();
        let mut clusters: BTreeMap<RegionPath, Vec<(&NodeRef, RegionPath)>> = BTreeMap::new();
        for node in known_nodes {
            let node_path = match RegionPath::parse(node.region()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(node = %node.id, error = %e, "malformed region label, treating node as root-only");
                    RegionPath::root()
                }
            };
            match outermost_cluster(regions, &node_path) {
                Some(cluster) => clusters.entry(cluster).or_default().push((node, node_path)),
                None => {
                    independent.insert(node.id.as_str(), (node, node_path));
                }
            }
        }

        let in_targets = |path: &RegionPath| targets.iter().any(|t| t.contains(path));
        let passes = |node: &NodeRef| node.healthy && node.matches_labels(&request.required_labels);

        let mut eligible: BTreeMap<NodeId, NodeRef> = BTreeMap::new();

        for (node, path) in independent.values() {
            if !in_targets(path) {
                continue;
            }
            if passes(*node) {
                eligible.insert(node.id.clone(), (*node).clone());
            } else {
                debug!(node = %node.id, healthy = node.healthy, "node not eligible");
            }
        }

        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for (cluster, members) in &clusters {
            if !members.iter().any(|(_, path)| in_targets(path)) {
                continue;
            }
            if members.iter().all(|(node, _)| passes(*node)) {
                for (node, _) in members {
                    eligible.insert(node.id.clone(), (*node).clone());
                }
                admitted.push(cluster.to_string());
            } else {
                debug!(cluster = %cluster, members = members.len(), "cluster not eligible as a unit");
                rejected.push(cluster.to_string());
            }
        }

        let election = Election {
            scope: Some(scope.to_string()),
            target_regions: targets.iter().map(ToString::to_string).collect(),
            nodes: eligible.into_values().collect(),
            clusters: admitted,
            rejected_clusters: rejected,
        };

        debug!(
            region = %request.region,
            scope = %scope,
            eligible = election.len(),
            known = known_nodes.len(),
            "election complete"
        );
        Ok(election)
    }
}

/// Outermost cluster region on `path` (root included), if any.
///
/// Segments that don't exist in the tree simply aren't clusters.
fn outermost_cluster(regions: &RegionTree, path: &RegionPath) -> Option<RegionPath> {
    if regions.is_cluster(RegionId::ROOT) {
        return Some(RegionPath::root());
    }
    path.prefixes().find(|prefix| {
        regions
            .resolve_path(prefix)
            .is_some_and(|id| regions.is_cluster(id))
    })
}

fn target_regions(regions: &RegionTree, scope_id: RegionId, scope: &RegionPath) -> Vec<RegionPath> {
    let flagged: Vec<RegionPath> = regions
        .subtree(scope_id)
        .into_iter()
        .filter(|id| regions.is_deployment_target(*id))
        .filter_map(|id| regions.path(id))
        .collect();

    if flagged.is_empty() {
        vec![scope.clone()]
    } else {
        flagged
    }
}

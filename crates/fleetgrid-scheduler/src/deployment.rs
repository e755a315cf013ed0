//! Deployment records and reconciliation reports.

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use fleetgrid_core::{DeploymentId, DeploymentRequest, Instance, InstanceId, NodeId};

/// Lifecycle of a deployment.
///
/// `Converged` and `Degraded` are not terminal: a new desired scale, a spec
/// change or a change in the node set puts the deployment back into
/// `Converging` on the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Accepted, no pass has run yet.
    Pending,
    /// Actual and desired scale differ; a pass is pending or in progress.
    Converging,
    /// Actual == desired after the last pass.
    Converged,
    /// The last pass ended short of (or above) the desired scale.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Create,
    Remove,
}

/// A failed per-node dispatch, kept in the deployment's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub node_id: NodeId,
    pub kind: DispatchKind,
    /// Set for removes.
    pub instance_id: Option<InstanceId>,
    pub error: String,
    pub at: u64,
}

/// Non-fatal conditions raised by the latest pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Fewer eligible nodes than instances needed.
    UnderProvisioned {
        needed: u32,
        eligible: u32,
        shortfall: u32,
    },
}

/// A deployment: the request it was created from plus what is running.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub request: DeploymentRequest,
    /// Fingerprint of `request.container`.
    pub spec_fingerprint: String,
    /// Bumped on every accepted re-submission.
    pub generation: u64,
    pub state: DeploymentState,
    /// Absolute names of the regions the last election targeted.
    pub target_regions: Vec<String>,
    pub instances: Vec<Instance>,
    /// Most recent dispatch failures, oldest first.
    pub error_log: VecDeque<DispatchFailure>,
    pub warnings: Vec<Warning>,
    pub created_at: u64,
    pub last_reconciled_at: Option<u64>,
    pub consecutive_degraded_passes: u32,
    pub last_report: Option<ReconcileReport>,
    #[serde(skip)]
    next_seq: u64,
    #[serde(skip)]
    error_log_capacity: usize,
}

impl Deployment {
    pub fn new(id: DeploymentId, mut request: DeploymentRequest, error_log_capacity: usize) -> Self {
        request.deployment_id = Some(id.clone());
        let spec_fingerprint = request.container.fingerprint();
        Self {
            id,
            request,
            spec_fingerprint,
            generation: 1,
            state: DeploymentState::Pending,
            target_regions: Vec::new(),
            instances: Vec::new(),
            error_log: VecDeque::new(),
            warnings: Vec::new(),
            created_at: epoch_secs(),
            last_reconciled_at: None,
            consecutive_degraded_passes: 0,
            last_report: None,
            next_seq: 1,
            error_log_capacity: error_log_capacity.max(1),
        }
    }

    /// Replace the desired state with a re-submitted request.
    pub fn update(&mut self, mut request: DeploymentRequest) {
        request.deployment_id = Some(self.id.clone());
        self.spec_fingerprint = request.container.fingerprint();
        self.request = request;
        self.generation += 1;
        if self.state != DeploymentState::Pending {
            self.state = DeploymentState::Converging;
        }
    }

    /// Instances running the current spec.
    pub fn matched_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances
            .iter()
            .filter(|i| i.spec_fingerprint == self.spec_fingerprint)
    }

    pub fn matched_count(&self) -> usize {
        self.matched_instances().count()
    }

    /// Instances left over from an earlier spec.
    pub fn stale_count(&self) -> usize {
        self.instances.len() - self.matched_count()
    }

    /// True if a pass would have anything to do, assuming the node set is
    /// unchanged.
    pub fn needs_convergence(&self) -> bool {
        self.matched_count() != self.request.scale as usize || self.stale_count() > 0
    }

    /// The latest failure recorded against each node.
    pub fn last_errors_by_node(&self) -> BTreeMap<&str, &DispatchFailure> {
        let mut latest = BTreeMap::new();
        for failure in &self.error_log {
            latest.insert(failure.node_id.as_str(), failure);
        }
        latest
    }

    pub(crate) fn record_failure(&mut self, failure: DispatchFailure) {
        while self.error_log.len() >= self.error_log_capacity {
            self.error_log.pop_front();
        }
        self.error_log.push_back(failure);
    }

    pub(crate) fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Take the outcome of a pass that ran on a copy of this record.
    ///
    /// If the request was replaced while the pass ran, the newer request is
    /// kept and the deployment stays `Converging` until the next pass.
    pub(crate) fn absorb(&mut self, pass: Deployment) {
        if pass.generation == self.generation {
            *self = pass;
            return;
        }
        let newer = std::mem::replace(self, pass);
        self.request = newer.request;
        self.spec_fingerprint = newer.spec_fingerprint;
        self.generation = newer.generation;
        self.state = DeploymentState::Converging;
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deployment_id: DeploymentId,
    pub desired: u32,
    /// Eligible nodes, if an election ran.
    pub eligible: Option<u32>,
    pub created: u32,
    pub removed: u32,
    pub stale_removed: u32,
    /// Instances dropped because their node left the registry.
    pub lost: u32,
    pub failed: u32,
    pub shortfall: u32,
    /// Dispatches never issued because the pass was cancelled.
    pub skipped: u32,
    pub cancelled: bool,
    pub instances: u32,
    pub state: DeploymentState,
    pub started_at: u64,
    pub finished_at: u64,
}

impl ReconcileReport {
    pub(crate) fn begin(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id.clone(),
            desired: deployment.request.scale,
            eligible: None,
            created: 0,
            removed: 0,
            stale_removed: 0,
            lost: 0,
            failed: 0,
            shortfall: 0,
            skipped: 0,
            cancelled: false,
            instances: 0,
            state: deployment.state,
            started_at: epoch_secs(),
            finished_at: 0,
        }
    }

    /// Create and remove calls actually issued to the container engine.
    pub fn dispatches(&self) -> u32 {
        self.created + self.removed + self.stale_removed + self.failed
    }

    pub fn is_noop(&self) -> bool {
        self.dispatches() == 0 && self.lost == 0
    }
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

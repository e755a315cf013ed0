//! Deployment engine: election, selection and dispatch.
//!
//! One reconciliation pass (`ensure_scale`):
//!
//! ```text
//! 1. drop instances whose node left the registry        (lost)
//! 2. split instances by spec fingerprint                (matched / stale)
//! 3. demand = scale - |matched|
//!      demand > 0  → elect → select targets → create
//!      demand < 0  → select victims         → remove
//! 4. remove stale instances that have been replaced
//! 5. |matched| == scale and nothing stale → Converged, else Degraded
//! ```
//!
//! Dispatches within a batch run concurrently, bounded by a per-pass
//! semaphore and a per-call timeout. A failed dispatch is recorded on the
//! deployment and never aborts the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleetgrid_core::config::EngineConfig;
use fleetgrid_core::{ContainerSpec, DeploymentId, DeploymentRequest, Instance, NodeRef};
use fleetgrid_placement::{Elector, NodeSelector, RegionElector, Selection};
use fleetgrid_region::{RegionPath, RegionTree};

use crate::deployment::{
    Deployment, DeploymentState, DispatchFailure, DispatchKind, ReconcileReport, Warning,
    epoch_secs,
};
use crate::engine::{ContainerEngine, EngineFuture};
use crate::error::{DispatchError, SchedulerError, SchedulerResult};
use crate::registry::NodeRegistry;

/// A single create or remove to issue.
enum Dispatch {
    Create {
        node: NodeRef,
        spec: Arc<ContainerSpec>,
        seq: u64,
    },
    Remove {
        instance: Instance,
        stale: bool,
    },
}

impl Dispatch {
    fn node_id(&self) -> &str {
        match self {
            Dispatch::Create { node, .. } => &node.id,
            Dispatch::Remove { instance, .. } => &instance.node_id,
        }
    }

    fn kind(&self) -> DispatchKind {
        match self {
            Dispatch::Create { .. } => DispatchKind::Create,
            Dispatch::Remove { .. } => DispatchKind::Remove,
        }
    }
}

/// A dispatch and what came of it. `Ok` carries the container handle.
struct Outcome {
    dispatch: Dispatch,
    result: Result<String, DispatchError>,
}

/// Runs deploys and reconciliation passes against the external node
/// registry and container engine.
///
/// The engine itself holds no per-deployment state and takes no locks
/// while dispatching; callers serialize passes for the same deployment.
pub struct DeploymentEngine {
    regions: Arc<RegionTree>,
    registry: Arc<dyn NodeRegistry>,
    containers: Arc<dyn ContainerEngine>,
    elector: Box<dyn Elector>,
    selector: NodeSelector,
    settings: EngineConfig,
}

impl DeploymentEngine {
    pub fn new(
        regions: Arc<RegionTree>,
        registry: Arc<dyn NodeRegistry>,
        containers: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            regions,
            registry,
            containers,
            elector: Box::new(RegionElector),
            selector: NodeSelector::default(),
            settings: EngineConfig::default(),
        }
    }

    pub fn with_elector(mut self, elector: Box<dyn Elector>) -> Self {
        self.elector = elector;
        self
    }

    pub fn with_selector(mut self, selector: NodeSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_settings(mut self, settings: EngineConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn regions(&self) -> &Arc<RegionTree> {
        &self.regions
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    /// Reject requests that can never be placed as written.
    pub fn validate(&self, request: &DeploymentRequest) -> SchedulerResult<()> {
        let path = RegionPath::parse(&request.region)?;
        if request.strict_region && self.regions.resolve_path(&path).is_none() {
            return Err(SchedulerError::RegionNotFound(request.region.clone()));
        }
        Ok(())
    }

    /// Validate `request` and build its `Pending` deployment record,
    /// generating an id if the request has none.
    pub fn prepare(&self, request: DeploymentRequest) -> SchedulerResult<Deployment> {
        self.validate(&request)?;
        let id = request
            .deployment_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_deployment_id);
        Ok(Deployment::new(id, request, self.settings.error_log_capacity))
    }

    /// Place a new deployment: elect, select for the full scale, dispatch.
    pub async fn deploy(&self, request: DeploymentRequest) -> SchedulerResult<Deployment> {
        let mut deployment = self.prepare(request)?;
        info!(
            deployment = %deployment.id,
            region = %deployment.request.region,
            scale = deployment.request.scale,
            image = %deployment.request.container.image,
            "deploying"
        );
        self.ensure_scale(&mut deployment).await?;
        Ok(deployment)
    }

    /// Run one reconciliation pass.
    pub async fn ensure_scale(&self, deployment: &mut Deployment) -> SchedulerResult<ReconcileReport> {
        let (_cancel, never) = watch::channel(false);
        self.ensure_scale_cancellable(deployment, never).await
    }

    /// Run one reconciliation pass, issuing no further dispatches once
    /// `cancel` reads `true`. Dispatches already issued still complete and
    /// are recorded.
    ///
    /// Only election errors are returned; per-node dispatch failures land
    /// in the deployment's error log.
    pub async fn ensure_scale_cancellable(
        &self,
        deployment: &mut Deployment,
        cancel: watch::Receiver<bool>,
    ) -> SchedulerResult<ReconcileReport> {
        let mut report = ReconcileReport::begin(deployment);
        deployment.warnings.clear();

        self.drop_lost_instances(deployment, &mut report);

        let matched: Vec<Instance> = deployment.matched_instances().cloned().collect();
        let demand = i64::from(deployment.request.scale) - matched.len() as i64;
        if demand != 0 || deployment.stale_count() > 0 {
            deployment.state = DeploymentState::Converging;
        }

        let eligible = if demand > 0 {
            let known = self.registry.list_known_nodes();
            let election =
                self.elector
                    .evaluate_eligible_nodes(&deployment.request, &self.regions, &known)?;
            deployment.target_regions = election.target_regions;
            report.eligible = Some(election.nodes.len() as u32);
            election.nodes
        } else {
            Vec::new()
        };

        match self.selector.select(&eligible, &matched, demand) {
            Selection::Nothing => {}
            Selection::Create(selection) => {
                if selection.is_partial() {
                    let needed = selection.targets.len() as u32 + selection.shortfall;
                    warn!(
                        deployment = %deployment.id,
                        needed,
                        eligible = eligible.len(),
                        shortfall = selection.shortfall,
                        "under-provisioned: not enough eligible nodes"
                    );
                    report.shortfall = selection.shortfall;
                    deployment.warnings.push(Warning::UnderProvisioned {
                        needed,
                        eligible: eligible.len() as u32,
                        shortfall: selection.shortfall,
                    });
                }
                let spec = Arc::new(deployment.request.container.clone());
                let batch = selection
                    .targets
                    .into_iter()
                    .map(|node| Dispatch::Create {
                        node,
                        spec: Arc::clone(&spec),
                        seq: deployment.allocate_seq(),
                    })
                    .collect();
                self.dispatch_batch(deployment, batch, &cancel, &mut report).await;
            }
            Selection::Remove(victims) => {
                let batch = victims
                    .into_iter()
                    .map(|instance| Dispatch::Remove {
                        instance,
                        stale: false,
                    })
                    .collect();
                self.dispatch_batch(deployment, batch, &cancel, &mut report).await;
            }
        }

        // Old-spec instances only go once their replacements are running;
        // the rest keep serving until a later pass replaces them.
        let stale: Vec<Instance> = deployment
            .instances
            .iter()
            .filter(|i| i.spec_fingerprint != deployment.spec_fingerprint)
            .cloned()
            .collect();
        if !stale.is_empty() {
            let serving = deployment.matched_count() + stale.len();
            let replaceable = serving.saturating_sub(deployment.request.scale as usize);
            let retire = self
                .selector
                .select_victims(&stale, replaceable.min(stale.len()) as u32);
            if retire.len() < stale.len() {
                warn!(
                    deployment = %deployment.id,
                    stale = stale.len(),
                    retiring = retire.len(),
                    "keeping instances of an older spec until replacements are running"
                );
            }
            if !retire.is_empty() {
                info!(deployment = %deployment.id, stale = retire.len(), "removing instances of an older spec");
                let batch = retire
                    .into_iter()
                    .map(|instance| Dispatch::Remove {
                        instance,
                        stale: true,
                    })
                    .collect();
                self.dispatch_batch(deployment, batch, &cancel, &mut report).await;
            }
        }

        let target = deployment.request.scale as usize;
        self.finish(deployment, &mut report, target);
        Ok(report)
    }

    /// Remove every instance, best effort. Used when a deployment is
    /// deleted; failures stay in the error log and the instance stays
    /// listed.
    pub async fn drain(&self, deployment: &mut Deployment) -> ReconcileReport {
        let mut report = ReconcileReport::begin(deployment);
        report.desired = 0;

        let batch = deployment
            .instances
            .iter()
            .cloned()
            .map(|instance| Dispatch::Remove {
                instance,
                stale: false,
            })
            .collect();
        let (_cancel, never) = watch::channel(false);
        self.dispatch_batch(deployment, batch, &never, &mut report).await;

        self.finish(deployment, &mut report, 0);
        report
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn drop_lost_instances(&self, deployment: &mut Deployment, report: &mut ReconcileReport) {
        let id = deployment.id.clone();
        let registry = &self.registry;
        deployment.instances.retain(|instance| {
            if registry.lookup(&instance.node_id).is_some() {
                return true;
            }
            warn!(
                deployment = %id,
                node = %instance.node_id,
                instance = %instance.id,
                "node left the registry, dropping instance"
            );
            report.lost += 1;
            false
        });
    }

    /// Issue `batch` and fold the outcomes into `deployment`.
    async fn dispatch_batch(
        &self,
        deployment: &mut Deployment,
        batch: Vec<Dispatch>,
        cancel: &watch::Receiver<bool>,
        report: &mut ReconcileReport,
    ) {
        if batch.is_empty() {
            return;
        }
        let outcomes = self.dispatch(&deployment.id, batch, cancel).await;
        for Outcome { dispatch, result } in outcomes {
            match (dispatch, result) {
                (Dispatch::Create { node, seq, .. }, Ok(handle)) => {
                    let instance = Instance {
                        id: format!("{}-{seq}", deployment.id),
                        node_id: node.id,
                        handle,
                        spec_fingerprint: deployment.spec_fingerprint.clone(),
                        created_at: epoch_secs(),
                        seq,
                    };
                    debug!(deployment = %deployment.id, node = %instance.node_id, instance = %instance.id, "instance created");
                    deployment.instances.push(instance);
                    report.created += 1;
                }
                (Dispatch::Remove { instance, stale }, Ok(_)) => {
                    debug!(deployment = %deployment.id, node = %instance.node_id, instance = %instance.id, "instance removed");
                    deployment.instances.retain(|i| i.id != instance.id);
                    if stale {
                        report.stale_removed += 1;
                    } else {
                        report.removed += 1;
                    }
                }
                (_, Err(DispatchError::Cancelled)) => {
                    report.cancelled = true;
                    report.skipped += 1;
                }
                (dispatch, Err(e)) => {
                    warn!(
                        deployment = %deployment.id,
                        node = dispatch.node_id(),
                        kind = ?dispatch.kind(),
                        error = %e,
                        "dispatch failed"
                    );
                    report.failed += 1;
                    let instance_id = match &dispatch {
                        Dispatch::Remove { instance, .. } => Some(instance.id.clone()),
                        Dispatch::Create { .. } => None,
                    };
                    deployment.record_failure(DispatchFailure {
                        node_id: dispatch.node_id().to_string(),
                        kind: dispatch.kind(),
                        instance_id,
                        error: e.to_string(),
                        at: epoch_secs(),
                    });
                }
            }
        }
    }

    /// Issue every dispatch in `batch`, at most `max_concurrent_dispatches`
    /// at a time, and wait for all of them. Outcomes come back in batch
    /// order.
    async fn dispatch(
        &self,
        deployment_id: &str,
        batch: Vec<Dispatch>,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<Outcome> {
        let slots = Arc::new(Semaphore::new(self.settings.max_concurrent_dispatches.max(1)));
        let limit = self.settings.dispatch_timeout();
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut cancelled = false;

        for (index, dispatch) in batch.into_iter().enumerate() {
            if !cancelled {
                // Take the slot before checking for cancellation so a cancel
                // that arrives while we wait still stops this dispatch.
                match slots.clone().acquire_owned().await {
                    Ok(permit) if !*cancel.borrow() => {
                        debug!(
                            deployment = %deployment_id,
                            node = dispatch.node_id(),
                            kind = ?dispatch.kind(),
                            "dispatching"
                        );
                        let containers = Arc::clone(&self.containers);
                        tasks.spawn(async move {
                            let result = issue(containers.as_ref(), &dispatch, limit).await;
                            drop(permit);
                            (index, Outcome { dispatch, result })
                        });
                        continue;
                    }
                    _ => {
                        cancelled = true;
                        info!(deployment = %deployment_id, "pass cancelled, no further dispatches issued");
                    }
                }
            }
            outcomes.push((
                index,
                Outcome {
                    dispatch,
                    result: Err(DispatchError::Cancelled),
                },
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => outcomes.push(done),
                Err(e) => error!(deployment = %deployment_id, error = %e, "dispatch task failed"),
            }
        }

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn finish(&self, deployment: &mut Deployment, report: &mut ReconcileReport, target: usize) {
        let converged = deployment.matched_count() == target && deployment.stale_count() == 0;
        let previous = deployment.state;
        deployment.state = if converged {
            deployment.consecutive_degraded_passes = 0;
            DeploymentState::Converged
        } else {
            deployment.consecutive_degraded_passes += 1;
            DeploymentState::Degraded
        };

        let now = epoch_secs();
        deployment.last_reconciled_at = Some(now);
        report.instances = deployment.instances.len() as u32;
        report.state = deployment.state;
        report.finished_at = now;
        deployment.last_report = Some(report.clone());

        if report.is_noop() && previous == deployment.state {
            debug!(deployment = %deployment.id, state = ?deployment.state, "pass complete, nothing to do");
        } else {
            info!(
                deployment = %deployment.id,
                state = ?deployment.state,
                instances = report.instances,
                desired = target,
                created = report.created,
                removed = report.removed,
                stale_removed = report.stale_removed,
                lost = report.lost,
                failed = report.failed,
                "pass complete"
            );
        }
    }
}

/// Issue one dispatch under `limit`.
async fn issue(
    containers: &dyn ContainerEngine,
    dispatch: &Dispatch,
    limit: Duration,
) -> Result<String, DispatchError> {
    let call: EngineFuture<'_, String> = match dispatch {
        Dispatch::Create { node, spec, .. } => containers.create(node, spec),
        Dispatch::Remove { instance, .. } => Box::pin(async move {
            containers
                .remove(instance)
                .await
                .map(|()| instance.handle.clone())
        }),
    };

    match tokio::time::timeout(limit, call).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => Err(DispatchError::Engine(format!("{e:#}"))),
        Err(_) => Err(DispatchError::Timeout(limit)),
    }
}

/// Fresh deployment id.
pub fn new_deployment_id() -> DeploymentId {
    format!("dep-{}", Uuid::new_v4().simple())
}

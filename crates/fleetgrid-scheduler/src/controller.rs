//! Fleet controller: the entry point operators and the API talk to.
//!
//! Holds one slot per deployment. Passes for the same deployment are
//! serialized by the slot's `pass` mutex; different deployments reconcile
//! independently. Readers see the last published record and never wait on
//! an in-flight pass.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use fleetgrid_core::{DeploymentId, DeploymentRequest, FleetConfig};
use fleetgrid_placement::NodeSelector;
use fleetgrid_region::RegionTree;

use crate::deployment::{Deployment, DeploymentState, ReconcileReport};
use crate::engine::ContainerEngine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::NodeRegistry;
use crate::scheduler::DeploymentEngine;

/// Per-deployment state held in memory.
struct DeploymentSlot {
    /// Last published view of the deployment.
    record: std::sync::RwLock<Deployment>,
    /// Held for the duration of a pass.
    pass: Mutex<()>,
    /// Flipped to `true` when the deployment is deleted.
    cancel: watch::Sender<bool>,
}

impl DeploymentSlot {
    fn new(deployment: Deployment) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            record: std::sync::RwLock::new(deployment),
            pass: Mutex::new(()),
            cancel,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Deployment> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Deployment> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every deployment and drives their reconciliation.
#[derive(Clone)]
pub struct FleetController {
    engine: Arc<DeploymentEngine>,
    /// Active deployments: deployment_id → slot.
    slots: Arc<RwLock<HashMap<DeploymentId, Arc<DeploymentSlot>>>>,
}

impl FleetController {
    pub fn new(engine: DeploymentEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build the region tree, selector and engine settings from `config`.
    pub fn from_config(
        config: &FleetConfig,
        registry: Arc<dyn NodeRegistry>,
        containers: Arc<dyn ContainerEngine>,
    ) -> SchedulerResult<Self> {
        let regions = Arc::new(RegionTree::from_config(&config.regions)?);
        let engine = DeploymentEngine::new(regions, registry, containers)
            .with_selector(NodeSelector::from_config(&config.placement))
            .with_settings(config.engine.clone());
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &Arc<DeploymentEngine> {
        &self.engine
    }

    pub fn regions(&self) -> &Arc<RegionTree> {
        self.engine.regions()
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        self.engine.registry()
    }

    /// Accept a request and run its first pass.
    ///
    /// A request carrying the id of an existing deployment replaces that
    /// deployment's desired state instead of creating a new one.
    pub async fn submit_deployment(&self, request: DeploymentRequest) -> SchedulerResult<DeploymentId> {
        self.engine.validate(&request)?;

        let id = {
            let mut slots = self.slots.write().await;
            let existing = request
                .deployment_id
                .clone()
                .and_then(|id| slots.get(&id).map(|slot| (id, Arc::clone(slot))));

            match existing {
                Some((id, slot)) => {
                    let mut record = slot.write();
                    info!(
                        deployment = %id,
                        from = record.request.scale,
                        to = request.scale,
                        "deployment updated"
                    );
                    record.update(request);
                    id
                }
                None => {
                    let deployment = self.engine.prepare(request)?;
                    let id = deployment.id.clone();
                    info!(
                        deployment = %id,
                        region = %deployment.request.region,
                        scale = deployment.request.scale,
                        "deployment accepted"
                    );
                    slots.insert(id.clone(), Arc::new(DeploymentSlot::new(deployment)));
                    id
                }
            }
        };

        self.trigger_reconciliation(&id).await?;
        Ok(id)
    }

    pub async fn get_deployment(&self, id: &str) -> Option<Deployment> {
        let slot = self.slot(id).await?;
        let deployment = slot.read().clone();
        Some(deployment)
    }

    /// Every deployment, ordered by id.
    pub async fn list_deployments(&self) -> Vec<Deployment> {
        let slots: Vec<Arc<DeploymentSlot>> = self.slots.read().await.values().cloned().collect();
        let mut deployments: Vec<Deployment> = slots.iter().map(|s| s.read().clone()).collect();
        deployments.sort_by(|a, b| a.id.cmp(&b.id));
        deployments
    }

    pub async fn deployment_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Run a pass now. Waits for any pass already running on the same
    /// deployment to finish first.
    pub async fn trigger_reconciliation(&self, id: &str) -> SchedulerResult<ReconcileReport> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| SchedulerError::DeploymentNotFound(id.to_string()))?;
        self.reconcile_slot(&slot).await
    }

    /// Forget a deployment: cancel its in-flight pass, then remove its
    /// instances best effort. Returns the final record.
    pub async fn delete_deployment(&self, id: &str) -> SchedulerResult<Deployment> {
        let slot = self
            .slots
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::DeploymentNotFound(id.to_string()))?;

        slot.cancel.send_replace(true);
        let _pass = slot.pass.lock().await;

        let mut deployment = slot.read().clone();
        let report = self.engine.drain(&mut deployment).await;
        if !deployment.instances.is_empty() {
            warn!(
                deployment = %id,
                remaining = deployment.instances.len(),
                "deployment deleted with instances still running"
            );
        }
        info!(deployment = %id, removed = report.removed, failed = report.failed, "deployment deleted");
        Ok(deployment)
    }

    /// Reconcile every deployment concurrently.
    pub async fn reconcile_all(&self) -> Vec<(DeploymentId, SchedulerResult<ReconcileReport>)> {
        let slots: Vec<(DeploymentId, Arc<DeploymentSlot>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut tasks = JoinSet::new();
        for (id, slot) in slots {
            let controller = self.clone();
            tasks.spawn(async move {
                let result = controller.reconcile_slot(&slot).await;
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => results.push(done),
                Err(e) => error!(error = %e, "reconciliation task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Background loop that reconciles every deployment each `interval`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "reconcile loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    for (id, result) in self.reconcile_all().await {
                        if let Err(e) = result {
                            error!(deployment = %id, error = %e, "reconciliation failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconcile loop shutting down");
                    break;
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn slot(&self, id: &str) -> Option<Arc<DeploymentSlot>> {
        self.slots.read().await.get(id).cloned()
    }

    /// Run a pass on a copy of the record and publish the result.
    async fn reconcile_slot(&self, slot: &DeploymentSlot) -> SchedulerResult<ReconcileReport> {
        let _pass = slot.pass.lock().await;

        let mut working = {
            let mut record = slot.write();
            if record.needs_convergence() {
                record.state = DeploymentState::Converging;
            }
            record.clone()
        };

        let result = self
            .engine
            .ensure_scale_cancellable(&mut working, slot.cancel.subscribe())
            .await;
        slot.write().absorb(working);
        result
    }
}

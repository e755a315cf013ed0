//! Container engine client: creates and removes containers on nodes.
//!
//! The real client lives outside this crate; the trait is the narrow
//! contract the scheduler dispatches through. [`SimulatedEngine`] keeps
//! containers in memory and can be told to fail or slow down per node.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use fleetgrid_core::{ContainerSpec, Instance, NodeId, NodeRef};

/// Boxed future returned by [`ContainerEngine`] calls.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Narrow container-engine contract.
///
/// Calls may be slow network round-trips; the scheduler wraps each one in
/// its own timeout and never holds a shared lock while awaiting it.
pub trait ContainerEngine: Send + Sync {
    /// Create a container for `spec` on `node`. Returns the engine's handle.
    fn create<'a>(&'a self, node: &'a NodeRef, spec: &'a ContainerSpec) -> EngineFuture<'a, String>;

    /// Remove a previously created container.
    fn remove<'a>(&'a self, instance: &'a Instance) -> EngineFuture<'a, ()>;
}

/// A container held by the [`SimulatedEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimContainer {
    pub handle: String,
    pub node_id: NodeId,
    pub image: String,
}

/// In-memory engine with per-node failure and latency injection.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    containers: Mutex<BTreeMap<String, SimContainer>>,
    failing: Mutex<HashSet<NodeId>>,
    latency: Mutex<HashMap<NodeId, Duration>>,
    next_handle: AtomicU64,
    create_calls: AtomicU64,
    remove_calls: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create and remove on `node_id` fails until [`recover_node`].
    ///
    /// [`recover_node`]: Self::recover_node
    pub fn fail_node(&self, node_id: impl Into<NodeId>) {
        lock(&self.failing).insert(node_id.into());
    }

    pub fn recover_node(&self, node_id: &str) {
        lock(&self.failing).remove(node_id);
    }

    /// Delay every call on `node_id` by `delay` before it completes.
    pub fn set_latency(&self, node_id: impl Into<NodeId>, delay: Duration) {
        lock(&self.latency).insert(node_id.into(), delay);
    }

    pub fn running(&self) -> Vec<SimContainer> {
        lock(&self.containers).values().cloned().collect()
    }

    pub fn running_on(&self, node_id: &str) -> usize {
        lock(&self.containers)
            .values()
            .filter(|c| c.node_id == node_id)
            .count()
    }

    /// Drop a container behind the scheduler's back.
    pub fn kill(&self, handle: &str) -> bool {
        lock(&self.containers).remove(handle).is_some()
    }

    /// Create calls received, including failed ones.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    /// Remove calls received, including failed ones.
    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::Relaxed)
    }

    fn delay_for(&self, node_id: &str) -> Duration {
        lock(&self.latency).get(node_id).copied().unwrap_or_default()
    }

    fn is_failing(&self, node_id: &str) -> bool {
        lock(&self.failing).contains(node_id)
    }
}

impl ContainerEngine for SimulatedEngine {
    fn create<'a>(&'a self, node: &'a NodeRef, spec: &'a ContainerSpec) -> EngineFuture<'a, String> {
        Box::pin(async move {
            self.create_calls.fetch_add(1, Ordering::Relaxed);
            let delay = self.delay_for(&node.id);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.is_failing(&node.id) {
                anyhow::bail!("node {} refused to create {}", node.id, spec.image);
            }

            let n = self.next_handle.fetch_add(1, Ordering::Relaxed);
            let handle = format!("sim-{n:06}");
            lock(&self.containers).insert(
                handle.clone(),
                SimContainer {
                    handle: handle.clone(),
                    node_id: node.id.clone(),
                    image: spec.image.clone(),
                },
            );
            debug!(node = %node.id, %handle, image = %spec.image, "simulated container created");
            Ok(handle)
        })
    }

    fn remove<'a>(&'a self, instance: &'a Instance) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.remove_calls.fetch_add(1, Ordering::Relaxed);
            let delay = self.delay_for(&instance.node_id);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.is_failing(&instance.node_id) {
                anyhow::bail!("node {} refused to remove {}", instance.node_id, instance.handle);
            }

            // Removing a container that is already gone is not an error.
            let existed = lock(&self.containers).remove(&instance.handle).is_some();
            debug!(node = %instance.node_id, handle = %instance.handle, existed, "simulated container removed");
            Ok(())
        })
    }
}

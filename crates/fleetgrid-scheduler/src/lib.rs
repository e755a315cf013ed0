//! fleetgrid-scheduler: placement dispatch and scale reconciliation.
//!
//! Turns a `DeploymentRequest` into running instances and keeps their count
//! at the requested scale:
//!
//! - Elects eligible nodes and selects targets (via `fleetgrid-placement`)
//! - Dispatches creates and removes through a [`ContainerEngine`]
//! - Tolerates per-node failures; a pass never aborts on one bad node
//! - Serializes passes per deployment, runs different deployments in parallel
//!
//! # Architecture
//!
//! ```text
//! FleetController
//!   ├── DeploymentEngine
//!   │   ├── RegionTree          (shared, append-only)
//!   │   ├── NodeRegistry        (read-only snapshot source)
//!   │   ├── ContainerEngine     (create / remove, bounded + timed out)
//!   │   ├── Elector             (eligible nodes)
//!   │   └── NodeSelector        (targets / victims)
//!   └── Per-deployment slot
//!       ├── record   (last published Deployment)
//!       ├── pass     (mutex held while a pass runs)
//!       └── cancel   (watch flag, set on delete)
//! ```

pub mod controller;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod registry;
pub mod scheduler;

pub use controller::FleetController;
pub use deployment::{
    Deployment, DeploymentState, DispatchFailure, DispatchKind, ReconcileReport, Warning,
};
pub use engine::{ContainerEngine, EngineFuture, SimContainer, SimulatedEngine};
pub use error::{DispatchError, SchedulerError, SchedulerResult};
pub use registry::{NodeRegistry, StaticNodeRegistry};
pub use scheduler::{DeploymentEngine, new_deployment_id};

//! fleetgrid-placement: two-phase node targeting.
//!
//! Placement runs in two pure steps over an in-memory snapshot:
//!
//! 1. **Election** (`elector`): narrow the known-node set to the nodes
//!    eligible for a request: region membership, health, required labels,
//!    and all-or-nothing admission of cluster regions.
//! 2. **Selection** (`selector`): pick the nodes that actually receive a
//!    create (or the instances that receive a remove) using a pluggable
//!    [`PlacementPolicy`] and [`VictimPolicy`].
//!
//! Neither step mutates the registry, the region tree, or node state; the
//! scheduler dispatches whatever they return.

pub mod elector;
pub mod error;
pub mod policy;
pub mod selector;
pub mod victim;

pub use elector::{Election, Elector, RegionElector};
pub use error::{PlacementError, PlacementResult};
pub use policy::{BinPack, PlacementPolicy, RandomPolicy, Spread};
pub use selector::{NodeSelector, Selection, TargetSelection};
pub use victim::{MostLoadedOldestFirst, NewestFirst, VictimPolicy};

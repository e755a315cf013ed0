//! fleetgrid-region: the placement namespace.
//!
//! Regions form a tree addressed by dotted paths (`eu.west.swarm1`). Each
//! region carries string properties that children inherit unless they opt
//! out, plus two placement flags: `deployment_target` and `cluster`.
//!
//! # Layout
//!
//! ```text
//! RegionTree
//!   └── arena: Vec<Arc<Region>>   (index = RegionId, root = 0)
//!       └── Region
//!           ├── parent: Option<RegionId>
//!           ├── settings: RwLock<RegionSettings>
//!           └── children: RwLock<BTreeMap<name, RegionId>>
//! ```
//!
//! Parents are stored as ids, never as references. Creating a child locks
//! only the parent's `children` map, so lookups in unrelated branches are
//! never blocked. The tree is append-only: regions are never removed or
//! re-parented.

pub mod error;
pub mod path;
pub mod tree;

pub use error::{RegionError, RegionResult};
pub use path::RegionPath;
pub use tree::{RegionId, RegionSettings, RegionTree, RegionView};

//! fleet.toml configuration parser.
//!
//! Supplies the initial region tree shape, static node bindings, and the
//! placement/dispatch/reconcile settings. Read once at startup.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{NodeRef, REGION_LABEL};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Dotted absolute path; missing ancestors are created.
    pub path: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub inherit_properties: bool,
    #[serde(default)]
    pub deployment_target: bool,
    #[serde(default)]
    pub cluster: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub healthy: bool,
}

impl NodeConfig {
    /// Build the registry view of this binding. `region` wins over a
    /// `region` entry in `labels`.
    pub fn to_node_ref(&self) -> NodeRef {
        let mut labels = self.labels.clone();
        if let Some(region) = &self.region {
            labels.insert(REGION_LABEL.to_string(), region.clone());
        }
        NodeRef {
            id: self.id.clone(),
            labels,
            healthy: self.healthy,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicyKind {
    #[default]
    Spread,
    BinPack,
    Random,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VictimPolicyKind {
    #[default]
    MostLoadedOldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default)]
    pub policy: PlacementPolicyKind,
    #[serde(default)]
    pub victims: VictimPolicyKind,
    /// Seed for the random policy. Unseeded draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_instances_per_node: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    #[serde(default = "EngineConfig::default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "EngineConfig::default_error_log_capacity")]
    pub error_log_capacity: usize,
}

impl EngineConfig {
    fn default_dispatch_timeout_ms() -> u64 {
        10_000
    }

    fn default_max_concurrent_dispatches() -> usize {
        8
    }

    fn default_error_log_capacity() -> usize {
        64
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: Self::default_dispatch_timeout_ms(),
            max_concurrent_dispatches: Self::default_max_concurrent_dispatches(),
            error_log_capacity: Self::default_error_log_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "ReconcileConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl ReconcileConfig {
    fn default_interval_secs() -> u64 {
        30
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that cannot be loaded consistently.
    ///
    /// Region path syntax is checked when the tree is built from the
    /// config; this covers everything else.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut region_paths = HashSet::new();
        for region in &self.regions {
            if !region_paths.insert(region.path.as_str()) {
                anyhow::bail!("region `{}` declared more than once", region.path);
            }
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                anyhow::bail!("node id must not be empty");
            }
            if !node_ids.insert(node.id.as_str()) {
                anyhow::bail!("node `{}` declared more than once", node.id);
            }
        }

        if self.engine.dispatch_timeout_ms == 0 {
            anyhow::bail!("engine.dispatch_timeout_ms must be greater than zero");
        }
        if self.engine.max_concurrent_dispatches == 0 {
            anyhow::bail!("engine.max_concurrent_dispatches must be greater than zero");
        }
        if self.reconcile.interval_secs == 0 {
            anyhow::bail!("reconcile.interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Registry view of every statically bound node.
    pub fn node_refs(&self) -> Vec<NodeRef> {
        self.nodes.iter().map(NodeConfig::to_node_ref).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[regions]]
path = "eu"
properties = { tier = "gold", owner = "ops" }

[[regions]]
path = "eu.west.swarm1"
cluster = true
deployment_target = true
properties = { tier = "silver" }

[[nodes]]
id = "node-a"
region = "eu.west.swarm1"
labels = { gpu = "true" }

[[nodes]]
id = "node-b"
region = "eu.west"
healthy = false

[placement]
policy = "bin-pack"
victims = "newest-first"
max_instances_per_node = 4

[engine]
dispatch_timeout_ms = 2500

[reconcile]
interval_secs = 15
"#;

    #[test]
    fn empty_config_is_valid() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert!(config.regions.is_empty());
        assert!(config.nodes.is_empty());
        assert_eq!(config.placement.policy, PlacementPolicyKind::Spread);
        assert_eq!(config.placement.victims, VictimPolicyKind::MostLoadedOldestFirst);
        assert_eq!(config.engine.dispatch_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.max_concurrent_dispatches, 8);
        assert_eq!(config.reconcile.interval(), Duration::from_secs(30));
    }

    #[test]
    fn parses_full_sample() {
        let config = FleetConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.regions.len(), 2);
        assert!(config.regions[0].inherit_properties);
        assert!(!config.regions[0].cluster);
        assert!(config.regions[1].cluster);
        assert!(config.regions[1].deployment_target);

        assert_eq!(config.placement.policy, PlacementPolicyKind::BinPack);
        assert_eq!(config.placement.victims, VictimPolicyKind::NewestFirst);
        assert_eq!(config.placement.max_instances_per_node, Some(4));
        assert_eq!(config.engine.dispatch_timeout_ms, 2500);
        assert_eq!(config.engine.error_log_capacity, 64);
        assert_eq!(config.reconcile.interval_secs, 15);
    }

    #[test]
    fn node_refs_carry_region_label() {
        let config = FleetConfig::from_toml_str(SAMPLE).unwrap();
        let nodes = config.node_refs();

        assert_eq!(nodes[0].region(), "eu.west.swarm1");
        assert_eq!(nodes[0].labels.get("gpu"), Some(&"true".to_string()));
        assert!(nodes[0].healthy);
        assert!(!nodes[1].healthy);
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let toml_str = r#"
[[nodes]]
id = "a"
[[nodes]]
id = "a"
"#;
        let err = FleetConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_duplicate_regions() {
        let toml_str = r#"
[[regions]]
path = "eu"
[[regions]]
path = "eu"
"#;
        assert!(FleetConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let toml_str = "[engine]\ndispatch_timeout_ms = 0\n";
        assert!(FleetConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn rejects_unknown_policy() {
        let toml_str = "[placement]\npolicy = \"round-robin\"\n";
        assert!(FleetConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let config = FleetConfig::from_toml_str(SAMPLE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = FleetConfig::from_file(&path).unwrap();
        assert_eq!(loaded.regions.len(), 2);
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.placement.policy, PlacementPolicyKind::BinPack);
    }
}

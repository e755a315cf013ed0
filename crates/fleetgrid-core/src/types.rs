//! Shared types used across fleetgrid crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for a node (host) in the fleet.
pub type NodeId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for a running instance of a deployment.
pub type InstanceId = String;

/// Label key carrying a node's dotted region path.
pub const REGION_LABEL: &str = "region";

fn default_true() -> bool {
    true
}

// ── Node ──────────────────────────────────────────────────────────

/// A node as reported by the node registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    /// Declared labels. The `region` label places the node in the region tree.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Health as last reported by the external monitor.
    #[serde(default = "default_true")]
    pub healthy: bool,
}

impl NodeRef {
    /// A healthy node with no labels.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
            healthy: true,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Place the node in the given dotted region path.
    pub fn in_region(self, path: impl Into<String>) -> Self {
        self.with_label(REGION_LABEL, path)
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// The node's dotted region path; empty means "root only".
    pub fn region(&self) -> &str {
        self.labels.get(REGION_LABEL).map(String::as_str).unwrap_or("")
    }

    /// True if every required label is present with an equal value.
    pub fn matches_labels(&self, required: &BTreeMap<String, String>) -> bool {
        required
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|nv| nv == v))
    }
}

// ── Container spec ────────────────────────────────────────────────

/// Container specification. Opaque to placement; handed to the container
/// engine client as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
        }
    }

    /// Stable identity of this spec (hex SHA-256).
    ///
    /// Two specs with the same fingerprint are interchangeable for the
    /// purpose of counting running instances.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"image\0");
        hasher.update(self.image.as_bytes());
        hasher.update(b"\0command\0");
        for arg in &self.command {
            hasher.update(arg.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(b"\0env\0");
        for (k, v) in &self.env {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(b"\0ports\0");
        for port in &self.ports {
            hasher.update(port.to_be_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// A running container placed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub node_id: NodeId,
    /// Handle returned by the container engine on create.
    pub handle: String,
    /// Fingerprint of the spec this instance was created from.
    pub spec_fingerprint: String,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
    /// Creation sequence within the owning deployment.
    pub seq: u64,
}

impl Instance {
    /// Age ordering key: older instances sort first.
    pub fn age_key(&self) -> (u64, u64, &str) {
        (self.created_at, self.seq, self.id.as_str())
    }
}

// ── Deployment request ────────────────────────────────────────────

/// A caller's declaration of desired state for one deployment.
///
/// Re-submitting a request with an existing `deployment_id` updates the
/// desired scale/spec of that deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Generated on submission when absent.
    #[serde(default)]
    pub deployment_id: Option<DeploymentId>,
    pub container: ContainerSpec,
    /// Dotted region path. Empty means global placement.
    #[serde(default)]
    pub region: String,
    /// Desired instance count. Zero drains the deployment.
    pub scale: u32,
    /// Labels every eligible node must carry.
    #[serde(default)]
    pub required_labels: BTreeMap<String, String>,
    /// Fail instead of electing nobody when the region does not exist.
    #[serde(default)]
    pub strict_region: bool,
}

impl DeploymentRequest {
    pub fn new(container: ContainerSpec, region: impl Into<String>, scale: u32) -> Self {
        Self {
            deployment_id: None,
            container,
            region: region.into(),
            scale,
            required_labels: BTreeMap::new(),
            strict_region: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<DeploymentId>) -> Self {
        self.deployment_id = Some(id.into());
        self
    }

    pub fn with_required_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_labels.insert(key.into(), value.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_region = true;
        self
    }
}

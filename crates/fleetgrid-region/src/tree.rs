//! Arena-backed region tree.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetgrid_core::config::RegionConfig;

use crate::error::{RegionError, RegionResult};
use crate::path::RegionPath;

/// Index of a region in its tree's arena. Only valid for the tree that
/// issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(usize);

impl RegionId {
    pub const ROOT: RegionId = RegionId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Mutable per-region settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSettings {
    pub properties: BTreeMap<String, String>,
    pub inherit_properties: bool,
    pub deployment_target: bool,
    /// Nodes in this region are scheduled as one indivisible unit.
    pub cluster: bool,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            inherit_properties: true,
            deployment_target: false,
            cluster: false,
        }
    }
}

/// Point-in-time snapshot of a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionView {
    pub id: RegionId,
    pub name: String,
    pub absolute_name: String,
    pub parent: Option<RegionId>,
    pub children: Vec<String>,
    pub settings: RegionSettings,
    pub effective_properties: BTreeMap<String, String>,
}

struct Region {
    name: String,
    parent: Option<RegionId>,
    settings: RwLock<RegionSettings>,
    children: RwLock<BTreeMap<String, RegionId>>,
}

impl Region {
    fn new(name: &str, parent: Option<RegionId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            settings: RwLock::new(RegionSettings::default()),
            children: RwLock::new(BTreeMap::new()),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The shared placement namespace.
///
/// `Send + Sync`; share it behind an `Arc`. Mutation only ever appends.
pub struct RegionTree {
    arena: RwLock<Vec<Arc<Region>>>,
}

impl RegionTree {
    /// A tree holding only the root region.
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(vec![Arc::new(Region::new("", None))]),
        }
    }

    /// Build a tree from the `[[regions]]` section of the config.
    pub fn from_config(regions: &[RegionConfig]) -> RegionResult<Self> {
        let tree = Self::new();
        tree.apply_config(regions)?;
        Ok(tree)
    }

    /// Create (or update) every configured region.
    pub fn apply_config(&self, regions: &[RegionConfig]) -> RegionResult<()> {
        for config in regions {
            let id = self.resolve_or_create(&config.path)?;
            self.update_settings(id, |settings| {
                settings
                    .properties
                    .extend(config.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
                settings.inherit_properties = config.inherit_properties;
                settings.deployment_target = config.deployment_target;
                settings.cluster = config.cluster;
            })?;
        }
        Ok(())
    }

    /// Number of regions, root included.
    pub fn len(&self) -> usize {
        read(&self.arena).len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    fn get(&self, id: RegionId) -> Option<Arc<Region>> {
        read(&self.arena).get(id.0).cloned()
    }

    fn get_or_not_found(&self, id: RegionId) -> RegionResult<Arc<Region>> {
        self.get(id)
            .ok_or_else(|| RegionError::NotFound(format!("#{}", id.0)))
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Look up a dotted path without creating anything.
    ///
    /// Returns `Ok(None)` when any segment is missing.
    pub fn resolve(&self, path: &str) -> RegionResult<Option<RegionId>> {
        let path = RegionPath::parse(path)?;
        Ok(self.resolve_path(&path))
    }

    /// Like [`resolve`](Self::resolve), but a missing region is an error.
    pub fn resolve_strict(&self, path: &str) -> RegionResult<RegionId> {
        self.resolve(path)?
            .ok_or_else(|| RegionError::NotFound(path.to_string()))
    }

    pub fn resolve_path(&self, path: &RegionPath) -> Option<RegionId> {
        let mut current = RegionId::ROOT;
        for segment in path.segments() {
            let region = self.get(current)?;
            current = *read(&region.children).get(segment)?;
        }
        Some(current)
    }

    /// Look up a dotted path, creating missing segments top-down.
    ///
    /// Idempotent: the same path always yields the same id.
    pub fn resolve_or_create(&self, path: &str) -> RegionResult<RegionId> {
        let path = RegionPath::parse(path)?;
        self.resolve_or_create_path(&path)
    }

    pub fn resolve_or_create_path(&self, path: &RegionPath) -> RegionResult<RegionId> {
        let mut current = RegionId::ROOT;
        for segment in path.segments() {
            current = self.child_or_create(current, segment)?;
        }
        Ok(current)
    }

    fn child_or_create(&self, parent: RegionId, name: &str) -> RegionResult<RegionId> {
        let region = self.get_or_not_found(parent)?;

        if let Some(id) = read(&region.children).get(name) {
            return Ok(*id);
        }

        // The parent's children lock serializes creation under this parent.
        // The arena lock is held only for the push that assigns the id.
        let mut children = write(&region.children);
        if let Some(id) = children.get(name) {
            return Ok(*id);
        }

        let created = Arc::new(Region::new(name, Some(parent)));
        let id = {
            let mut arena = write(&self.arena);
            let id = RegionId(arena.len());
            arena.push(created);
            id
        };
        children.insert(name.to_string(), id);
        drop(children);

        debug!(region = %self.absolute_name(id).unwrap_or_default(), "region created");
        Ok(id)
    }

    // ── Structure ──────────────────────────────────────────────────

    pub fn name(&self, id: RegionId) -> Option<String> {
        self.get(id).map(|r| r.name.clone())
    }

    pub fn parent(&self, id: RegionId) -> Option<RegionId> {
        self.get(id)?.parent
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, id: RegionId) -> Vec<RegionId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// Derived from the live parent chain on every call.
    pub fn absolute_name(&self, id: RegionId) -> Option<String> {
        self.path(id).map(|p| p.to_string())
    }

    pub fn path(&self, id: RegionId) -> Option<RegionPath> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let region = self.get(cur)?;
            if region.parent.is_some() {
                names.push(region.name.clone());
            }
            current = region.parent;
        }
        names.reverse();
        // Segments were validated on creation.
        RegionPath::parse(&names.join(".")).ok()
    }

    /// Direct children, ordered by name.
    pub fn children(&self, id: RegionId) -> Vec<RegionId> {
        match self.get(id) {
            Some(region) => read(&region.children).values().copied().collect(),
            None => Vec::new(),
        }
    }

    /// `id` followed by all of its descendants, depth-first.
    pub fn subtree(&self, id: RegionId) -> Vec<RegionId> {
        if self.get(id).is_none() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.children(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    // ── Settings ───────────────────────────────────────────────────

    pub fn settings(&self, id: RegionId) -> Option<RegionSettings> {
        self.get(id).map(|r| read(&r.settings).clone())
    }

    pub fn update_settings(
        &self,
        id: RegionId,
        f: impl FnOnce(&mut RegionSettings),
    ) -> RegionResult<()> {
        let region = self.get_or_not_found(id)?;
        let mut settings = write(&region.settings);
        f(&mut settings);
        Ok(())
    }

    pub fn set_property(
        &self,
        id: RegionId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> RegionResult<()> {
        self.update_settings(id, |s| {
            s.properties.insert(key.into(), value.into());
        })
    }

    pub fn set_inherit_properties(&self, id: RegionId, inherit: bool) -> RegionResult<()> {
        self.update_settings(id, |s| s.inherit_properties = inherit)
    }

    pub fn set_deployment_target(&self, id: RegionId, target: bool) -> RegionResult<()> {
        self.update_settings(id, |s| s.deployment_target = target)
    }

    pub fn set_cluster(&self, id: RegionId, cluster: bool) -> RegionResult<()> {
        self.update_settings(id, |s| s.cluster = cluster)
    }

    pub fn is_cluster(&self, id: RegionId) -> bool {
        self.settings(id).is_some_and(|s| s.cluster)
    }

    pub fn is_deployment_target(&self, id: RegionId) -> bool {
        self.settings(id).is_some_and(|s| s.deployment_target)
    }

    /// Inherited properties overlaid with the region's own.
    ///
    /// Walks up while each region inherits; own values win on collision.
    pub fn effective_properties(&self, id: RegionId) -> RegionResult<BTreeMap<String, String>> {
        let mut chain = Vec::new();
        let mut current = Some(self.get_or_not_found(id)?);
        while let Some(region) = current {
            let inherits = read(&region.settings).inherit_properties;
            let parent = region.parent;
            chain.push(region);
            current = match parent {
                Some(parent) if inherits => self.get(parent),
                _ => None,
            };
        }

        let mut effective = BTreeMap::new();
        for region in chain.iter().rev() {
            let settings = read(&region.settings);
            effective.extend(
                settings
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        Ok(effective)
    }

    pub fn view(&self, id: RegionId) -> Option<RegionView> {
        let region = self.get(id)?;
        let children = read(&region.children).keys().cloned().collect();
        Some(RegionView {
            id,
            name: region.name.clone(),
            absolute_name: self.absolute_name(id)?,
            parent: region.parent,
            children,
            settings: read(&region.settings).clone(),
            effective_properties: self.effective_properties(id).ok()?,
        })
    }

    /// Human-readable outline of the tree, one region per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(RegionId::ROOT, 0, &mut out);
        out
    }

    fn render_into(&self, id: RegionId, depth: usize, out: &mut String) {
        let Some(view) = self.view(id) else { return };
        let label = if view.parent.is_none() { "(root)" } else { view.name.as_str() };

        let mut flags = Vec::new();
        if view.settings.deployment_target {
            flags.push("target");
        }
        if view.settings.cluster {
            flags.push("cluster");
        }
        if !view.settings.inherit_properties {
            flags.push("no-inherit");
        }

        let _ = write!(out, "{}{label}", "  ".repeat(depth));
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(", "));
        }
        if !view.settings.properties.is_empty() {
            let props: Vec<String> = view
                .settings
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let _ = write!(out, " {{{}}}", props.join(", "));
        }
        out.push('\n');

        for child in self.children(id) {
            self.render_into(child, depth + 1, out);
        }
    }
}

impl Default for RegionTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn new_tree_has_only_root() {
        let tree = RegionTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.resolve("").unwrap(), Some(RegionId::ROOT));
        assert_eq!(tree.absolute_name(RegionId::ROOT).unwrap(), "");
        assert_eq!(tree.parent(RegionId::ROOT), None);
    }

    #[test]
    fn resolve_or_create_builds_intermediate_segments_in_order() {
        let tree = RegionTree::new();
        assert_eq!(tree.resolve("eu.west.cluster1").unwrap(), None);

        let leaf = tree.resolve_or_create("eu.west.cluster1").unwrap();

        let eu = tree.resolve("eu").unwrap().unwrap();
        let west = tree.resolve("eu.west").unwrap().unwrap();
        assert!(eu < west && west < leaf, "created top-down");
        assert_eq!(tree.absolute_name(west).unwrap(), "eu.west");
        assert_eq!(tree.absolute_name(leaf).unwrap(), "eu.west.cluster1");
        assert_eq!(tree.parent(leaf), Some(west));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn resolve_or_create_is_idempotent() {
        let tree = RegionTree::new();
        let first = tree.resolve_or_create("us.east").unwrap();
        let second = tree.resolve_or_create("us.east").unwrap();
        assert_eq!(first, second);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn new_regions_get_defaults() {
        let tree = RegionTree::new();
        let id = tree.resolve_or_create("ap").unwrap();
        let settings = tree.settings(id).unwrap();
        assert!(settings.inherit_properties);
        assert!(!settings.deployment_target);
        assert!(!settings.cluster);
        assert!(settings.properties.is_empty());
    }

    #[test]
    fn resolve_does_not_create() {
        let tree = RegionTree::new();
        tree.resolve_or_create("eu").unwrap();
        assert_eq!(tree.resolve("eu.north").unwrap(), None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn malformed_paths_fail() {
        let tree = RegionTree::new();
        assert!(matches!(
            tree.resolve("eu..west"),
            Err(RegionError::InvalidPath { .. })
        ));
        assert!(matches!(
            tree.resolve_or_create(".eu"),
            Err(RegionError::InvalidPath { .. })
        ));
        assert!(tree.is_empty(), "failed creation leaves no partial regions");
    }

    #[test]
    fn strict_resolution_reports_not_found() {
        let tree = RegionTree::new();
        assert_eq!(
            tree.resolve_strict("nowhere"),
            Err(RegionError::NotFound("nowhere".to_string()))
        );
        assert_eq!(tree.resolve_strict("").unwrap(), RegionId::ROOT);
    }

    #[test]
    fn root_effective_properties_are_its_own() {
        let tree = RegionTree::new();
        tree.set_property(RegionId::ROOT, "owner", "platform").unwrap();
        assert_eq!(
            tree.effective_properties(RegionId::ROOT).unwrap(),
            props(&[("owner", "platform")])
        );
    }

    #[test]
    fn effective_properties_overlay_ancestors() {
        let tree = RegionTree::new();
        tree.set_property(RegionId::ROOT, "owner", "platform").unwrap();
        let eu = tree.resolve_or_create("eu").unwrap();
        tree.set_property(eu, "tier", "gold").unwrap();
        tree.set_property(eu, "jurisdiction", "gdpr").unwrap();
        let west = tree.resolve_or_create("eu.west").unwrap();
        tree.set_property(west, "tier", "silver").unwrap();

        assert_eq!(
            tree.effective_properties(west).unwrap(),
            props(&[("owner", "platform"), ("tier", "silver"), ("jurisdiction", "gdpr")])
        );
        // The parent is unaffected by the child's override.
        assert_eq!(tree.effective_properties(eu).unwrap()["tier"], "gold");
    }

    #[test]
    fn non_inheriting_region_sees_only_own_properties() {
        let tree = RegionTree::new();
        let eu = tree.resolve_or_create("eu").unwrap();
        tree.set_property(eu, "tier", "gold").unwrap();
        let isolated = tree.resolve_or_create("eu.isolated").unwrap();
        tree.set_property(isolated, "zone", "dmz").unwrap();
        tree.set_inherit_properties(isolated, false).unwrap();

        assert_eq!(
            tree.effective_properties(isolated).unwrap(),
            props(&[("zone", "dmz")])
        );
    }

    #[test]
    fn inheritance_stops_at_a_non_inheriting_ancestor() {
        let tree = RegionTree::new();
        let eu = tree.resolve_or_create("eu").unwrap();
        tree.set_property(eu, "tier", "gold").unwrap();
        let west = tree.resolve_or_create("eu.west").unwrap();
        tree.set_inherit_properties(west, false).unwrap();
        tree.set_property(west, "zone", "a").unwrap();
        let rack = tree.resolve_or_create("eu.west.rack1").unwrap();

        // rack inherits from west, west does not inherit from eu.
        assert_eq!(tree.effective_properties(rack).unwrap(), props(&[("zone", "a")]));
    }

    #[test]
    fn subtree_is_depth_first_by_name() {
        let tree = RegionTree::new();
        tree.resolve_or_create("eu.west.b").unwrap();
        tree.resolve_or_create("eu.west.a").unwrap();
        tree.resolve_or_create("eu.east").unwrap();
        let eu = tree.resolve("eu").unwrap().unwrap();

        let names: Vec<String> = tree
            .subtree(eu)
            .into_iter()
            .map(|id| tree.absolute_name(id).unwrap())
            .collect();
        assert_eq!(names, ["eu", "eu.east", "eu.west", "eu.west.a", "eu.west.b"]);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let tree = RegionTree::new();
        let leaf = tree.resolve_or_create("a.b.c").unwrap();
        let names: Vec<String> = tree
            .ancestors(leaf)
            .into_iter()
            .map(|id| tree.absolute_name(id).unwrap())
            .collect();
        assert_eq!(names, ["a.b", "a", ""]);
    }

    #[test]
    fn from_config_applies_settings() {
        let regions = vec![
            RegionConfig {
                path: "eu".to_string(),
                properties: props(&[("tier", "gold")]),
                inherit_properties: true,
                deployment_target: false,
                cluster: false,
            },
            RegionConfig {
                path: "eu.swarm".to_string(),
                properties: BTreeMap::new(),
                inherit_properties: true,
                deployment_target: true,
                cluster: true,
            },
        ];
        let tree = RegionTree::from_config(&regions).unwrap();
        let swarm = tree.resolve("eu.swarm").unwrap().unwrap();

        assert!(tree.is_cluster(swarm));
        assert!(tree.is_deployment_target(swarm));
        assert_eq!(tree.effective_properties(swarm).unwrap()["tier"], "gold");
    }

    #[test]
    fn from_config_rejects_bad_paths() {
        let regions = vec![RegionConfig {
            path: "eu.".to_string(),
            properties: BTreeMap::new(),
            inherit_properties: true,
            deployment_target: false,
            cluster: false,
        }];
        assert!(matches!(
            RegionTree::from_config(&regions),
            Err(RegionError::InvalidPath { .. })
        ));
    }

    #[test]
    fn view_reports_children_and_effective_properties() {
        let tree = RegionTree::new();
        let eu = tree.resolve_or_create("eu").unwrap();
        tree.set_property(eu, "tier", "gold").unwrap();
        tree.resolve_or_create("eu.west").unwrap();
        tree.resolve_or_create("eu.east").unwrap();

        let view = tree.view(eu).unwrap();
        assert_eq!(view.absolute_name, "eu");
        assert_eq!(view.children, ["east", "west"]);
        assert_eq!(view.effective_properties["tier"], "gold");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["absolute_name"], "eu");
    }

    #[test]
    fn render_outlines_the_tree() {
        let tree = RegionTree::new();
        let swarm = tree.resolve_or_create("eu.swarm").unwrap();
        tree.set_cluster(swarm, true).unwrap();
        tree.set_property(swarm, "tier", "gold").unwrap();

        let rendered = tree.render();
        assert_eq!(rendered, "(root)\n  eu\n    swarm [cluster] {tier=gold}\n");
    }

    #[test]
    fn concurrent_creation_yields_one_region() {
        let tree = RegionTree::new();
        let ids: Vec<RegionId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| tree.resolve_or_create("eu.west.cluster1").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn concurrent_creation_under_different_parents_stays_consistent() {
        let tree = RegionTree::new();
        let zones = ["eu", "us", "ap", "sa"];

        std::thread::scope(|s| {
            for zone in zones {
                let tree = &tree;
                s.spawn(move || {
                    for i in 0..25 {
                        tree.resolve_or_create(&format!("{zone}.dc{i}")).unwrap();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    tree.resolve("eu.dc0").unwrap();
                    assert!(tree.len() >= 1);
                }
            });
        });

        // root + 4 zones + 25 datacenters each
        assert_eq!(tree.len(), 1 + zones.len() * 26);
        for zone in zones {
            for i in 0..25 {
                let path = format!("{zone}.dc{i}");
                let id = tree.resolve(&path).unwrap().unwrap();
                assert_eq!(tree.absolute_name(id).unwrap(), path);
            }
        }
    }

    #[test]
    fn foreign_ids_are_not_found() {
        let big = RegionTree::new();
        let id = big.resolve_or_create("a.b.c").unwrap();
        let small = RegionTree::new();

        assert_eq!(small.absolute_name(id), None);
        assert!(matches!(
            small.effective_properties(id),
            Err(RegionError::NotFound(_))
        ));
    }
}

//! Victim policies: which instances to remove on scale-down.

use std::collections::BTreeMap;

use fleetgrid_core::{Instance, NodeId};

/// Picks `count` instances to remove. Must be deterministic and must never
/// return more than `min(count, instances.len())` entries.
pub trait VictimPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn choose(&self, instances: &[Instance], count: usize) -> Vec<Instance>;
}

/// Repeatedly take the oldest instance on whichever node currently hosts
/// the most instances (ties: lowest node id). Flattens load while draining.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostLoadedOldestFirst;

impl VictimPolicy for MostLoadedOldestFirst {
    fn name(&self) -> &'static str {
        "most-loaded-oldest-first"
    }

    fn choose(&self, instances: &[Instance], count: usize) -> Vec<Instance> {
        let mut by_node: BTreeMap<&NodeId, Vec<&Instance>> = BTreeMap::new();
        for inst in instances {
            by_node.entry(&inst.node_id).or_default().push(inst);
        }
        // Newest at the front, oldest at the back, so `pop` yields the oldest.
        for list in by_node.values_mut() {
            list.sort_by(|a, b| b.age_key().cmp(&a.age_key()));
        }

        let mut victims = Vec::with_capacity(count.min(instances.len()));
        while victims.len() < count {
            // BTreeMap iterates by node id, so `max_by_key` keeps the last
            // maximum; reverse to make the lowest id win ties.
            let Some(list) = by_node
                .values_mut()
                .rev()
                .max_by_key(|list| list.len())
                .filter(|list| !list.is_empty())
            else {
                break;
            };
            if let Some(victim) = list.pop() {
                victims.push(victim.clone());
            }
        }
        victims
    }
}

/// Newest instances first, regardless of node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestFirst;

impl VictimPolicy for NewestFirst {
    fn name(&self) -> &'static str {
        "newest-first"
    }

    fn choose(&self, instances: &[Instance], count: usize) -> Vec<Instance> {
        let mut sorted: Vec<&Instance> = instances.iter().collect();
        sorted.sort_by(|a, b| b.age_key().cmp(&a.age_key()));
        sorted.into_iter().take(count).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str, node: &str, created_at: u64, seq: u64) -> Instance {
        Instance {
            id: id.to_string(),
            node_id: node.to_string(),
            handle: format!("ctr-{id}"),
            spec_fingerprint: "fp".to_string(),
            created_at,
            seq,
        }
    }

    fn ids(victims: &[Instance]) -> Vec<&str> {
        victims.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn drains_the_most_loaded_node_oldest_first() {
        let instances = vec![
            inst("a1", "a", 100, 1),
            inst("b1", "b", 90, 2),
            inst("b2", "b", 110, 3),
            inst("b3", "b", 120, 4),
            inst("c1", "c", 80, 5),
        ];

        let victims = MostLoadedOldestFirst.choose(&instances, 3);
        // b has 3 → b1 (oldest on b). Then a, b, c tie at 1..2: b still has 2 → b2.
        // Then a=1, b=1, c=1: lowest id wins → a1.
        assert_eq!(ids(&victims), ["b1", "b2", "a1"]);
    }

    #[test]
    fn ties_break_on_lowest_node_id() {
        let instances = vec![inst("z1", "z", 1, 1), inst("m1", "m", 2, 2)];
        let victims = MostLoadedOldestFirst.choose(&instances, 1);
        assert_eq!(ids(&victims), ["m1"]);
    }

    #[test]
    fn oldest_uses_sequence_when_timestamps_collide() {
        let instances = vec![inst("late", "a", 50, 9), inst("early", "a", 50, 3)];
        let victims = MostLoadedOldestFirst.choose(&instances, 1);
        assert_eq!(ids(&victims), ["early"]);
    }

    #[test]
    fn never_returns_more_than_available() {
        let instances = vec![inst("a1", "a", 1, 1), inst("b1", "b", 2, 2)];
        assert_eq!(MostLoadedOldestFirst.choose(&instances, 10).len(), 2);
        assert_eq!(NewestFirst.choose(&instances, 10).len(), 2);
        assert!(MostLoadedOldestFirst.choose(&[], 3).is_empty());
        assert!(MostLoadedOldestFirst.choose(&instances, 0).is_empty());
    }

    #[test]
    fn newest_first_ignores_node_load() {
        let instances = vec![
            inst("a1", "a", 10, 1),
            inst("a2", "a", 20, 2),
            inst("b1", "b", 30, 3),
        ];
        assert_eq!(ids(&NewestFirst.choose(&instances, 2)), ["b1", "a2"]);
    }
}

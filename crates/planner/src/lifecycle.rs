//! Node lifecycle: `Active -> Draining -> Unregistered`, with guarded
//! transitions so a node still holding routes cannot be unregistered.

use std::collections::BTreeMap;

use lumen_core::{ClientError, ClientResult, Cluster, NodeId, Partition, PartitionKind};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainProgress {
    pub storage_moved: bool,
    pub ingest_moved: bool,
}

impl DrainProgress {
    pub fn complete(&self) -> bool { self.storage_moved && self.ingest_moved }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Active,
    Draining(DrainProgress),
    Unregistered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeEvent {
    StorageRoutesMoved,
    IngestRoutesMoved,
    Unregister,
}

impl NodeEvent {
    pub fn routes_moved(kind: PartitionKind) -> Self {
        match kind {
            PartitionKind::Storage => NodeEvent::StorageRoutesMoved,
            PartitionKind::Ingest => NodeEvent::IngestRoutesMoved,
        }
    }
}

impl NodeState {
    /// State of an untracked node as seen in `cluster`. A member no partition
    /// routes to is as good as drained.
    pub fn observe(cluster: &Cluster, node: NodeId) -> NodeState {
        if !cluster.has_node(node) {
            return NodeState::Unregistered;
        }
        let storage_moved = !cluster.routes_to(PartitionKind::Storage, node);
        let ingest_moved = !cluster.routes_to(PartitionKind::Ingest, node);
        if storage_moved && ingest_moved {
            NodeState::Draining(DrainProgress { storage_moved, ingest_moved })
        } else {
            NodeState::Active
        }
    }

    pub fn next(self, node: NodeId, event: NodeEvent) -> ClientResult<NodeState> {
        match (self, event) {
            (NodeState::Unregistered, _) => Err(ClientError::Precondition(format!("node {} is already unregistered", node))),
            (NodeState::Active, NodeEvent::Unregister) => {
                Err(ClientError::Precondition(format!("node {} is not drained", node)))
            }
            (NodeState::Draining(p), NodeEvent::Unregister) if !p.complete() => Err(ClientError::Precondition(format!(
                "node {} is still draining (storage moved: {}, ingest moved: {})",
                node, p.storage_moved, p.ingest_moved
            ))),
            (NodeState::Draining(_), NodeEvent::Unregister) => Ok(NodeState::Unregistered),
            (NodeState::Active, e) => Ok(NodeState::Draining(DrainProgress::default()).with(e)),
            (s @ NodeState::Draining(_), e) => Ok(s.with(e)),
        }
    }

    fn with(self, event: NodeEvent) -> NodeState {
        match self {
            NodeState::Draining(mut p) => {
                match event {
                    NodeEvent::StorageRoutesMoved => p.storage_moved = true,
                    NodeEvent::IngestRoutesMoved => p.ingest_moved = true,
                    NodeEvent::Unregister => {}
                }
                NodeState::Draining(p)
            }
            other => other,
        }
    }
}

/// Per-node states tracked by one client. Untracked nodes fall back to
/// [`NodeState::observe`].
#[derive(Debug, Default)]
pub struct NodeLifecycle {
    states: FxHashMap<NodeId, NodeState>,
}

impl NodeLifecycle {
    pub fn new() -> Self { Self::default() }

    pub fn tracked(&self, node: NodeId) -> Option<NodeState> { self.states.get(&node).copied() }

    pub fn state(&self, cluster: &Cluster, node: NodeId) -> NodeState {
        self.tracked(node).unwrap_or_else(|| NodeState::observe(cluster, node))
    }

    /// Validate `event` for `node` without recording it.
    pub fn check(&self, cluster: &Cluster, node: NodeId, event: NodeEvent) -> ClientResult<NodeState> {
        self.state(cluster, node).next(node, event)
    }

    pub fn transition(&mut self, cluster: &Cluster, node: NodeId, event: NodeEvent) -> ClientResult<NodeState> {
        let next = self.check(cluster, node, event)?;
        self.states.insert(node, next);
        Ok(next)
    }

    /// Members that may receive routes: untracked or explicitly active.
    pub fn routable(&self, cluster: &Cluster) -> Vec<NodeId> {
        cluster
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| matches!(self.tracked(*id), None | Some(NodeState::Active)))
            .collect()
    }
}

/// Reassign every partition routed to `node` onto the least-loaded candidate
/// not already in that partition (ties go to the lowest id). Partitions left
/// with other replicas simply drop `node` when no candidate fits; a partition
/// that would end up with no node at all fails the whole move.
pub fn move_routes_away(partitions: &[Partition], node: NodeId, candidates: &[NodeId]) -> ClientResult<Vec<Partition>> {
    let mut out: Vec<Partition> = partitions.to_vec();
    let mut load: BTreeMap<NodeId, usize> = candidates.iter().filter(|c| **c != node).map(|c| (*c, 0usize)).collect();
    for p in &out {
        for id in &p.node_ids {
            if let Some(v) = load.get_mut(id) {
                *v += 1;
            }
        }
    }
    for p in out.iter_mut() {
        let Some(pos) = p.node_ids.iter().position(|id| *id == node) else { continue };
        let target = load
            .iter()
            .filter(|(id, _)| !p.node_ids.contains(id))
            .min_by_key(|(id, count)| (**count, **id))
            .map(|(id, _)| *id);
        match target {
            Some(t) => {
                p.node_ids[pos] = t;
                if let Some(v) = load.get_mut(&t) {
                    *v += 1;
                }
            }
            None if p.node_ids.len() > 1 => {
                p.node_ids.remove(pos);
            }
            None => {
                return Err(ClientError::Precondition(format!(
                    "partition {} has no remaining node to take over from node {}",
                    p.id, node
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{ClusterNode, NodeIds};

    fn part(id: u32, nodes: &[NodeId]) -> Partition { Partition { id, node_ids: NodeIds::from_slice(nodes) } }

    fn cluster() -> Cluster {
        Cluster {
            nodes: (1..=3).map(|id| ClusterNode { id, uri: String::new(), is_available: true }).collect(),
            storage_partitions: vec![part(0, &[1, 2]), part(1, &[2, 3])],
            ingest_partitions: vec![part(0, &[1])],
        }
    }

    #[test]
    fn unregister_requires_full_drain() {
        let c = cluster();
        let mut lc = NodeLifecycle::new();
        assert!(lc.transition(&c, 1, NodeEvent::Unregister).unwrap_err().is_precondition());

        assert_eq!(
            lc.transition(&c, 1, NodeEvent::StorageRoutesMoved).unwrap(),
            NodeState::Draining(DrainProgress { storage_moved: true, ingest_moved: false })
        );
        assert!(lc.transition(&c, 1, NodeEvent::Unregister).is_err());

        lc.transition(&c, 1, NodeEvent::IngestRoutesMoved).unwrap();
        assert_eq!(lc.transition(&c, 1, NodeEvent::Unregister).unwrap(), NodeState::Unregistered);
        assert!(lc.transition(&c, 1, NodeEvent::StorageRoutesMoved).is_err());
    }

    #[test]
    fn repeated_moves_are_idempotent() {
        let c = cluster();
        let mut lc = NodeLifecycle::new();
        let a = lc.transition(&c, 2, NodeEvent::IngestRoutesMoved).unwrap();
        let b = lc.transition(&c, 2, NodeEvent::IngestRoutesMoved).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn untracked_node_without_routes_counts_as_drained() {
        let mut c = cluster();
        c.nodes.push(ClusterNode { id: 4, uri: String::new(), is_available: true });
        assert_eq!(NodeState::observe(&c, 4), NodeState::Draining(DrainProgress { storage_moved: true, ingest_moved: true }));
        assert_eq!(NodeState::observe(&c, 1), NodeState::Active);
        assert_eq!(NodeState::observe(&c, 9), NodeState::Unregistered);
        assert_eq!(NodeLifecycle::new().check(&c, 4, NodeEvent::Unregister).unwrap(), NodeState::Unregistered);
    }

    #[test]
    fn draining_nodes_are_not_routable() {
        let c = cluster();
        let mut lc = NodeLifecycle::new();
        lc.transition(&c, 2, NodeEvent::StorageRoutesMoved).unwrap();
        assert_eq!(lc.routable(&c), vec![1, 3]);
    }

    #[test]
    fn move_routes_picks_least_loaded_candidate() {
        let parts = vec![part(0, &[1, 2]), part(1, &[2, 3]), part(2, &[1])];
        let moved = move_routes_away(&parts, 1, &[2, 3]).unwrap();
        assert!(moved.iter().all(|p| !p.contains(1)));
        // node 3 carried less load than node 2, and partition 0 already holds node 2
        assert_eq!(moved[0].node_ids.as_slice(), &[3, 2]);
        assert_eq!(moved[2].node_ids.as_slice(), &[2]);
    }

    #[test]
    fn move_routes_drops_replica_when_no_candidate_fits() {
        let parts = vec![part(0, &[1, 2])];
        let moved = move_routes_away(&parts, 1, &[2]).unwrap();
        assert_eq!(moved[0].node_ids.as_slice(), &[2]);
    }

    #[test]
    fn move_routes_refuses_to_orphan_a_partition() {
        let parts = vec![part(0, &[1])];
        assert!(move_routes_away(&parts, 1, &[]).unwrap_err().is_precondition());
        assert!(move_routes_away(&parts, 1, &[1]).is_err());
    }
}

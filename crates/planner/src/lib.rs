//! Lumen planner: partition-to-node assignment suggestions, scheme
//! validation and the node lifecycle state machine.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use lumen_core::{ClientError, ClientResult, Cluster, NodeId, NodeIds, Partition, PartitionInput, PartitionKind};
use tracing::debug;

pub mod lifecycle;

pub use lifecycle::{move_routes_away, DrainProgress, NodeEvent, NodeLifecycle, NodeState};

/// Partition count used when a cluster has no partitions yet.
pub const DEFAULT_PARTITION_COUNT: usize = 24;

/// Computes a partition-to-node assignment. Implementations pick their own
/// balancing objective; callers only rely on the output being a valid scheme
/// over `nodes`.
pub trait PartitionPlanner: Send + Sync {
    fn plan(&self, nodes: &[NodeId], partitions: usize) -> Vec<PartitionInput>;
}

/// Default planner: sorted nodes, partition `i` starts at node `i mod n` and
/// takes `replication` consecutive nodes (wrapping, capped at `n`).
#[derive(Debug, Clone, Copy)]
pub struct RoundRobinPlanner {
    replication: usize,
}

impl RoundRobinPlanner {
    pub fn new(replication: usize) -> Self { Self { replication: replication.max(1) } }

    pub fn replication(&self) -> usize { self.replication }
}

impl Default for RoundRobinPlanner {
    fn default() -> Self { Self::new(1) }
}

impl PartitionPlanner for RoundRobinPlanner {
    fn plan(&self, nodes: &[NodeId], partitions: usize) -> Vec<PartitionInput> {
        let mut sorted: Vec<NodeId> = nodes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let n = sorted.len();
        if n == 0 {
            return Vec::new();
        }
        let width = self.replication.min(n);
        (0..partitions)
            .map(|i| PartitionInput {
                id: i as u32,
                node_ids: (0..width).map(|r| u64::from(sorted[(i + r) % n])).collect(),
            })
            .collect()
    }
}

/// Suggest a new assignment for `current` over the `active` nodes. Returns an
/// empty vector when nothing should change.
pub fn suggest(current: &[Partition], active: &[NodeId], planner: &dyn PartitionPlanner) -> Vec<PartitionInput> {
    if active.is_empty() {
        return Vec::new();
    }
    let count = if current.is_empty() { DEFAULT_PARTITION_COUNT } else { current.len() };
    let plan = planner.plan(active, count);
    let unchanged = plan.len() == current.len()
        && plan.iter().zip(current.iter()).all(|(p, c)| *p == PartitionInput::from(c));
    debug!(partitions = count, nodes = active.len(), unchanged, "partition plan computed");
    if unchanged { Vec::new() } else { plan }
}

/// Narrow a caller-side node ID to the cluster's node index type.
pub fn narrow_node_id(id: u64) -> ClientResult<NodeId> {
    NodeId::try_from(id).map_err(|_| ClientError::Precondition(format!("node id {} does not fit the cluster node index", id)))
}

/// Check a `kind` scheme against the live membership of `cluster` and convert
/// it to partitions. Every node must be a member listed in `routable`, and the
/// scheme must keep every partition id `cluster` already has for `kind`.
/// Nothing may be applied unless this succeeds.
pub fn validate_scheme(
    cluster: &Cluster,
    kind: PartitionKind,
    scheme: &[PartitionInput],
    routable: &[NodeId],
) -> ClientResult<Vec<Partition>> {
    if scheme.is_empty() {
        return Err(ClientError::Precondition(format!("{} partition scheme is empty", kind)));
    }
    let mut seen: BTreeSet<u32> = BTreeSet::new();
    let mut out = Vec::with_capacity(scheme.len());
    for input in scheme {
        if !seen.insert(input.id) {
            return Err(ClientError::Precondition(format!("duplicate partition id {}", input.id)));
        }
        if input.node_ids.is_empty() {
            return Err(ClientError::Precondition(format!("partition {} has no nodes assigned", input.id)));
        }
        let mut node_ids = NodeIds::new();
        for raw in &input.node_ids {
            let id = narrow_node_id(*raw)?;
            if !cluster.has_node(id) {
                return Err(ClientError::Precondition(format!("partition {} references unknown node {}", input.id, id)));
            }
            if !routable.contains(&id) {
                return Err(ClientError::Precondition(format!(
                    "partition {} routes to node {}, which is draining",
                    input.id, id
                )));
            }
            if node_ids.contains(&id) {
                return Err(ClientError::Precondition(format!("partition {} lists node {} twice", input.id, id)));
            }
            node_ids.push(id);
        }
        out.push(Partition { id: input.id, node_ids });
    }
    let missing: Vec<u32> = cluster.partitions(kind).iter().map(|p| p.id).filter(|id| !seen.contains(id)).collect();
    if !missing.is_empty() {
        return Err(ClientError::Precondition(format!("{} partition scheme leaves out partitions {:?}", kind, missing)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::ClusterNode;

    fn cluster(nodes: &[NodeId]) -> Cluster {
        Cluster {
            nodes: nodes.iter().map(|id| ClusterNode { id: *id, uri: format!("http://n{}:8080", id), is_available: true }).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn round_robin_wraps_and_caps_replication() {
        let plan = RoundRobinPlanner::new(5).plan(&[3, 1, 2], 4);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].node_ids, vec![1, 2, 3]);
        assert_eq!(plan[1].node_ids, vec![2, 3, 1]);
        assert_eq!(plan[3].node_ids, vec![1, 2, 3]);
    }

    #[test]
    fn round_robin_without_nodes_plans_nothing() {
        assert!(RoundRobinPlanner::new(2).plan(&[], 8).is_empty());
    }

    #[test]
    fn suggest_is_empty_when_balanced() {
        let planner = RoundRobinPlanner::new(1);
        let current = validate_scheme(&cluster(&[1, 2]), PartitionKind::Storage, &planner.plan(&[1, 2], 4), &[1, 2]).unwrap();
        assert!(suggest(&current, &[1, 2], &planner).is_empty());
        assert_eq!(suggest(&current, &[1, 2, 3], &planner).len(), 4);
    }

    #[test]
    fn suggest_uses_default_count_for_fresh_clusters() {
        assert_eq!(suggest(&[], &[1], &RoundRobinPlanner::default()).len(), DEFAULT_PARTITION_COUNT);
        assert!(suggest(&[], &[], &RoundRobinPlanner::default()).is_empty());
    }

    fn check(c: &Cluster, scheme: &[PartitionInput]) -> ClientResult<Vec<Partition>> {
        let routable: Vec<NodeId> = c.nodes.iter().map(|n| n.id).collect();
        validate_scheme(c, PartitionKind::Storage, scheme, &routable)
    }

    #[test]
    fn validate_rejects_unknown_duplicate_and_empty() {
        let c = cluster(&[1, 2]);
        let unknown = [PartitionInput { id: 0, node_ids: vec![1, 9] }];
        assert!(check(&c, &unknown).unwrap_err().to_string().contains("unknown node 9"));

        let dup_ids = [PartitionInput { id: 0, node_ids: vec![1] }, PartitionInput { id: 0, node_ids: vec![2] }];
        assert!(check(&c, &dup_ids).unwrap_err().is_precondition());

        let empty = [PartitionInput { id: 0, node_ids: vec![] }];
        assert!(check(&c, &empty).unwrap_err().is_precondition());

        let twice = [PartitionInput { id: 0, node_ids: vec![2, 2] }];
        assert!(check(&c, &twice).unwrap_err().is_precondition());
    }

    #[test]
    fn validate_narrows_node_ids() {
        let c = cluster(&[1]);
        let too_big = [PartitionInput { id: 0, node_ids: vec![u64::from(u32::MAX) + 1] }];
        assert!(check(&c, &too_big).unwrap_err().is_precondition());
        let ok = check(&c, &[PartitionInput { id: 7, node_ids: vec![1] }]).unwrap();
        assert_eq!(ok[0].id, 7);
        assert_eq!(ok[0].node_ids.as_slice(), &[1]);
    }

    #[test]
    fn validate_rejects_empty_scheme_and_dropped_partitions() {
        let mut c = cluster(&[1, 2]);
        assert!(check(&c, &[]).unwrap_err().to_string().contains("storage partition scheme is empty"));

        c.storage_partitions = vec![
            Partition { id: 0, node_ids: NodeIds::from_slice(&[1]) },
            Partition { id: 1, node_ids: NodeIds::from_slice(&[2]) },
        ];
        let partial = [PartitionInput { id: 0, node_ids: vec![2] }];
        assert!(check(&c, &partial).unwrap_err().to_string().contains("leaves out partitions [1]"));

        let grown: Vec<PartitionInput> = (0..3).map(|id| PartitionInput { id, node_ids: vec![1] }).collect();
        assert_eq!(check(&c, &grown).unwrap().len(), 3);
        // ingest has no partitions yet, so any non-empty scheme covers it
        assert!(validate_scheme(&c, PartitionKind::Ingest, &[PartitionInput { id: 5, node_ids: vec![1] }], &[1, 2]).is_ok());
    }

    #[test]
    fn validate_rejects_nodes_outside_routable_set() {
        let c = cluster(&[1, 2]);
        let scheme = [PartitionInput { id: 0, node_ids: vec![1, 2] }];
        let err = validate_scheme(&c, PartitionKind::Storage, &scheme, &[1]).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("node 2, which is draining"));
    }
}

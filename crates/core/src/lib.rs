//! Lumen core types: cluster topology, desired-state specs, errors.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod identity;
pub mod license;
pub mod resources;
pub mod spec;

/// Native node index used by the cluster. Callers hand in `u64` IDs which are
/// narrowed to this type before anything is applied.
pub type NodeId = u32;

/// Node list of a single partition. Replication factors are small.
pub type NodeIds = SmallVec<[NodeId; 4]>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub id: NodeId,
    pub uri: String,
    pub is_available: bool,
}

/// A storage or ingest partition and the nodes assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub id: u32,
    pub node_ids: NodeIds,
}

impl Partition {
    pub fn contains(&self, node: NodeId) -> bool { self.node_ids.contains(&node) }
}

/// Caller-facing partition assignment as accepted by the apply operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInput {
    pub id: u32,
    pub node_ids: Vec<u64>,
}

impl From<&Partition> for PartitionInput {
    fn from(p: &Partition) -> Self {
        Self { id: p.id, node_ids: p.node_ids.iter().map(|n| u64::from(*n)).collect() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PartitionKind {
    Storage,
    Ingest,
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKind::Storage => f.write_str("storage"),
            PartitionKind::Ingest => f.write_str("ingest"),
        }
    }
}

/// Cluster topology snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub nodes: Vec<ClusterNode>,
    pub storage_partitions: Vec<Partition>,
    pub ingest_partitions: Vec<Partition>,
}

impl Cluster {
    pub fn has_node(&self, id: NodeId) -> bool { self.nodes.iter().any(|n| n.id == id) }

    pub fn node_ids(&self) -> Vec<NodeId> { self.nodes.iter().map(|n| n.id).collect() }

    pub fn partitions(&self, kind: PartitionKind) -> &[Partition] {
        match kind {
            PartitionKind::Storage => &self.storage_partitions,
            PartitionKind::Ingest => &self.ingest_partitions,
        }
    }

    pub fn partitions_mut(&mut self, kind: PartitionKind) -> &mut Vec<Partition> {
        match kind {
            PartitionKind::Storage => &mut self.storage_partitions,
            PartitionKind::Ingest => &mut self.ingest_partitions,
        }
    }

    /// True when any partition of `kind` still routes to `node`.
    pub fn routes_to(&self, kind: PartitionKind, node: NodeId) -> bool {
        self.partitions(kind).iter().any(|p| p.contains(node))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
}

/// Reference to a managed cluster, as found on the cluster's custom resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tls: bool,
}

pub const DEFAULT_API_PORT: u16 = 8080;

impl ClusterRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), port: None, tls: false }
    }

    pub fn port(&self) -> u16 { self.port.unwrap_or(DEFAULT_API_PORT) }

    pub fn scheme(&self) -> &'static str { if self.tls { "https" } else { "http" } }
}

/// Management endpoint of a cluster built from its service name. No I/O.
pub fn base_url(cluster: &ClusterRef) -> ClientResult<url::Url> {
    let raw = format!("{}://{}.{}:{}/", cluster.scheme(), cluster.name, cluster.namespace, cluster.port());
    url::Url::parse(&raw)
        .map_err(|e| ClientError::Precondition(format!("invalid base url for cluster {}/{}: {}", cluster.namespace, cluster.name, e)))
}

/// Client errors. Kinds are coarse on purpose; the reconciliation loop decides
/// what is transient.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ClientError {
    #[error("{0}")]
    NotFound(String),
    #[error("precondition: {0}")]
    Precondition(String),
    #[error("remote: {operation} {resource}: {message}")]
    Remote { operation: String, resource: String, message: String },
    #[error("{0}")]
    Parse(String),
}

impl ClientError {
    pub fn remote(operation: impl Into<String>, resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ClientError::Remote { operation: operation.into(), resource: resource.into(), message: message.to_string() }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, ClientError::NotFound(_)) }

    pub fn is_precondition(&self) -> bool { matches!(self, ClientError::Precondition(_)) }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub mod prelude {
    pub use super::{
        base_url, ClientError, ClientResult, Cluster, ClusterNode, ClusterRef, NodeId, NodeIds, Partition,
        PartitionInput, PartitionKind, StatusResponse,
    };
    pub use super::identity::{action_ids, identify};
    pub use super::license::{License, LicenseParser, OnPremLicense};
    pub use super::resources::{Alert, IngestToken, Notifier, NotifierConfig, Parser, Repository, View, ViewConnection};
    pub use super::spec::{ActionSpec, AlertSpec, IngestTokenSpec, ParserSpec, RepositorySpec, ViewSpec};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_to_plain_http_on_8080() {
        let url = base_url(&ClusterRef::new("logs", "observability")).unwrap();
        assert_eq!(url.as_str(), "http://logs.observability:8080/");
    }

    #[test]
    fn base_url_honours_port_and_tls() {
        let mut r = ClusterRef::new("logs", "prod");
        r.port = Some(8443);
        r.tls = true;
        assert_eq!(base_url(&r).unwrap().as_str(), "https://logs.prod:8443/");
    }

    #[test]
    fn base_url_rejects_garbage_names() {
        let err = base_url(&ClusterRef::new("bad name", "ns")).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn routes_to_checks_only_requested_kind() {
        let c = Cluster {
            nodes: vec![ClusterNode { id: 1, uri: "http://n1".into(), is_available: true }],
            storage_partitions: vec![Partition { id: 0, node_ids: NodeIds::from_slice(&[1]) }],
            ingest_partitions: vec![],
        };
        assert!(c.routes_to(PartitionKind::Storage, 1));
        assert!(!c.routes_to(PartitionKind::Ingest, 1));
    }
}

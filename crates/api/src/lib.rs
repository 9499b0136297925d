//! Lumen cluster state client façade.
//!
//! This crate defines the trait the reconciliation loop depends on, plus an
//! in-memory implementation (tests, local runs) and a remote one layered on a
//! pluggable transport.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, warn};

pub use lumen_core::license::{JwtLicenseParser, License, LicenseParser, OnPremLicense};
pub use lumen_core::prelude::*;
pub use lumen_core::spec::{ParserTestCase, QuerySpec, RetentionSpec, ViewConnectionSpec};
pub use lumen_planner::{NodeState, PartitionPlanner, RoundRobinPlanner};

pub mod config;
pub mod mock;
pub mod reconcile;
pub mod remote;

pub use config::ClientConfig;
pub use mock::MockClient;
pub use remote::{ApiRequest, HttpTransport, Method, RemoteClient, Transport};

/// Control-plane operations against one managed cluster.
///
/// Every method performs one logical operation; retries and deadlines belong
/// to the caller. `update_*` is a full replace and defaults to `add_*`.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    // ---- cluster ----
    async fn status(&self) -> ClientResult<StatusResponse>;

    async fn get_cluster(&self) -> ClientResult<Cluster>;

    /// Verify the configured credential is accepted.
    async fn test_api_token(&self) -> ClientResult<()>;

    /// Management endpoint of `cluster`. Pure, no I/O.
    fn base_url(&self, cluster: &ClusterRef) -> ClientResult<url::Url> { lumen_core::base_url(cluster) }

    // ---- partitions ----
    async fn suggested_storage_partitions(&self) -> ClientResult<Vec<PartitionInput>>;

    async fn suggested_ingest_partitions(&self) -> ClientResult<Vec<PartitionInput>>;

    /// Replace the storage scheme. Validated as a whole; on failure the
    /// previous scheme stays in effect.
    async fn update_storage_partition_scheme(&self, scheme: &[PartitionInput]) -> ClientResult<()>;

    async fn update_ingest_partition_scheme(&self, scheme: &[PartitionInput]) -> ClientResult<()>;

    // ---- nodes ----
    async fn move_storage_routes_away_from_node(&self, node: NodeId) -> ClientResult<()>;

    async fn move_ingest_routes_away_from_node(&self, node: NodeId) -> ClientResult<()>;

    /// Fire-and-forget; completion is observed through `get_cluster`.
    async fn start_data_redistribution(&self) -> ClientResult<()>;

    /// Remove a fully drained node from the cluster.
    async fn unregister(&self, node: NodeId) -> ClientResult<()>;

    // ---- ingest tokens ----
    async fn get_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken>;
    async fn add_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken>;
    async fn update_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken> {
        self.add_ingest_token(spec).await
    }
    async fn delete_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<()>;

    // ---- parsers ----
    async fn get_parser(&self, spec: &ParserSpec) -> ClientResult<Parser>;
    async fn add_parser(&self, spec: &ParserSpec) -> ClientResult<Parser>;
    async fn update_parser(&self, spec: &ParserSpec) -> ClientResult<Parser> { self.add_parser(spec).await }
    async fn delete_parser(&self, spec: &ParserSpec) -> ClientResult<()>;

    // ---- repositories ----
    async fn get_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository>;
    async fn add_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository>;
    async fn update_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository> {
        self.add_repository(spec).await
    }
    async fn delete_repository(&self, spec: &RepositorySpec) -> ClientResult<()>;

    // ---- views ----
    async fn get_view(&self, spec: &ViewSpec) -> ClientResult<View>;
    async fn add_view(&self, spec: &ViewSpec) -> ClientResult<View>;
    async fn update_view(&self, spec: &ViewSpec) -> ClientResult<View> { self.add_view(spec).await }
    async fn delete_view(&self, spec: &ViewSpec) -> ClientResult<()>;

    // ---- notifiers ----
    async fn get_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier>;
    async fn add_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier>;
    async fn update_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier> { self.add_notifier(spec).await }
    async fn delete_notifier(&self, spec: &ActionSpec) -> ClientResult<()>;

    // ---- alerts ----
    async fn get_alert(&self, spec: &AlertSpec) -> ClientResult<Alert>;
    async fn add_alert(&self, spec: &AlertSpec) -> ClientResult<Alert>;
    async fn update_alert(&self, spec: &AlertSpec) -> ClientResult<Alert> { self.add_alert(spec).await }
    async fn delete_alert(&self, spec: &AlertSpec) -> ClientResult<()>;

    /// Action name → notifier ID for every action the alert references.
    fn action_ids_for_alert(&self, alert: &AlertSpec) -> ClientResult<BTreeMap<String, String>> { action_ids(alert) }

    // ---- license ----
    /// Fails with `NotFound("no license installed")` until one is installed.
    async fn get_license(&self) -> ClientResult<License>;

    async fn install_license(&self, license: &str) -> ClientResult<()>;
}

/// Resolve the alert's action mapping, failing with the context callers
/// expect when it cannot be built.
pub(crate) fn resolve_action_ids<C: ClusterClient + ?Sized>(
    client: &C,
    alert: &AlertSpec,
) -> ClientResult<BTreeMap<String, String>> {
    client.action_ids_for_alert(alert).map_err(|e| match e {
        ClientError::Precondition(m) => ClientError::Precondition(format!("could not get action id mapping: {}", m)),
        other => other,
    })
}

/// Record latency and outcome of one client operation.
pub(crate) fn observe<T>(op: &'static str, resource: &str, t0: Instant, res: &ClientResult<T>) {
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    histogram!("client_request_ms", ms, "op" => op);
    counter!("client_requests_total", 1u64, "op" => op);
    match res {
        Ok(_) => info!(op, resource = %resource, took_ms = %t0.elapsed().as_millis(), "client: ok"),
        Err(e) if e.is_not_found() => info!(op, resource = %resource, took_ms = %t0.elapsed().as_millis(), "client: not found"),
        Err(e) => {
            counter!("client_errors_total", 1u64, "op" => op);
            warn!(op, resource = %resource, error = %e, took_ms = %t0.elapsed().as_millis(), "client: failed");
        }
    }
}

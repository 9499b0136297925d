//! In-memory cluster double. Resources live in keyed stores so any number of
//! resources of one kind can coexist; the topology sits in a swap cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use lumen_core::license::{parse_license, NO_LICENSE_INSTALLED};
use lumen_planner::{move_routes_away, suggest, validate_scheme, NodeEvent, NodeLifecycle};
use lumen_store::{KeyedStore, ScopedName, TopologyCell};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::*;

/// Simple in-memory implementation for tests and local runs.
pub struct MockClient {
    topology: TopologyCell,
    version: String,
    cluster_error: Option<ClientError>,
    storage_scheme_error: Option<ClientError>,
    ingest_scheme_error: Option<ClientError>,
    token_error: Option<ClientError>,
    planner: Box<dyn PartitionPlanner>,
    license_parser: Box<dyn LicenseParser>,
    apply_guard: Mutex<()>,
    lifecycle: Mutex<NodeLifecycle>,
    redistributions: AtomicU64,
    ingest_tokens: KeyedStore<ScopedName, IngestToken>,
    parsers: KeyedStore<ScopedName, Parser>,
    repositories: KeyedStore<ScopedName, Repository>,
    views: KeyedStore<ScopedName, View>,
    notifiers: KeyedStore<ScopedName, Notifier>,
    alerts: KeyedStore<ScopedName, Alert>,
    license: RwLock<Option<License>>,
}

fn new_secret() -> String { uuid::Uuid::new_v4().simple().to_string() }

/// Every resource operation goes through here for metrics and logs.
fn recorded<T>(op: &'static str, key: &ScopedName, t0: Instant, res: ClientResult<T>) -> ClientResult<T> {
    observe(op, &key.to_string(), t0, &res);
    res
}

impl MockClient {
    pub fn new(cluster: Cluster, version: impl Into<String>) -> Self {
        Self {
            topology: TopologyCell::new(cluster),
            version: version.into(),
            cluster_error: None,
            storage_scheme_error: None,
            ingest_scheme_error: None,
            token_error: None,
            planner: Box::new(RoundRobinPlanner::default()),
            license_parser: Box::new(JwtLicenseParser),
            apply_guard: Mutex::new(()),
            lifecycle: Mutex::new(NodeLifecycle::new()),
            redistributions: AtomicU64::new(0),
            ingest_tokens: KeyedStore::new(),
            parsers: KeyedStore::new(),
            repositories: KeyedStore::new(),
            views: KeyedStore::new(),
            notifiers: KeyedStore::new(),
            alerts: KeyedStore::new(),
            license: RwLock::new(None),
        }
    }

    /// `get_cluster` fails with `err`.
    pub fn with_cluster_error(mut self, err: ClientError) -> Self {
        self.cluster_error = Some(err);
        self
    }

    pub fn with_storage_scheme_error(mut self, err: ClientError) -> Self {
        self.storage_scheme_error = Some(err);
        self
    }

    pub fn with_ingest_scheme_error(mut self, err: ClientError) -> Self {
        self.ingest_scheme_error = Some(err);
        self
    }

    pub fn with_token_error(mut self, err: ClientError) -> Self {
        self.token_error = Some(err);
        self
    }

    pub fn with_planner(mut self, planner: impl PartitionPlanner + 'static) -> Self {
        self.planner = Box::new(planner);
        self
    }

    pub fn with_license_parser(mut self, parser: impl LicenseParser + 'static) -> Self {
        self.license_parser = Box::new(parser);
        self
    }

    /// Round-robin planner with the configured replication factor.
    pub fn with_config(self, cfg: &ClientConfig) -> Self { self.with_planner(RoundRobinPlanner::new(cfg.replication)) }

    /// Number of redistribution requests received so far.
    pub fn redistribution_requests(&self) -> u64 { self.redistributions.load(Ordering::Relaxed) }

    pub async fn node_state(&self, node: NodeId) -> NodeState {
        let cur = self.topology.current();
        self.lifecycle.lock().await.state(&cur, node)
    }

    pub fn topology_epoch(&self) -> u64 { self.topology.epoch() }

    async fn suggested(&self, kind: PartitionKind) -> ClientResult<Vec<PartitionInput>> {
        let cur = self.topology.current();
        let active = self.lifecycle.lock().await.routable(&cur);
        Ok(suggest(cur.partitions(kind), &active, self.planner.as_ref()))
    }

    async fn apply_scheme(&self, kind: PartitionKind, scheme: &[PartitionInput]) -> ClientResult<()> {
        let injected = match kind {
            PartitionKind::Storage => &self.storage_scheme_error,
            PartitionKind::Ingest => &self.ingest_scheme_error,
        };
        if let Some(e) = injected {
            return Err(e.clone());
        }
        let _in_flight = self
            .apply_guard
            .try_lock()
            .map_err(|_| ClientError::Precondition(format!("cannot apply {} partition scheme: another apply is in flight", kind)))?;
        let lifecycle = self.lifecycle.lock().await;
        self.topology
            .update(|c| {
                let parts = validate_scheme(c, kind, scheme, &lifecycle.routable(c))?;
                let mut next = c.clone();
                *next.partitions_mut(kind) = parts;
                Ok(next)
            })
            .await?;
        info!(kind = %kind, partitions = scheme.len(), "mock: partition scheme applied");
        Ok(())
    }

    async fn move_routes(&self, kind: PartitionKind, node: NodeId) -> ClientResult<()> {
        let event = NodeEvent::routes_moved(kind);
        let mut lifecycle = self.lifecycle.lock().await;
        let cur = self.topology.current();
        lifecycle.check(&cur, node, event)?;
        let candidates: Vec<NodeId> = lifecycle.routable(&cur).into_iter().filter(|id| *id != node).collect();
        let next = self
            .topology
            .update(|c| {
                let moved = move_routes_away(c.partitions(kind), node, &candidates)?;
                let mut next = c.clone();
                *next.partitions_mut(kind) = moved;
                Ok(next)
            })
            .await?;
        let state = lifecycle.transition(&cur, node, event)?;
        info!(kind = %kind, node, state = ?state, partitions = next.partitions(kind).len(), "mock: routes moved away from node");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockClient {
    async fn status(&self) -> ClientResult<StatusResponse> {
        Ok(StatusResponse { status: "OK".to_string(), version: self.version.clone() })
    }

    async fn get_cluster(&self) -> ClientResult<Cluster> {
        if let Some(e) = &self.cluster_error {
            return Err(e.clone());
        }
        Ok((*self.topology.current()).clone())
    }

    async fn test_api_token(&self) -> ClientResult<()> {
        match &self.token_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn suggested_storage_partitions(&self) -> ClientResult<Vec<PartitionInput>> {
        self.suggested(PartitionKind::Storage).await
    }

    async fn suggested_ingest_partitions(&self) -> ClientResult<Vec<PartitionInput>> {
        self.suggested(PartitionKind::Ingest).await
    }

    async fn update_storage_partition_scheme(&self, scheme: &[PartitionInput]) -> ClientResult<()> {
        self.apply_scheme(PartitionKind::Storage, scheme).await
    }

    async fn update_ingest_partition_scheme(&self, scheme: &[PartitionInput]) -> ClientResult<()> {
        self.apply_scheme(PartitionKind::Ingest, scheme).await
    }

    async fn move_storage_routes_away_from_node(&self, node: NodeId) -> ClientResult<()> {
        self.move_routes(PartitionKind::Storage, node).await
    }

    async fn move_ingest_routes_away_from_node(&self, node: NodeId) -> ClientResult<()> {
        self.move_routes(PartitionKind::Ingest, node).await
    }

    async fn start_data_redistribution(&self) -> ClientResult<()> {
        let n = self.redistributions.fetch_add(1, Ordering::Relaxed) + 1;
        info!(requests = n, "mock: data redistribution requested");
        Ok(())
    }

    async fn unregister(&self, node: NodeId) -> ClientResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let cur = self.topology.current();
        lifecycle.check(&cur, node, NodeEvent::Unregister)?;
        let next = self
            .topology
            .update(|c| {
                if c.routes_to(PartitionKind::Storage, node) || c.routes_to(PartitionKind::Ingest, node) {
                    return Err(ClientError::Precondition(format!("node {} still holds partition routes", node)));
                }
                let mut next = c.clone();
                next.nodes.retain(|n| n.id != node);
                Ok(next)
            })
            .await?;
        lifecycle.transition(&cur, node, NodeEvent::Unregister)?;
        info!(node, remaining = next.nodes.len(), "mock: node unregistered");
        Ok(())
    }

    // ---- ingest tokens ----

    async fn get_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        let res = self.ingest_tokens.get(&key).await.ok_or_else(|| {
            ClientError::NotFound(format!("could not find ingest token {} in repository {}", spec.name, spec.repository_name))
        });
        recorded("get_ingest_token", &key, t0, res)
    }

    async fn add_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        let token = self
            .ingest_tokens
            .put_with(key.clone(), |prev| {
                let secret = prev.map(|p| p.token.clone()).unwrap_or_else(new_secret);
                IngestToken::from_spec(spec, secret)
            })
            .await;
        recorded("add_ingest_token", &key, t0, Ok(token))
    }

    async fn delete_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        self.ingest_tokens.remove(&key).await;
        recorded("delete_ingest_token", &key, t0, Ok(()))
    }

    // ---- parsers ----

    async fn get_parser(&self, spec: &ParserSpec) -> ClientResult<Parser> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        let res = self.parsers.get(&key).await.ok_or_else(|| {
            ClientError::NotFound(format!("could not find parser {} in repository {}", spec.name, spec.repository_name))
        });
        recorded("get_parser", &key, t0, res)
    }

    async fn add_parser(&self, spec: &ParserSpec) -> ClientResult<Parser> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        let parser = self.parsers.put_with(key.clone(), |_| Parser::from_spec(spec)).await;
        recorded("add_parser", &key, t0, Ok(parser))
    }

    async fn delete_parser(&self, spec: &ParserSpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.repository_name, &spec.name);
        self.parsers.remove(&key).await;
        recorded("delete_parser", &key, t0, Ok(()))
    }

    // ---- repositories ----

    async fn get_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        let res = self
            .repositories
            .get(&key)
            .await
            .ok_or_else(|| ClientError::NotFound(format!("could not find repository {}", spec.name)));
        recorded("get_repository", &key, t0, res)
    }

    async fn add_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        let repo = self
            .repositories
            .put_with(key.clone(), |prev| {
                let id = prev.map(|p| p.id.clone()).unwrap_or_else(new_secret);
                Repository::from_spec(spec, id)
            })
            .await;
        recorded("add_repository", &key, t0, Ok(repo))
    }

    async fn delete_repository(&self, spec: &RepositorySpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        self.repositories.remove(&key).await;
        recorded("delete_repository", &key, t0, Ok(()))
    }

    // ---- views ----

    async fn get_view(&self, spec: &ViewSpec) -> ClientResult<View> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        let res = self.views.get(&key).await.ok_or_else(|| ClientError::NotFound(format!("could not find view {}", spec.name)));
        recorded("get_view", &key, t0, res)
    }

    async fn add_view(&self, spec: &ViewSpec) -> ClientResult<View> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        let view = self.views.put_with(key.clone(), |_| View::from_spec(spec)).await;
        recorded("add_view", &key, t0, Ok(view))
    }

    async fn delete_view(&self, spec: &ViewSpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::global(&spec.name);
        self.views.remove(&key).await;
        recorded("delete_view", &key, t0, Ok(()))
    }

    // ---- notifiers ----

    async fn get_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        let res = match self.notifiers.get(&key).await {
            Some(n) if !n.is_absent() => Ok(n),
            _ => Err(ClientError::NotFound(format!(
                "could not find notifier in view {} with name: {}",
                spec.view_name, spec.name
            ))),
        };
        recorded("get_notifier", &key, t0, res)
    }

    async fn add_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        let res = self.notifiers.try_put(key.clone(), |_| Notifier::from_action(spec)).await;
        recorded("add_notifier", &key, t0, res)
    }

    async fn delete_notifier(&self, spec: &ActionSpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        self.notifiers.remove(&key).await;
        recorded("delete_notifier", &key, t0, Ok(()))
    }

    // ---- alerts ----

    async fn get_alert(&self, spec: &AlertSpec) -> ClientResult<Alert> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        let res = self.alerts.get(&key).await.ok_or_else(|| {
            ClientError::NotFound(format!("could not find alert in view {} with name: {}", spec.view_name, spec.name))
        });
        recorded("get_alert", &key, t0, res)
    }

    async fn add_alert(&self, spec: &AlertSpec) -> ClientResult<Alert> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        let res = match resolve_action_ids(self, spec) {
            Ok(ids) => self.alerts.try_put(key.clone(), |_| Alert::from_spec(spec, &ids)).await,
            Err(e) => Err(e),
        };
        recorded("add_alert", &key, t0, res)
    }

    async fn delete_alert(&self, spec: &AlertSpec) -> ClientResult<()> {
        let t0 = Instant::now();
        let key = ScopedName::new(&spec.view_name, &spec.name);
        self.alerts.remove(&key).await;
        recorded("delete_alert", &key, t0, Ok(()))
    }

    // ---- license ----

    async fn get_license(&self) -> ClientResult<License> {
        self.license.read().await.clone().ok_or_else(|| ClientError::NotFound(NO_LICENSE_INSTALLED.to_string()))
    }

    async fn install_license(&self, license: &str) -> ClientResult<()> {
        let parsed = parse_license(self.license_parser.as_ref(), license)?;
        info!(id = %parsed.id(), expires_at = %parsed.expires_at(), "mock: license installed");
        *self.license.write().await = Some(parsed);
        Ok(())
    }
}

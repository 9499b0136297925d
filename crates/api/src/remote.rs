//! Remote client: maps every `ClusterClient` operation onto one REST call
//! made through a [`Transport`]. Preconditions (scheme validity, node
//! lifecycle, action mappings) are checked locally before anything is sent.

use std::time::{Duration, Instant};

use lumen_core::license::{parse_license, NO_LICENSE_INSTALLED};
use lumen_planner::{validate_scheme, NodeEvent, NodeLifecycle};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

/// One REST call. `path` holds raw segments; the transport escapes them.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub operation: &'static str,
    pub method: Method,
    pub path: Vec<String>,
    pub body: Option<Json>,
}

impl ApiRequest {
    pub fn new(operation: &'static str, method: Method, path: &[&str]) -> Self {
        Self { operation, method, path: path.iter().map(|s| s.to_string()).collect(), body: None }
    }

    pub fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    /// Path joined with `/`, for logs and error messages.
    pub fn resource(&self) -> String { self.path.join("/") }
}

/// Executes requests against the management API. A missing resource must be
/// reported as `ClientError::NotFound`; an empty response body as `Null`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, req: ApiRequest) -> ClientResult<Json>;
}

/// Blanket impl so a shared transport can back several clients.
#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(&self, req: ApiRequest) -> ClientResult<Json> { (**self).execute(req).await }
}

pub struct RemoteClient<T> {
    transport: T,
    license_parser: Box<dyn LicenseParser>,
    apply_guard: Mutex<()>,
    lifecycle: Mutex<NodeLifecycle>,
}

fn encode<S: serde::Serialize>(value: &S) -> ClientResult<Json> {
    serde_json::to_value(value).map_err(|e| ClientError::Parse(format!("encode request body: {}", e)))
}

impl<T: Transport> RemoteClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            license_parser: Box::new(JwtLicenseParser),
            apply_guard: Mutex::new(()),
            lifecycle: Mutex::new(NodeLifecycle::new()),
        }
    }

    pub fn with_license_parser(mut self, parser: impl LicenseParser + 'static) -> Self {
        self.license_parser = Box::new(parser);
        self
    }

    pub fn transport(&self) -> &T { &self.transport }

    async fn call<R: DeserializeOwned>(&self, req: ApiRequest) -> ClientResult<R> {
        let t0 = Instant::now();
        let op = req.operation;
        let resource = req.resource();
        let res = match self.transport.execute(req).await {
            Ok(body) => serde_json::from_value::<R>(body)
                .map_err(|e| ClientError::Parse(format!("{} {}: decode response: {}", op, resource, e))),
            Err(e) => Err(e),
        };
        observe(op, &resource, t0, &res);
        res
    }

    /// Deletes succeed when the resource is already gone.
    async fn delete(&self, req: ApiRequest) -> ClientResult<()> {
        match self.call::<Json>(req).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn apply_scheme(&self, kind: PartitionKind, scheme: &[PartitionInput]) -> ClientResult<()> {
        let _in_flight = self
            .apply_guard
            .try_lock()
            .map_err(|_| ClientError::Precondition(format!("cannot apply {} partition scheme: another apply is in flight", kind)))?;
        let lifecycle = self.lifecycle.lock().await;
        let cluster = self.get_cluster().await?;
        validate_scheme(&cluster, kind, scheme, &lifecycle.routable(&cluster))?;
        let path = format!("{}-partitions", kind);
        let req = ApiRequest::new("update_partition_scheme", Method::Post, &["api", "v1", "cluster", path.as_str()])
            .with_body(encode(&scheme)?);
        self.call::<Json>(req).await?;
        info!(kind = %kind, partitions = scheme.len(), "partition scheme applied");
        Ok(())
    }

    async fn move_routes(&self, kind: PartitionKind, node: NodeId) -> ClientResult<()> {
        let event = NodeEvent::routes_moved(kind);
        let mut lifecycle = self.lifecycle.lock().await;
        let cluster = self.get_cluster().await?;
        lifecycle.check(&cluster, node, event)?;
        let id = node.to_string();
        let action = format!("{}-routes", kind);
        let req = ApiRequest::new(
            "move_routes_away_from_node",
            Method::Post,
            &["api", "v1", "cluster", "nodes", id.as_str(), action.as_str(), "move-away"],
        );
        self.call::<Json>(req).await?;
        let state = lifecycle.transition(&cluster, node, event)?;
        info!(kind = %kind, node, state = ?state, "routes moved away from node");
        Ok(())
    }
}

#[async_trait::async_trait]
impl<T: Transport> ClusterClient for RemoteClient<T> {
    async fn status(&self) -> ClientResult<StatusResponse> {
        self.call(ApiRequest::new("status", Method::Get, &["api", "v1", "status"])).await
    }

    async fn get_cluster(&self) -> ClientResult<Cluster> {
        self.call(ApiRequest::new("get_cluster", Method::Get, &["api", "v1", "cluster"])).await
    }

    async fn test_api_token(&self) -> ClientResult<()> {
        self.call::<Json>(ApiRequest::new("test_api_token", Method::Get, &["api", "v1", "token"])).await.map(|_| ())
    }

    async fn suggested_storage_partitions(&self) -> ClientResult<Vec<PartitionInput>> {
        let req = ApiRequest::new("suggested_partitions", Method::Get, &["api", "v1", "cluster", "storage-partitions", "suggested"]);
        self.call(req).await
    }

    async fn suggested_ingest_partitions(&self) -> ClientResult<Vec<PartitionInput>> {
        let req = ApiRequest::new("suggested_partitions", Method::Get, &["api", "v1", "cluster", "ingest-partitions", "suggested"]);
        self.call(req).await
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
        let req = ApiRequest::new("start_data_redistribution", Method::Post, &["api", "v1", "cluster", "redistribute"]);
        self.call::<Json>(req).await.map(|_| ())
    }

    async fn unregister(&self, node: NodeId) -> ClientResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let cluster = self.get_cluster().await?;
        lifecycle.check(&cluster, node, NodeEvent::Unregister)?;
        if cluster.routes_to(PartitionKind::Storage, node) || cluster.routes_to(PartitionKind::Ingest, node) {
            return Err(ClientError::Precondition(format!("node {} still holds partition routes", node)));
        }
        let id = node.to_string();
        self.call::<Json>(ApiRequest::new("unregister", Method::Delete, &["api", "v1", "cluster", "nodes", id.as_str()])).await?;
        lifecycle.transition(&cluster, node, NodeEvent::Unregister)?;
        info!(node, "node unregistered");
        Ok(())
    }

    // ---- ingest tokens ----

    async fn get_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "ingest-tokens", spec.name.as_str()];
        self.call(ApiRequest::new("get_ingest_token", Method::Get, &path)).await
    }

    async fn add_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<IngestToken> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "ingest-tokens", spec.name.as_str()];
        let body = json!({ "name": spec.name, "parser": spec.parser_name });
        self.call(ApiRequest::new("add_ingest_token", Method::Put, &path).with_body(body)).await
    }

    async fn delete_ingest_token(&self, spec: &IngestTokenSpec) -> ClientResult<()> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "ingest-tokens", spec.name.as_str()];
        self.delete(ApiRequest::new("delete_ingest_token", Method::Delete, &path)).await
    }

    // ---- parsers ----

    async fn get_parser(&self, spec: &ParserSpec) -> ClientResult<Parser> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "parsers", spec.name.as_str()];
        self.call(ApiRequest::new("get_parser", Method::Get, &path)).await
    }

    async fn add_parser(&self, spec: &ParserSpec) -> ClientResult<Parser> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "parsers", spec.name.as_str()];
        let body = encode(&Parser::from_spec(spec))?;
        self.call(ApiRequest::new("add_parser", Method::Put, &path).with_body(body)).await
    }

    async fn delete_parser(&self, spec: &ParserSpec) -> ClientResult<()> {
        let path = ["api", "v1", "repositories", spec.repository_name.as_str(), "parsers", spec.name.as_str()];
        self.delete(ApiRequest::new("delete_parser", Method::Delete, &path)).await
    }

    // ---- repositories ----

    async fn get_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository> {
        self.call(ApiRequest::new("get_repository", Method::Get, &["api", "v1", "repositories", spec.name.as_str()])).await
    }

    async fn add_repository(&self, spec: &RepositorySpec) -> ClientResult<Repository> {
        let body = encode(spec)?;
        let req = ApiRequest::new("add_repository", Method::Put, &["api", "v1", "repositories", spec.name.as_str()]).with_body(body);
        self.call(req).await
    }

    async fn delete_repository(&self, spec: &RepositorySpec) -> ClientResult<()> {
        self.delete(ApiRequest::new("delete_repository", Method::Delete, &["api", "v1", "repositories", spec.name.as_str()])).await
    }

    // ---- views ----

    async fn get_view(&self, spec: &ViewSpec) -> ClientResult<View> {
        self.call(ApiRequest::new("get_view", Method::Get, &["api", "v1", "views", spec.name.as_str()])).await
    }

    async fn add_view(&self, spec: &ViewSpec) -> ClientResult<View> {
        let body = encode(&View::from_spec(spec))?;
        self.call(ApiRequest::new("add_view", Method::Put, &["api", "v1", "views", spec.name.as_str()]).with_body(body)).await
    }

    async fn delete_view(&self, spec: &ViewSpec) -> ClientResult<()> {
        self.delete(ApiRequest::new("delete_view", Method::Delete, &["api", "v1", "views", spec.name.as_str()])).await
    }

    // ---- notifiers ----

    async fn get_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier> {
        let path = ["api", "v1", "views", spec.view_name.as_str(), "actions", spec.name.as_str()];
        let not_found = || {
            ClientError::NotFound(format!("could not find notifier in view {} with name: {}", spec.view_name, spec.name))
        };
        match self.call::<Notifier>(ApiRequest::new("get_notifier", Method::Get, &path)).await {
            Ok(n) if n.is_absent() => Err(not_found()),
            Ok(n) => Ok(n),
            Err(e) if e.is_not_found() => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    async fn add_notifier(&self, spec: &ActionSpec) -> ClientResult<Notifier> {
        let notifier = Notifier::from_action(spec)?;
        let path = ["api", "v1", "views", spec.view_name.as_str(), "actions", spec.name.as_str()];
        self.call(ApiRequest::new("add_notifier", Method::Put, &path).with_body(encode(&notifier)?)).await
    }

    async fn delete_notifier(&self, spec: &ActionSpec) -> ClientResult<()> {
        let path = ["api", "v1", "views", spec.view_name.as_str(), "actions", spec.name.as_str()];
        self.delete(ApiRequest::new("delete_notifier", Method::Delete, &path)).await
    }

    // ---- alerts ----

    async fn get_alert(&self, spec: &AlertSpec) -> ClientResult<Alert> {
        let path = ["api", "v1", "views", spec.view_name.as_str(), "alerts", spec.name.as_str()];
        self.call(ApiRequest::new("get_alert", Method::Get, &path)).await
    }

    async fn add_alert(&self, spec: &AlertSpec) -> ClientResult<Alert> {
        let ids = resolve_action_ids(self, spec)?;
        let alert = Alert::from_spec(spec, &ids)?;
        let path = ["api", "v1", "views", spec.view_name.as_str(), "alerts", spec.name.as_str()];
        self.call(ApiRequest::new("add_alert", Method::Put, &path).with_body(encode(&alert)?)).await
    }

    async fn delete_alert(&self, spec: &AlertSpec) -> ClientResult<()> {
        let path = ["api", "v1", "views", spec.view_name.as_str(), "alerts", spec.name.as_str()];
        self.delete(ApiRequest::new("delete_alert", Method::Delete, &path)).await
    }

    // ---- license ----

    async fn get_license(&self) -> ClientResult<License> {
        match self.call(ApiRequest::new("get_license", Method::Get, &["api", "v1", "license"])).await {
            Err(e) if e.is_not_found() => Err(ClientError::NotFound(NO_LICENSE_INSTALLED.to_string())),
            other => other,
        }
    }

    async fn install_license(&self, license: &str) -> ClientResult<()> {
        let parsed = parse_license(self.license_parser.as_ref(), license)?;
        let req = ApiRequest::new("install_license", Method::Put, &["api", "v1", "license"])
            .with_body(json!({ "license": license.trim() }));
        self.call::<Json>(req).await?;
        info!(id = %parsed.id(), expires_at = %parsed.expires_at(), "license installed");
        Ok(())
    }
}

/// reqwest-backed transport. Adds the bearer token to every request when one
/// is configured.
pub struct HttpTransport {
    http: reqwest::Client,
    base: url::Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base: url::Url, token: Option<String>, timeout: Duration) -> ClientResult<Self> {
        if base.cannot_be_a_base() {
            return Err(ClientError::Precondition(format!("base url {} cannot carry a path", base)));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Precondition(format!("http client: {}", e)))?;
        Ok(Self { http, base, token })
    }

    /// Build from config; `fallback` is used when no base URL is configured.
    pub fn from_config(cfg: &ClientConfig, fallback: Option<url::Url>) -> ClientResult<Self> {
        let base = cfg
            .base_url
            .clone()
            .or(fallback)
            .ok_or_else(|| ClientError::Precondition("no base url configured".to_string()))?;
        Self::new(base, cfg.api_token.clone(), cfg.timeout)
    }

    pub fn base(&self) -> &url::Url { &self.base }

    fn url_for(&self, path: &[String]) -> ClientResult<url::Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Precondition(format!("base url {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, req: ApiRequest) -> ClientResult<Json> {
        let url = self.url_for(&req.path)?;
        let resource = req.resource();
        let mut builder = match req.method {
            Method::Get => self.http.get(url.clone()),
            Method::Put => self.http.put(url.clone()),
            Method::Post => self.http.post(url.clone()),
            Method::Delete => self.http.delete(url.clone()),
        };
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        debug!(op = req.operation, url = %url, "http request");
        let resp = builder.send().await.map_err(|e| ClientError::remote(req.operation, &resource, e))?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("{} not found", resource)));
        }
        let text = resp.text().await.map_err(|e| ClientError::remote(req.operation, &resource, e))?;
        if !status.is_success() {
            return Err(ClientError::remote(req.operation, &resource, format!("status {}: {}", status, text.trim())));
        }
        if text.trim().is_empty() {
            return Ok(Json::Null);
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Parse(format!("{} {}: {}", req.operation, resource, e)))
    }
}

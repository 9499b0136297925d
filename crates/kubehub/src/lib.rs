//! Lumen kubehub: find the pods backing a managed cluster and pick a
//! management endpoint that actually answers.

#![forbid(unsafe_code)]

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client,
};
use lumen_core::{ClientError, ClientResult, ClusterRef};
use metrics::counter;
use tracing::{debug, info, warn};
use url::Url;

/// Label the operator puts on every pod of a cluster, valued with the
/// cluster name.
pub const DEFAULT_INSTANCE_LABEL: &str = "lumen_cr";

/// Label selector matching the pods of `cluster`.
pub fn pod_selector(label: &str, cluster: &ClusterRef) -> String { format!("{}={}", label, cluster.name) }

/// List the pods of `cluster` in its namespace, selected by `label`.
pub async fn list_cluster_pods(client: Client, cluster: &ClusterRef, label: &str) -> Result<Vec<Pod>> {
    let api: Api<Pod> = Api::namespaced(client, &cluster.namespace);
    let lp = ListParams::default().labels(&pod_selector(label, cluster));
    let list = api.list(&lp).await.context("could not list pods for cluster")?;
    debug!(cluster = %cluster.name, ns = %cluster.namespace, pods = list.items.len(), "listed cluster pods");
    Ok(list.items)
}

/// IPv6 literals need brackets inside a URL authority.
fn url_host(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
        _ => ip.to_string(),
    }
}

/// Management URLs of pods that could serve requests: pods being deleted and
/// pods without an IP are skipped. Order follows `pods`.
pub fn candidate_endpoints(pods: &[Pod], cluster: &ClusterRef) -> Vec<Url> {
    pods.iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .filter_map(|p| p.status.as_ref()?.pod_ip.as_deref().filter(|ip| !ip.is_empty()))
        .filter_map(|ip| {
            let raw = format!("{}://{}:{}/", cluster.scheme(), url_host(ip), cluster.port());
            match Url::parse(&raw) {
                Ok(u) => Some(u),
                Err(e) => {
                    warn!(endpoint = %raw, error = %e, "skipping unparsable pod endpoint");
                    None
                }
            }
        })
        .collect()
}

/// Reachability check for one endpoint.
#[async_trait::async_trait]
pub trait EndpointProber: Send + Sync {
    /// True when the endpoint answers with HTTP 200.
    async fn probe(&self, endpoint: &Url) -> bool;
}

pub struct HttpProber {
    http: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build().context("building probe client")?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl EndpointProber for HttpProber {
    async fn probe(&self, endpoint: &Url) -> bool {
        match self.http.get(endpoint.clone()).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                info!(endpoint = %endpoint, error = %e, "management API is unavailable");
                false
            }
        }
    }
}

/// First candidate whose probe succeeds. Best effort: the result may be
/// stale by the time it is used.
pub async fn resolve_base_url(candidates: &[Url], prober: &dyn EndpointProber) -> ClientResult<Url> {
    for endpoint in candidates {
        let ok = prober.probe(endpoint).await;
        counter!("endpoint_probes_total", 1u64, "ok" => if ok { "true" } else { "false" });
        if ok {
            info!(endpoint = %endpoint, "resolved management endpoint");
            return Ok(endpoint.clone());
        }
    }
    Err(ClientError::NotFound("did not find a valid base URL".to_string()))
}

/// List, filter and probe in one go.
pub async fn discover_base_url(
    client: Client,
    cluster: &ClusterRef,
    label: &str,
    prober: &dyn EndpointProber,
) -> Result<Url> {
    let pods = list_cluster_pods(client, cluster, label).await?;
    let candidates = candidate_endpoints(&pods, cluster);
    Ok(resolve_base_url(&candidates, prober).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::HashSet;

    fn pod(name: &str, ip: Option<&str>, deleting: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                deletion_timestamp: deleting.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            status: Some(PodStatus { pod_ip: ip.map(str::to_string), ..Default::default() }),
            ..Default::default()
        }
    }

    struct Reachable(HashSet<String>);

    #[async_trait::async_trait]
    impl EndpointProber for Reachable {
        async fn probe(&self, endpoint: &Url) -> bool { self.0.contains(endpoint.as_str()) }
    }

    fn cluster() -> ClusterRef { ClusterRef::new("logs", "obs") }

    #[test]
    fn skips_deleting_and_ipless_pods() {
        let pods = vec![
            pod("a", Some("10.0.0.1"), true),
            pod("b", None, false),
            pod("c", Some(""), false),
            pod("d", Some("10.0.0.4"), false),
        ];
        let urls = candidate_endpoints(&pods, &cluster());
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "http://10.0.0.4:8080/");
    }

    #[test]
    fn ipv6_pod_addresses_are_bracketed() {
        let pods = vec![pod("a", Some("fd00::1:7"), false), pod("b", Some("10.0.0.2"), false)];
        let urls = candidate_endpoints(&pods, &cluster());
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "http://[fd00::1:7]:8080/");
        assert_eq!(urls[0].port(), Some(8080));
        assert_eq!(urls[1].as_str(), "http://10.0.0.2:8080/");
    }

    #[test]
    fn selector_uses_the_given_label() {
        assert_eq!(pod_selector(DEFAULT_INSTANCE_LABEL, &cluster()), "lumen_cr=logs");
        assert_eq!(pod_selector("app.kubernetes.io/instance", &cluster()), "app.kubernetes.io/instance=logs");
    }

    #[tokio::test]
    async fn first_reachable_endpoint_wins() {
        let pods = vec![pod("a", Some("10.0.0.1"), false), pod("b", Some("10.0.0.2"), false), pod("c", Some("10.0.0.3"), false)];
        let candidates = candidate_endpoints(&pods, &cluster());
        let prober = Reachable(["http://10.0.0.2:8080/", "http://10.0.0.3:8080/"].iter().map(|s| s.to_string()).collect());
        let url = resolve_base_url(&candidates, &prober).await.unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.2:8080/");
    }

    #[tokio::test]
    async fn nothing_reachable_is_not_found() {
        let candidates = candidate_endpoints(&[pod("a", Some("10.0.0.1"), false)], &cluster());
        let err = resolve_base_url(&candidates, &Reachable(HashSet::new())).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "did not find a valid base URL");
    }
}

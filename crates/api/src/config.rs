//! Client configuration read from the environment.

use std::time::Duration;

use lumen_core::{ClientError, ClientResult};

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REPLICATION: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Management endpoint. When unset, callers derive it from the cluster
    /// reference or resolve it through pod discovery.
    pub base_url: Option<url::Url>,
    pub api_token: Option<String>,
    pub timeout: Duration,
    /// Replication factor used by the in-process planner.
    pub replication: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            replication: DEFAULT_REPLICATION,
        }
    }
}

impl ClientConfig {
    /// `LUMEN_BASE_URL`, `LUMEN_API_TOKEN`, `LUMEN_HTTP_TIMEOUT_SECS`,
    /// `LUMEN_REPLICATION`.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let base_url = match get("LUMEN_BASE_URL").filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                url::Url::parse(&raw).map_err(|e| ClientError::Precondition(format!("LUMEN_BASE_URL {:?}: {}", raw, e)))?,
            ),
            None => None,
        };
        let api_token = get("LUMEN_API_TOKEN").filter(|s| !s.is_empty());
        let timeout_secs = get("LUMEN_HTTP_TIMEOUT_SECS").and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let replication = get("LUMEN_REPLICATION").and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_REPLICATION);
        Ok(Self { base_url, api_token, timeout: Duration::from_secs(timeout_secs), replication: replication.max(1) })
    }
}

//! Desired-state specs handed in by the reconciliation loop.
//!
//! Field names follow the custom resources they are read from (camelCase).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngestTokenSpec {
    pub name: String,
    pub repository_name: String,
    #[serde(default)]
    pub parser_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParserTestCase {
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParserSpec {
    pub name: String,
    pub repository_name: String,
    #[serde(default)]
    pub parser_script: String,
    #[serde(default)]
    pub tag_fields: Vec<String>,
    #[serde(default)]
    pub test_data: Vec<ParserTestCase>,
}

/// Retention controls. Zero disables the respective limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSpec {
    #[serde(default)]
    pub time_in_days: u32,
    #[serde(default)]
    pub ingest_size_in_gb: u32,
    #[serde(default)]
    pub storage_size_in_gb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub retention: RetentionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewConnectionSpec {
    pub repository_name: String,
    #[serde(default)]
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    pub name: String,
    #[serde(default)]
    pub connections: Vec<ViewConnectionSpec>,
}

// ---- actions ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmailProperties {
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject_template: Option<String>,
    #[serde(default)]
    pub body_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryProperties {
    pub ingest_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpsGenieProperties {
    #[serde(default)]
    pub api_url: Option<String>,
    pub genie_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyProperties {
    pub routing_key: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlackProperties {
    pub url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlackPostMessageProperties {
    pub api_token: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VictorOpsProperties {
    pub message_type: String,
    pub notify_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebhookProperties {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
}

/// An alert action. Exactly one of the property blocks must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub name: String,
    pub view_name: String,
    #[serde(default)]
    pub email: Option<EmailProperties>,
    #[serde(default)]
    pub humio_repository: Option<RepositoryProperties>,
    #[serde(default)]
    pub ops_genie: Option<OpsGenieProperties>,
    #[serde(default)]
    pub pager_duty: Option<PagerDutyProperties>,
    #[serde(default)]
    pub slack: Option<SlackProperties>,
    #[serde(default)]
    pub slack_post_message: Option<SlackPostMessageProperties>,
    #[serde(default)]
    pub victor_ops: Option<VictorOpsProperties>,
    #[serde(default)]
    pub webhook: Option<WebhookProperties>,
}

// ---- alerts ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub query_string: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertSpec {
    pub name: String,
    pub view_name: String,
    pub query: QuerySpec,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub throttle_time_millis: u64,
    #[serde(default)]
    pub silenced: bool,
    /// Names of the actions (notifiers) triggered by this alert.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_read_camel_case_with_defaults() {
        let raw = serde_json::json!({
            "name": "errors",
            "viewName": "app",
            "query": { "queryString": "level=error" },
            "actions": ["page-oncall"],
        });
        let spec: AlertSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.view_name, "app");
        assert_eq!(spec.query.start, None);
        assert_eq!(spec.actions, vec!["page-oncall".to_string()]);
        assert!(!spec.silenced);
    }

    #[test]
    fn repository_retention_defaults_to_zero() {
        let spec: RepositorySpec = serde_json::from_value(serde_json::json!({ "name": "audit" })).unwrap();
        assert_eq!(spec.retention, RetentionSpec::default());
    }
}

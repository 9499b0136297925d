//! Cluster-side representations of managed resources and the pure mappings
//! from desired-state specs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::identify;
use crate::spec::{
    ActionSpec, AlertSpec, EmailProperties, IngestTokenSpec, OpsGenieProperties, PagerDutyProperties, ParserSpec,
    ParserTestCase, RepositoryProperties, RepositorySpec, SlackPostMessageProperties, SlackProperties,
    VictorOpsProperties, ViewSpec, WebhookProperties,
};
use crate::{ClientError, ClientResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IngestToken {
    pub name: String,
    pub assigned_parser: Option<String>,
    /// Opaque secret; generated by the cluster on creation.
    pub token: String,
}

impl IngestToken {
    pub fn from_spec(spec: &IngestTokenSpec, token: String) -> Self {
        Self { name: spec.name.clone(), assigned_parser: spec.parser_name.clone(), token }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Parser {
    pub name: String,
    pub script: String,
    pub tag_fields: Vec<String>,
    pub tests: Vec<ParserTestCase>,
}

impl Parser {
    pub fn from_spec(spec: &ParserSpec) -> Self {
        Self {
            name: spec.name.clone(),
            script: spec.parser_script.clone(),
            tag_fields: spec.tag_fields.clone(),
            tests: spec.test_data.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Assigned by the cluster, never by the caller.
    pub id: String,
    pub name: String,
    pub description: String,
    pub retention_days: f64,
    pub ingest_retention_size_gb: f64,
    pub storage_retention_size_gb: f64,
}

impl Repository {
    pub fn from_spec(spec: &RepositorySpec, id: String) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            description: spec.description.clone(),
            retention_days: f64::from(spec.retention.time_in_days),
            ingest_retention_size_gb: f64::from(spec.retention.ingest_size_in_gb),
            storage_retention_size_gb: f64::from(spec.retention.storage_size_in_gb),
        }
    }

    /// Compare everything the spec controls, ignoring the generated ID.
    pub fn matches(&self, other: &Repository) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.retention_days == other.retention_days
            && self.ingest_retention_size_gb == other.ingest_retention_size_gb
            && self.storage_retention_size_gb == other.storage_retention_size_gb
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewConnection {
    pub repo_name: String,
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub name: String,
    pub connections: Vec<ViewConnection>,
}

impl View {
    pub fn from_spec(spec: &ViewSpec) -> Self {
        Self {
            name: spec.name.clone(),
            connections: spec
                .connections
                .iter()
                .map(|c| ViewConnection { repo_name: c.repository_name.clone(), filter: c.filter.clone() })
                .collect(),
        }
    }
}

// ---- notifiers ----

pub const PAGER_DUTY_SEVERITIES: [&str; 4] = ["critical", "error", "warning", "info"];
pub const WEBHOOK_METHODS: [&str; 4] = ["GET", "POST", "PUT", "PATCH"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "entity", rename_all = "camelCase")]
pub enum NotifierConfig {
    Email(EmailProperties),
    Repository(RepositoryProperties),
    OpsGenie(OpsGenieProperties),
    PagerDuty(PagerDutyProperties),
    Slack(SlackProperties),
    SlackPostMessage(SlackPostMessageProperties),
    VictorOps(VictorOpsProperties),
    Webhook(WebhookProperties),
}

impl NotifierConfig {
    pub fn entity(&self) -> &'static str {
        match self {
            NotifierConfig::Email(_) => "EmailNotifier",
            NotifierConfig::Repository(_) => "HumioRepoNotifier",
            NotifierConfig::OpsGenie(_) => "OpsGenieNotifier",
            NotifierConfig::PagerDuty(_) => "PagerDutyNotifier",
            NotifierConfig::Slack(_) => "SlackNotifier",
            NotifierConfig::SlackPostMessage(_) => "SlackPostMessageNotifier",
            NotifierConfig::VictorOps(_) => "VictorOpsNotifier",
            NotifierConfig::Webhook(_) => "WebHookNotifier",
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self { NotifierConfig::Email(EmailProperties::default()) }
}

/// A notifier as stored by the cluster. An empty `name` means "absent".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Notifier {
    pub id: String,
    pub name: String,
    pub config: NotifierConfig,
}

impl Notifier {
    pub fn is_absent(&self) -> bool { self.name.is_empty() }

    /// Build a notifier from an action, validating kind-specific properties.
    pub fn from_action(action: &ActionSpec) -> ClientResult<Self> {
        let config = notifier_config(action).map_err(|msg| {
            ClientError::Precondition(format!("action {} in view {}: {}", action.name, action.view_name, msg))
        })?;
        Ok(Self { id: identify(action.name.as_bytes()), name: action.name.clone(), config })
    }
}

fn notifier_config(action: &ActionSpec) -> Result<NotifierConfig, String> {
    let mut found: Vec<NotifierConfig> = Vec::with_capacity(1);
    if let Some(p) = &action.email {
        if p.recipients.is_empty() {
            return Err("email action requires at least one recipient".into());
        }
        found.push(NotifierConfig::Email(p.clone()));
    }
    if let Some(p) = &action.humio_repository {
        if p.ingest_token.is_empty() {
            return Err("repository action requires an ingest token".into());
        }
        found.push(NotifierConfig::Repository(p.clone()));
    }
    if let Some(p) = &action.ops_genie {
        if p.genie_key.is_empty() {
            return Err("ops genie action requires a genie key".into());
        }
        let mut p = p.clone();
        if p.api_url.as_deref().unwrap_or("").is_empty() {
            p.api_url = Some("https://api.opsgenie.com".into());
        }
        found.push(NotifierConfig::OpsGenie(p));
    }
    if let Some(p) = &action.pager_duty {
        if p.routing_key.is_empty() {
            return Err("pager duty action requires a routing key".into());
        }
        let severity = p.severity.to_lowercase();
        if !PAGER_DUTY_SEVERITIES.contains(&severity.as_str()) {
            return Err(format!("unsupported severity {:?}, expected one of {:?}", p.severity, PAGER_DUTY_SEVERITIES));
        }
        found.push(NotifierConfig::PagerDuty(PagerDutyProperties { routing_key: p.routing_key.clone(), severity }));
    }
    if let Some(p) = &action.slack {
        if p.url.is_empty() {
            return Err("slack action requires a webhook url".into());
        }
        found.push(NotifierConfig::Slack(p.clone()));
    }
    if let Some(p) = &action.slack_post_message {
        if p.api_token.is_empty() || p.channels.is_empty() {
            return Err("slack post message action requires an api token and at least one channel".into());
        }
        found.push(NotifierConfig::SlackPostMessage(p.clone()));
    }
    if let Some(p) = &action.victor_ops {
        if p.notify_url.is_empty() {
            return Err("victor ops action requires a notify url".into());
        }
        found.push(NotifierConfig::VictorOps(p.clone()));
    }
    if let Some(p) = &action.webhook {
        if p.url.is_empty() {
            return Err("webhook action requires a url".into());
        }
        let mut p = p.clone();
        let method = p.method.as_deref().unwrap_or("POST").to_uppercase();
        if !WEBHOOK_METHODS.contains(&method.as_str()) {
            return Err(format!("unsupported webhook method {:?}", method));
        }
        p.method = Some(method);
        found.push(NotifierConfig::Webhook(p));
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err("no action properties specified".into()),
        n => Err(format!("found {} action property blocks, expected exactly one", n)),
    }
}

// ---- alerts ----

pub const DEFAULT_QUERY_START: &str = "24h";
pub const DEFAULT_QUERY_END: &str = "now";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    pub query_string: String,
    pub start: String,
    pub end: String,
    pub is_live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub name: String,
    pub description: String,
    pub query: AlertQuery,
    pub throttle_time_millis: u64,
    pub silenced: bool,
    /// Notifier IDs, in the order the actions appear in the spec.
    pub notifiers: Vec<String>,
    pub labels: Vec<String>,
}

impl Alert {
    /// Build an alert from its spec and a resolved action name → ID mapping.
    /// Every referenced action must be present in the mapping.
    pub fn from_spec(spec: &AlertSpec, action_ids: &BTreeMap<String, String>) -> ClientResult<Self> {
        let mut notifiers = Vec::with_capacity(spec.actions.len());
        for action in &spec.actions {
            let id = action_ids.get(action).ok_or_else(|| {
                ClientError::Precondition(format!(
                    "alert {} in view {}: no id resolved for action {}",
                    spec.name, spec.view_name, action
                ))
            })?;
            notifiers.push(id.clone());
        }
        let q = &spec.query;
        Ok(Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            query: AlertQuery {
                query_string: q.query_string.clone(),
                start: q.start.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_QUERY_START.to_string()),
                end: q.end.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_QUERY_END.to_string()),
                is_live: q.is_live.unwrap_or(true),
            },
            throttle_time_millis: spec.throttle_time_millis,
            silenced: spec.silenced,
            notifiers,
            labels: spec.labels.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::action_ids;
    use crate::spec::{QuerySpec, RetentionSpec, ViewConnectionSpec};

    fn slack_action(name: &str) -> ActionSpec {
        ActionSpec {
            name: name.into(),
            view_name: "app".into(),
            slack: Some(SlackProperties { url: "https://hooks.example/x".into(), fields: BTreeMap::new() }),
            ..Default::default()
        }
    }

    #[test]
    fn repository_maps_retention_to_floats() {
        let spec = RepositorySpec {
            name: "audit".into(),
            description: "audit trail".into(),
            retention: RetentionSpec { time_in_days: 30, ingest_size_in_gb: 5, storage_size_in_gb: 1 },
        };
        let r = Repository::from_spec(&spec, "id-1".into());
        assert_eq!(r.retention_days, 30.0);
        assert_eq!(r.ingest_retention_size_gb, 5.0);
        assert_eq!(r.storage_retention_size_gb, 1.0);
        assert!(r.matches(&Repository::from_spec(&spec, "id-2".into())));
    }

    #[test]
    fn view_keeps_connection_order() {
        let spec = ViewSpec {
            name: "all".into(),
            connections: vec![
                ViewConnectionSpec { repository_name: "b".into(), filter: "*".into() },
                ViewConnectionSpec { repository_name: "a".into(), filter: "host=x".into() },
            ],
        };
        let v = View::from_spec(&spec);
        assert_eq!(v.connections[0].repo_name, "b");
        assert_eq!(v.connections[1].filter, "host=x");
    }

    #[test]
    fn notifier_id_is_content_addressed_by_name() {
        let n = Notifier::from_action(&slack_action("chat")).unwrap();
        assert_eq!(n.id, identify(b"chat"));
        assert_eq!(n.config.entity(), "SlackNotifier");
    }

    #[test]
    fn notifier_requires_exactly_one_property_block() {
        let mut a = slack_action("x");
        a.webhook = Some(WebhookProperties { url: "https://h".into(), ..Default::default() });
        assert!(Notifier::from_action(&a).unwrap_err().is_precondition());

        let empty = ActionSpec { name: "y".into(), view_name: "v".into(), ..Default::default() };
        assert!(Notifier::from_action(&empty).unwrap_err().is_precondition());
    }

    #[test]
    fn pager_duty_severity_is_validated_and_normalized() {
        let mut a = ActionSpec { name: "pd".into(), view_name: "v".into(), ..Default::default() };
        a.pager_duty = Some(PagerDutyProperties { routing_key: "rk".into(), severity: "Critical".into() });
        let n = Notifier::from_action(&a).unwrap();
        assert_eq!(n.config, NotifierConfig::PagerDuty(PagerDutyProperties { routing_key: "rk".into(), severity: "critical".into() }));

        a.pager_duty = Some(PagerDutyProperties { routing_key: "rk".into(), severity: "meh".into() });
        assert!(Notifier::from_action(&a).is_err());
    }

    #[test]
    fn webhook_method_defaults_to_post() {
        let mut a = ActionSpec { name: "hook".into(), view_name: "v".into(), ..Default::default() };
        a.webhook = Some(WebhookProperties { url: "https://h".into(), ..Default::default() });
        match Notifier::from_action(&a).unwrap().config {
            NotifierConfig::Webhook(p) => assert_eq!(p.method.as_deref(), Some("POST")),
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn alert_resolves_notifiers_in_spec_order_with_query_defaults() {
        let spec = AlertSpec {
            name: "errors".into(),
            view_name: "app".into(),
            query: QuerySpec { query_string: "level=error".into(), ..Default::default() },
            actions: vec!["b".into(), "a".into()],
            ..Default::default()
        };
        let ids = action_ids(&spec).unwrap();
        let alert = Alert::from_spec(&spec, &ids).unwrap();
        assert_eq!(alert.notifiers, vec![identify(b"b"), identify(b"a")]);
        assert_eq!(alert.query.start, DEFAULT_QUERY_START);
        assert_eq!(alert.query.end, DEFAULT_QUERY_END);
        assert!(alert.query.is_live);
    }

    #[test]
    fn alert_with_unresolved_action_fails() {
        let spec = AlertSpec { name: "x".into(), view_name: "v".into(), actions: vec!["missing".into()], ..Default::default() };
        assert!(Alert::from_spec(&spec, &BTreeMap::new()).unwrap_err().is_precondition());
    }
}

use std::sync::{Arc, Mutex, OnceLock};

use lumen_api::*;
use lumen_core::spec::EmailProperties;
use metrics::{Counter, CounterFn, Gauge, Histogram, Key, KeyName, Recorder, SharedString, Unit};

/// Collects the `op` label of every `client_requests_total` increment.
#[derive(Default)]
struct OpLog(Mutex<Vec<String>>);

struct OpCounter {
    op: String,
    log: Arc<OpLog>,
}

impl CounterFn for OpCounter {
    fn increment(&self, _value: u64) { self.log.0.lock().unwrap().push(self.op.clone()); }

    fn absolute(&self, _value: u64) {}
}

struct OpRecorder(Arc<OpLog>);

impl Recorder for OpRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key) -> Counter {
        if key.name() != "client_requests_total" {
            return Counter::noop();
        }
        match key.labels().find(|l| l.key() == "op") {
            Some(l) => Counter::from_arc(Arc::new(OpCounter { op: l.value().to_string(), log: Arc::clone(&self.0) })),
            None => Counter::noop(),
        }
    }

    fn register_gauge(&self, _key: &Key) -> Gauge { Gauge::noop() }

    fn register_histogram(&self, _key: &Key) -> Histogram { Histogram::noop() }
}

fn op_log() -> Arc<OpLog> {
    static LOG: OnceLock<Arc<OpLog>> = OnceLock::new();
    Arc::clone(LOG.get_or_init(|| {
        let log = Arc::new(OpLog::default());
        metrics::set_boxed_recorder(Box::new(OpRecorder(Arc::clone(&log)))).unwrap();
        log
    }))
}

#[tokio::test]
async fn every_resource_operation_is_recorded() {
    let log = op_log();
    let c = MockClient::new(Cluster::default(), "1.0");

    let token = IngestTokenSpec { name: "t".into(), repository_name: "logs".into(), parser_name: None };
    c.add_ingest_token(&token).await.unwrap();
    c.get_ingest_token(&token).await.unwrap();
    c.delete_ingest_token(&token).await.unwrap();

    let parser = ParserSpec { name: "p".into(), repository_name: "logs".into(), ..Default::default() };
    c.add_parser(&parser).await.unwrap();
    c.get_parser(&parser).await.unwrap();
    c.delete_parser(&parser).await.unwrap();

    let repo = RepositorySpec { name: "logs".into(), ..Default::default() };
    c.add_repository(&repo).await.unwrap();
    c.get_repository(&repo).await.unwrap();
    c.delete_repository(&repo).await.unwrap();

    let view = ViewSpec { name: "all".into(), ..Default::default() };
    c.add_view(&view).await.unwrap();
    c.get_view(&view).await.unwrap();
    c.delete_view(&view).await.unwrap();

    let action = ActionSpec {
        name: "page".into(),
        view_name: "ops".into(),
        email: Some(EmailProperties { recipients: vec!["ops@example.com".into()], ..Default::default() }),
        ..Default::default()
    };
    c.add_notifier(&action).await.unwrap();
    c.get_notifier(&action).await.unwrap();

    let alert = AlertSpec { name: "a".into(), view_name: "ops".into(), actions: vec!["page".into()], ..Default::default() };
    c.add_alert(&alert).await.unwrap();
    c.get_alert(&alert).await.unwrap();
    c.delete_alert(&alert).await.unwrap();
    c.delete_notifier(&action).await.unwrap();
    assert!(c.get_view(&view).await.unwrap_err().is_not_found());

    let seen = log.0.lock().unwrap().clone();
    for kind in ["ingest_token", "parser", "repository", "view", "notifier", "alert"] {
        for verb in ["add", "get", "delete"] {
            let op = format!("{}_{}", verb, kind);
            assert!(seen.contains(&op), "{} was not recorded", op);
        }
    }
    assert_eq!(seen.iter().filter(|op| *op == "get_view").count(), 2);
}

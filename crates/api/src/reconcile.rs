//! One reconciliation step per resource: read the current representation,
//! compare it to the spec and issue at most one write.

use std::time::Instant;

use tracing::info;

use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desired {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

/// A desired-state spec the client knows how to read and write.
#[async_trait::async_trait]
pub trait ManagedResource: Send + Sync {
    type Remote: Send;

    const KIND: &'static str;

    fn describe(&self) -> String;

    async fn fetch(&self, client: &dyn ClusterClient) -> ClientResult<Self::Remote>;
    async fn create(&self, client: &dyn ClusterClient) -> ClientResult<Self::Remote>;
    async fn replace(&self, client: &dyn ClusterClient) -> ClientResult<Self::Remote>;
    async fn remove(&self, client: &dyn ClusterClient) -> ClientResult<()>;

    /// Spec-controlled fields of `remote` match. Cluster-generated fields
    /// (IDs, secrets) are ignored.
    fn is_current(&self, remote: &Self::Remote) -> bool;
}

/// Drive `spec` one step toward `desired`.
pub async fn converge<R: ManagedResource>(client: &dyn ClusterClient, spec: &R, desired: Desired) -> ClientResult<Outcome> {
    let t0 = Instant::now();
    let outcome = match desired {
        Desired::Absent => {
            spec.remove(client).await?;
            Outcome::Deleted
        }
        Desired::Present => match spec.fetch(client).await {
            Ok(remote) if spec.is_current(&remote) => Outcome::Unchanged,
            Ok(_) => {
                spec.replace(client).await?;
                Outcome::Updated
            }
            Err(e) if e.is_not_found() => {
                spec.create(client).await?;
                Outcome::Created
            }
            Err(e) => return Err(e),
        },
    };
    info!(kind = R::KIND, resource = %spec.describe(), outcome = ?outcome, took_ms = %t0.elapsed().as_millis(), "converged");
    Ok(outcome)
}

macro_rules! managed {
    (
        $spec:ty => $remote:ty, $kind:literal,
        [$get:ident, $add:ident, $update:ident, $delete:ident],
        describe = |$d:ident| $describe:expr,
        current = |$s:ident, $r:ident| $current:expr $(,)?
    ) => {
        #[async_trait::async_trait]
        impl ManagedResource for $spec {
            type Remote = $remote;

            const KIND: &'static str = $kind;

            fn describe(&self) -> String {
                let $d = self;
                $describe
            }

            async fn fetch(&self, client: &dyn ClusterClient) -> ClientResult<$remote> { client.$get(self).await }
            async fn create(&self, client: &dyn ClusterClient) -> ClientResult<$remote> { client.$add(self).await }
            async fn replace(&self, client: &dyn ClusterClient) -> ClientResult<$remote> { client.$update(self).await }
            async fn remove(&self, client: &dyn ClusterClient) -> ClientResult<()> { client.$delete(self).await }

            fn is_current(&self, remote: &$remote) -> bool {
                let ($s, $r) = (self, remote);
                $current
            }
        }
    };
}

managed!(IngestTokenSpec => IngestToken, "ingest_token",
    [get_ingest_token, add_ingest_token, update_ingest_token, delete_ingest_token],
    describe = |s| format!("{}/{}", s.repository_name, s.name),
    current = |s, r| r.name == s.name && r.assigned_parser == s.parser_name,
);

managed!(ParserSpec => Parser, "parser",
    [get_parser, add_parser, update_parser, delete_parser],
    describe = |s| format!("{}/{}", s.repository_name, s.name),
    current = |s, r| Parser::from_spec(s) == *r,
);

managed!(RepositorySpec => Repository, "repository",
    [get_repository, add_repository, update_repository, delete_repository],
    describe = |s| s.name.clone(),
    current = |s, r| Repository::from_spec(s, r.id.clone()).matches(r),
);

managed!(ViewSpec => View, "view",
    [get_view, add_view, update_view, delete_view],
    describe = |s| s.name.clone(),
    current = |s, r| View::from_spec(s) == *r,
);

managed!(ActionSpec => Notifier, "notifier",
    [get_notifier, add_notifier, update_notifier, delete_notifier],
    describe = |s| format!("{}/{}", s.view_name, s.name),
    current = |s, r| Notifier::from_action(s).map(|n| n == *r).unwrap_or(false),
);

managed!(AlertSpec => Alert, "alert",
    [get_alert, add_alert, update_alert, delete_alert],
    describe = |s| format!("{}/{}", s.view_name, s.name),
    current = |s, r| action_ids(s).and_then(|ids| Alert::from_spec(s, &ids)).map(|a| a == *r).unwrap_or(false),
);

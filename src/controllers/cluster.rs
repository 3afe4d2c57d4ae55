use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::controller::Action,
    Client, ResourceExt as _,
};
use serde_json::json;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::api::federated_cluster::{FederatedCluster, FederatedClusterStatus};

use super::client::{probe, SecretResolver};
use super::conditions::ClusterHealth;
use super::{ReconcileError, ReconcileResult, StatusUpdateError};

/// Persisted FederatedCluster objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str)
        -> Result<Option<FederatedCluster>, kube::Error>;

    /// Replace the status of the cluster, failing if it changed since it was read
    async fn update_status(&self, cluster: &FederatedCluster) -> Result<(), kube::Error>;
}

#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<FederatedCluster>, kube::Error> {
        Api::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn update_status(&self, cluster: &FederatedCluster) -> Result<(), kube::Error> {
        let namespace = cluster.namespace().unwrap_or(String::from("default"));
        let api: Api<FederatedCluster> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion turns the merge patch into a compare-and-swap
        let patch = json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": cluster.status,
        });
        api.patch_status(
            &cluster.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

/// Result of a single reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The cluster was deleted before it could be reconciled
    Missing,
    /// The stored status already matches the probe
    Unchanged(ClusterHealth),
    Updated {
        from: Option<ClusterHealth>,
        to: ClusterHealth,
    },
    /// The cluster changed underneath the pass
    Requeue(ClusterHealth),
    /// The status write failed; the next resync retries it
    Failed(ClusterHealth),
}

impl ReconcileOutcome {
    /// Health observed by the probe of this pass
    pub fn health(self) -> Option<ClusterHealth> {
        match self {
            Self::Missing => None,
            Self::Unchanged(health) | Self::Requeue(health) | Self::Failed(health) => Some(health),
            Self::Updated { to, .. } => Some(to),
        }
    }

    pub fn action(self, resync_interval: Duration) -> Action {
        match self {
            Self::Missing => Action::await_change(),
            Self::Requeue(_) => Action::requeue(Duration::ZERO),
            Self::Unchanged(_) | Self::Updated { .. } | Self::Failed(_) => {
                Action::requeue(resync_interval)
            }
        }
    }
}

/// Converges the stored status of a FederatedCluster toward its probed health
pub struct StatusReconciler<'a> {
    clusters: &'a dyn ClusterStore,
    secrets: &'a dyn SecretResolver,
    timeout: Duration,
}

impl<'a> StatusReconciler<'a> {
    pub fn new(
        clusters: &'a dyn ClusterStore,
        secrets: &'a dyn SecretResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            clusters,
            secrets,
            timeout,
        }
    }

    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        now: Time,
    ) -> ReconcileResult<ReconcileOutcome> {
        let Some(mut cluster) = self
            .clusters
            .get(namespace, name)
            .await
            .map_err(ReconcileError::Lookup)?
        else {
            info!("Cluster no longer exists");
            return Ok(ReconcileOutcome::Missing);
        };

        let report = probe(&cluster, self.secrets, self.timeout).await;
        if let Some(err) = &report.error {
            warn!(error = %err, health = %report.health, "Failed to get cluster status");
        }

        let mut status = report.status(&now);
        carry_transition_times(&mut status, cluster.status.as_ref());

        if cluster.status.as_ref() == Some(&status) {
            return Ok(ReconcileOutcome::Unchanged(report.health));
        }

        let from = cluster.status.as_ref().and_then(ClusterHealth::from_status);
        cluster.status = Some(status);
        let outcome = match self
            .clusters
            .update_status(&cluster)
            .await
            .map_err(StatusUpdateError::from)
        {
            Ok(()) => {
                info!(health = %report.health, "Updated cluster status");
                ReconcileOutcome::Updated {
                    from,
                    to: report.health,
                }
            }
            Err(StatusUpdateError::Conflict(err)) => {
                info!(error = %err, "Cluster changed during reconcile, requeueing");
                ReconcileOutcome::Requeue(report.health)
            }
            Err(err @ StatusUpdateError::Persistence(_)) => {
                warn!(error = %err, "Failed to update cluster status");
                ReconcileOutcome::Failed(report.health)
            }
        };

        Ok(outcome)
    }
}

/// Keep the stored transition time for conditions whose type and status did not change
fn carry_transition_times(
    status: &mut FederatedClusterStatus,
    previous: Option<&FederatedClusterStatus>,
) {
    let Some(previous) = previous else {
        return;
    };

    for condition in status.conditions.iter_mut() {
        let transitioned = previous
            .conditions
            .iter()
            .find(|c| c.type_ == condition.type_ && c.status == condition.status)
            .and_then(|c| c.last_transition_time.clone());
        if let Some(time) = transitioned {
            condition.last_transition_time = Some(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::error::ErrorResponse;

    use super::*;
    use crate::api::federated_cluster::{
        ClusterConditionType, ConditionStatus, FederatedClusterSpec, LocalSecretReference,
    };
    use crate::controllers::client::MockSecretResolver;
    use crate::controllers::conditions::probe_time_at;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn at(minute: u32) -> Time {
        probe_time_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap())
    }

    /// A cluster without endpoint probes as ConfigMalformed without any network traffic
    fn malformed_cluster() -> FederatedCluster {
        let mut cluster = FederatedCluster::new(
            "member",
            FederatedClusterSpec {
                api_endpoint: String::new(),
                ca_bundle: None,
                secret_ref: LocalSecretReference {
                    name: "member-token".to_string(),
                },
            },
        );
        cluster.metadata.namespace = Some("federation".to_string());
        cluster.metadata.resource_version = Some("1".to_string());
        cluster
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    fn no_secrets() -> MockSecretResolver {
        let mut secrets = MockSecretResolver::new();
        secrets.expect_get_secret().never();
        secrets
    }

    /// Object store enforcing resourceVersion preconditions, counting writes
    #[derive(Default)]
    struct InMemoryStore {
        objects: Mutex<BTreeMap<(String, String), FederatedCluster>>,
        writes: Mutex<usize>,
    }

    impl InMemoryStore {
        fn with(cluster: FederatedCluster) -> Self {
            let store = Self::default();
            store.objects.lock().unwrap().insert(
                (cluster.namespace().unwrap(), cluster.name_any()),
                cluster,
            );
            store
        }

        fn writes(&self) -> usize {
            *self.writes.lock().unwrap()
        }

        fn stored(&self) -> FederatedCluster {
            self.objects
                .lock()
                .unwrap()
                .get(&("federation".to_string(), "member".to_string()))
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl ClusterStore for InMemoryStore {
        async fn get(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<FederatedCluster>, kube::Error> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn update_status(&self, cluster: &FederatedCluster) -> Result<(), kube::Error> {
            let mut objects = self.objects.lock().unwrap();
            let key = (cluster.namespace().unwrap(), cluster.name_any());
            let stored = objects
                .get_mut(&key)
                .ok_or_else(|| api_error(404, "NotFound"))?;
            if stored.resource_version() != cluster.resource_version() {
                return Err(api_error(409, "Conflict"));
            }

            let version: u64 = stored.resource_version().unwrap().parse().unwrap();
            stored.status = cluster.status.clone();
            stored.metadata.resource_version = Some((version + 1).to_string());
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_cluster_is_a_noop() {
        let mut clusters = MockClusterStore::new();
        clusters.expect_get().returning(|_, _| Ok(None));
        clusters.expect_update_status().never();
        let secrets = no_secrets();

        let outcome = StatusReconciler::new(&clusters, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Missing);
        assert_eq!(outcome.health(), None);
    }

    #[tokio::test]
    async fn lookup_failure_is_an_error() {
        let mut clusters = MockClusterStore::new();
        clusters
            .expect_get()
            .returning(|_, _| Err(api_error(500, "InternalError")));
        clusters.expect_update_status().never();
        let secrets = no_secrets();

        let result = StatusReconciler::new(&clusters, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(0))
            .await;

        assert!(matches!(result, Err(ReconcileError::Lookup(_))));
    }

    #[tokio::test]
    async fn first_pass_establishes_status() {
        let store = InMemoryStore::with(malformed_cluster());
        let secrets = no_secrets();

        let outcome = StatusReconciler::new(&store, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                from: None,
                to: ClusterHealth::ConfigMalformed
            }
        );
        assert_eq!(outcome.health(), Some(ClusterHealth::ConfigMalformed));
        assert_eq!(store.writes(), 1);

        // Read back equals what the probe produced for the same outcome
        let stored = store.stored();
        assert_eq!(
            stored.status,
            Some(ClusterHealth::ConfigMalformed.status(&at(0)))
        );
        let conditions = stored.conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, ClusterConditionType::ConfigMalformed);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn equal_status_is_not_written_again() {
        let store = InMemoryStore::with(malformed_cluster());
        let secrets = no_secrets();
        let reconciler = StatusReconciler::new(&store, &secrets, TIMEOUT);

        reconciler
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Unchanged(ClusterHealth::ConfigMalformed)
        );
        assert_eq!(store.writes(), 1);
        assert_eq!(outcome.action(TIMEOUT), Action::requeue(TIMEOUT));
    }

    #[tokio::test]
    async fn unchanged_condition_keeps_transition_time() {
        let store = InMemoryStore::with(malformed_cluster());
        let secrets = no_secrets();
        let reconciler = StatusReconciler::new(&store, &secrets, TIMEOUT);

        reconciler
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile("federation", "member", at(5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                from: Some(ClusterHealth::ConfigMalformed),
                to: ClusterHealth::ConfigMalformed
            }
        );
        assert_eq!(store.writes(), 2);
        let stored = store.stored();
        let condition = &stored.conditions()[0];
        assert_eq!(condition.last_probe_time, at(5));
        assert_eq!(condition.last_transition_time, Some(at(0)));
    }

    #[tokio::test]
    async fn changed_condition_stamps_transition_time() {
        let mut cluster = malformed_cluster();
        cluster.status = Some(ClusterHealth::Ready.status(&at(0)));
        let store = InMemoryStore::with(cluster);
        let secrets = no_secrets();

        let outcome = StatusReconciler::new(&store, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                from: Some(ClusterHealth::Ready),
                to: ClusterHealth::ConfigMalformed
            }
        );
        let stored = store.stored();
        let condition = &stored.conditions()[0];
        assert_eq!(condition.last_transition_time, Some(at(5)));
    }

    #[tokio::test]
    async fn conflict_requeues_without_error() {
        let mut clusters = MockClusterStore::new();
        clusters
            .expect_get()
            .returning(|_, _| Ok(Some(malformed_cluster())));
        clusters
            .expect_update_status()
            .times(1)
            .returning(|_| Err(api_error(409, "Conflict")));
        let secrets = no_secrets();

        let outcome = StatusReconciler::new(&clusters, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Requeue(ClusterHealth::ConfigMalformed)
        );
        assert_eq!(outcome.action(TIMEOUT), Action::requeue(Duration::ZERO));
    }

    #[tokio::test]
    async fn stale_read_conflicts_in_store() {
        let store = InMemoryStore::with(malformed_cluster());
        let mut stale = malformed_cluster();
        stale.metadata.resource_version = Some("0".to_string());
        stale.status = Some(ClusterHealth::Ready.status(&at(0)));

        let err = store.update_status(&stale).await.unwrap_err();

        assert!(matches!(
            StatusUpdateError::from(err),
            StatusUpdateError::Conflict(_)
        ));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_is_swallowed() {
        let mut clusters = MockClusterStore::new();
        clusters
            .expect_get()
            .returning(|_, _| Ok(Some(malformed_cluster())));
        clusters
            .expect_update_status()
            .times(1)
            .returning(|_| Err(api_error(500, "InternalError")));
        let secrets = no_secrets();

        let outcome = StatusReconciler::new(&clusters, &secrets, TIMEOUT)
            .reconcile("federation", "member", at(0))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Failed(ClusterHealth::ConfigMalformed)
        );
        assert_eq!(outcome.action(TIMEOUT), Action::requeue(TIMEOUT));
    }

    #[tokio::test]
    async fn cancelled_pass_abandons_probe() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut cluster = malformed_cluster();
        cluster.spec.api_endpoint = format!("http://{addr}");
        let mut clusters = MockClusterStore::new();
        clusters
            .expect_get()
            .returning(move |_, _| Ok(Some(cluster.clone())));
        clusters.expect_update_status().never();
        let mut secrets = MockSecretResolver::new();
        secrets.expect_get_secret().returning(|_, _| {
            Ok(Secret {
                data: Some(BTreeMap::from([(
                    "token".to_string(),
                    ByteString(b"secret-token".to_vec()),
                )])),
                ..Default::default()
            })
        });

        let started = std::time::Instant::now();
        let reconciler = StatusReconciler::new(&clusters, &secrets, Duration::from_secs(30));
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            reconciler.reconcile("federation", "member", at(0)),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[test]
    fn missing_awaits_change() {
        assert_eq!(
            ReconcileOutcome::Missing.action(TIMEOUT),
            Action::await_change()
        );
    }
}

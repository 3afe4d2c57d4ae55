use crate::api::federated_cluster::FederatedCluster;
use crate::controllers::client::KubeSecretResolver;
use crate::controllers::cluster::KubeClusterStore;
use crate::controllers::controller::{self, Context};
use crate::metrics::Diagnostics;
use crate::{predicates, Error, Metrics, Result};
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector, watcher, WatchStreamExt,
    },
};
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

fn error_policy(cluster: Arc<FederatedCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&cluster, error);
    Action::requeue(Duration::from_secs(60))
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Result<Arc<Context>> {
        Ok(Arc::new(Context {
            clusters: Arc::new(KubeClusterStore::new(client.clone())),
            secrets: Arc::new(KubeSecretResolver::new(client.clone())),
            client,
            metrics: Metrics::new()?.register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

/// Initialize the cluster health controller and shared state (given the crd is installed)
pub async fn run_cluster_controller(state: State) -> Result<()> {
    let client = Client::try_default().await?;
    let clusters = Api::<FederatedCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("FederatedClusters are not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(e.into());
    }

    // Status writes do not bump the generation and must not retrigger a probe
    let (reader, writer) = reflector::store();
    let stream = watcher(clusters, watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(|cluster: &FederatedCluster| {
            predicates::generation_with_deletion(cluster)
        });

    Controller::for_stream(stream, reader)
        .shutdown_on_signal()
        .run(controller::reconcile, error_policy, state.to_context(client)?)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(cluster = %obj.name, "reconciled"),
                Err(e) => debug!("reconcile error: {e}"),
            }
        })
        .await;

    Ok(())
}

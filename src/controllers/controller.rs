use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::{api::Api, client::Client, Resource as _, ResourceExt as _};
use tokio::sync::RwLock;
use tracing::{self, debug, instrument, warn};

use crate::api::federated_cluster::FederatedCluster;
use crate::api::health_check_config::{HealthCheckConfig, HEALTH_CHECK_CONFIG_NAME};
use crate::metrics::Diagnostics;
use crate::{telemetry, Error, Metrics};

use super::client::SecretResolver;
use super::cluster::{ClusterStore, ReconcileOutcome, StatusReconciler};
use super::conditions::{probe_time, ClusterHealth};
use super::ConfigFetchResult;

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostoics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prom metrics
    pub metrics: Metrics,
    /// Store holding FederatedCluster objects
    pub clusters: Arc<dyn ClusterStore>,
    /// Member cluster credentials
    pub secrets: Arc<dyn SecretResolver>,
}

pub(crate) async fn fetch_config(client: Client) -> ConfigFetchResult<HealthCheckConfig> {
    Ok(Api::all(client)
        .get_opt(HEALTH_CHECK_CONFIG_NAME)
        .await?
        .unwrap_or_default())
}

#[instrument(skip_all, fields(trace_id = display(telemetry::get_trace_id()), name = cluster.name_any(), namespace = cluster.namespace()), err)]
pub async fn reconcile(cluster: Arc<FederatedCluster>, ctx: Arc<Context>) -> crate::Result<Action> {
    ctx.diagnostics.write().await.last_event = Utc::now();
    let _timer = ctx.metrics.count_and_measure();

    let config = fetch_config(ctx.client.clone())
        .await
        .map_err(Error::ConfigFetch)?;
    debug!("Reconciling");

    let namespace = cluster.namespace().unwrap_or(String::from("default"));
    let outcome = StatusReconciler::new(
        ctx.clusters.as_ref(),
        ctx.secrets.as_ref(),
        config.spec.probe_timeout(),
    )
    .reconcile(&namespace, &cluster.name_any(), probe_time())
    .await?;

    ctx.metrics.record_outcome(outcome);
    if let ReconcileOutcome::Updated { from, to } = outcome {
        if from != Some(to) {
            publish_transition(&ctx, &cluster, from, to).await;
        }
    }

    Ok(outcome.action(config.spec.resync_interval()))
}

async fn publish_transition(
    ctx: &Context,
    cluster: &FederatedCluster,
    from: Option<ClusterHealth>,
    to: ClusterHealth,
) {
    let type_ = match to {
        ClusterHealth::Ready => EventType::Normal,
        _ => EventType::Warning,
    };
    let note = match from {
        Some(from) => format!("Cluster `{}` changed from {from} to {to}", cluster.name_any()),
        None => format!("Cluster `{}` is {to}", cluster.name_any()),
    };

    let published = ctx
        .diagnostics
        .read()
        .await
        .recorder(ctx.client.clone())
        .publish(
            &Event {
                type_,
                reason: format!("Cluster{to}"),
                note: Some(note),
                action: "HealthCheck".into(),
                secondary: None,
            },
            &cluster.object_ref(&()),
        )
        .await;

    if let Err(err) = published {
        warn!(error = %err, "Failed to publish cluster health event");
    }
}

use chrono::{DateTime, Utc};
use kube::{
    runtime::events::{Recorder, Reporter},
    Client, ResourceExt,
};
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use serde::Serialize;
use tokio::time::Instant;

use crate::api::federated_cluster::FederatedCluster;
use crate::controllers::cluster::ReconcileOutcome;
use crate::Error;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub status_writes: IntCounterVec,
    pub probes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "federation_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "federation_controller_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )?;
        let reconciliations = IntCounter::new(
            "federation_controller_reconciliations_total",
            "reconciliations",
        )?;
        let status_writes = IntCounterVec::new(
            opts!(
                "federation_controller_status_writes_total",
                "cluster status write attempts by result",
            ),
            &["result"],
        )?;
        let probes = IntCounterVec::new(
            opts!(
                "federation_controller_cluster_probes_total",
                "member cluster probes by observed health",
            ),
            &["health"],
        )?;

        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            status_writes,
            probes,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.status_writes.clone()))?;
        registry.register(Box::new(self.probes.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, cluster: &FederatedCluster, e: &Error) {
        self.failures
            .with_label_values(&[cluster.name_any().as_str(), e.metric_label().as_str()])
            .inc()
    }

    pub fn record_outcome(&self, outcome: ReconcileOutcome) {
        if let Some(health) = outcome.health() {
            self.probes.with_label_values(&[health.metric_label()]).inc();
        }

        let result = match outcome {
            ReconcileOutcome::Updated { .. } => "updated",
            ReconcileOutcome::Requeue(_) => "conflict",
            ReconcileOutcome::Failed(_) => "failed",
            ReconcileOutcome::Missing | ReconcileOutcome::Unchanged(_) => return,
        };
        self.status_writes.with_label_values(&[result]).inc();
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        let no_labels: &[&str] = &[];
        self.metric.with_label_values(no_labels).observe(duration);
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "federated-cluster-controller".into(),
        }
    }
}

impl Diagnostics {
    pub fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

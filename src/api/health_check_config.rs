use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the singleton configuration object read by the controller
pub static HEALTH_CHECK_CONFIG_NAME: &str = "federation-config";

const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;
const MAX_PROBE_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RESYNC_INTERVAL_SECONDS: u64 = 60;
const MIN_RESYNC_INTERVAL_SECONDS: u64 = 5;

/// This provides a config for member cluster health checks
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[kube(
    kind = "HealthCheckConfig",
    group = "federation.example.com",
    version = "v1"
)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfigSpec {
    /// Per request deadline for the member cluster liveness probe.
    ///
    /// Bounded to 30 seconds so a slow member cluster can not stall the loop.
    pub probe_timeout_seconds: Option<u64>,

    /// Interval between periodic health checks of every member cluster.
    pub resync_interval_seconds: Option<u64>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            metadata: Default::default(),
            spec: HealthCheckConfigSpec {
                probe_timeout_seconds: Some(DEFAULT_PROBE_TIMEOUT_SECONDS),
                resync_interval_seconds: Some(DEFAULT_RESYNC_INTERVAL_SECONDS),
            },
        }
    }
}

impl HealthCheckConfigSpec {
    pub fn probe_timeout(&self) -> Duration {
        let seconds = self
            .probe_timeout_seconds
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECONDS)
            .clamp(1, MAX_PROBE_TIMEOUT_SECONDS);
        Duration::from_secs(seconds)
    }

    pub fn resync_interval(&self) -> Duration {
        let seconds = self
            .resync_interval_seconds
            .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECONDS)
            .max(MIN_RESYNC_INTERVAL_SECONDS);
        Duration::from_secs(seconds)
    }
}

use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, ByteString};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// FederatedCluster declares a member cluster whose health is tracked by the federation
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    kind = "FederatedCluster",
    group = "federation.example.com",
    version = "v1",
    namespaced,
    status = "FederatedClusterStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".spec.apiEndpoint"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FederatedClusterSpec {
    /// The API endpoint of the member cluster
    pub api_endpoint: String,

    /// PEM encoded CA bundle used to verify the member cluster API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_bundle: Option<ByteString>,

    /// Secret in the same namespace holding the bearer token
    pub secret_ref: LocalSecretReference,
}

/// The local secret with same namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LocalSecretReference {
    pub name: String,
}

/// FederatedClusterStatus defines the observed state of FederatedCluster
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct FederatedClusterStatus {
    /// Condition set of cluster status
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum ClusterConditionType {
    /// The cluster is ready to accept workloads.
    Ready,
    /// The cluster is temporarily down or not reachable.
    Offline,
    /// The cluster's configuration may be malformed.
    ConfigMalformed,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// ClusterCondition describes current state of a cluster.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of cluster condition, Ready, Offline or ConfigMalformed.
    #[serde(rename = "type")]
    pub type_: ClusterConditionType,
    /// Status of the condition, one of True, False, Unknown.
    pub status: ConditionStatus,
    /// Last time the condition was checked.
    pub last_probe_time: Time,
    /// Last time the condition transit from one status to another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    /// (brief) reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable message indicating details about last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FederatedCluster {
    /// Stored status, if the cluster was reconciled before
    pub fn conditions(&self) -> &[ClusterCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

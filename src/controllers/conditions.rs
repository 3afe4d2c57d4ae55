use std::fmt;

use chrono::{DateTime, SubsecRound as _, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::api::federated_cluster::{
    ClusterCondition, ClusterConditionType, ConditionStatus, FederatedClusterStatus,
};

pub static CLUSTER_READY: &str = "ClusterReady";
pub static HEALTHZ_OK: &str = "/healthz responded with ok";
pub static CLUSTER_NOT_READY: &str = "ClusterNotReady";
pub static HEALTHZ_NOT_OK: &str = "/healthz responded without ok";
pub static CLUSTER_NOT_REACHABLE_REASON: &str = "ClusterNotReachable";
pub static CLUSTER_NOT_REACHABLE_MSG: &str = "cluster is not reachable";
pub static CLUSTER_REACHABLE_REASON: &str = "ClusterReachable";
pub static CLUSTER_REACHABLE_MSG: &str = "cluster is reachable";
pub static CLUSTER_CONFIG_MALFORMED_REASON: &str = "ClusterConfigMalformed";
pub static CLUSTER_CONFIG_MALFORMED_MSG: &str = "cluster's configuration may be malformed";

/// Reason and message reported for a condition type and status.
pub fn condition_policy(
    type_: ClusterConditionType,
    status: ConditionStatus,
) -> Option<(&'static str, &'static str)> {
    use ClusterConditionType::*;
    use ConditionStatus::*;

    match (type_, status) {
        (Ready, True) => Some((CLUSTER_READY, HEALTHZ_OK)),
        (Ready, False) => Some((CLUSTER_NOT_READY, HEALTHZ_NOT_OK)),
        (Offline, True) => Some((CLUSTER_NOT_REACHABLE_REASON, CLUSTER_NOT_REACHABLE_MSG)),
        (Offline, False) => Some((CLUSTER_REACHABLE_REASON, CLUSTER_REACHABLE_MSG)),
        (ConfigMalformed, True) => Some((
            CLUSTER_CONFIG_MALFORMED_REASON,
            CLUSTER_CONFIG_MALFORMED_MSG,
        )),
        _ => None,
    }
}

/// Current time at the precision the API server persists for `metav1.Time`
pub fn probe_time() -> Time {
    probe_time_at(Utc::now())
}

pub fn probe_time_at(time: DateTime<Utc>) -> Time {
    Time(time.trunc_subsecs(0))
}

impl ClusterCondition {
    pub fn observed(type_: ClusterConditionType, status: ConditionStatus, now: &Time) -> Self {
        let policy = condition_policy(type_, status);
        Self {
            type_,
            status,
            last_probe_time: now.clone(),
            last_transition_time: Some(now.clone()),
            reason: policy.map(|(reason, _)| reason.to_string()),
            message: policy.map(|(_, message)| message.to_string()),
        }
    }
}

/// Health state of a member cluster, as derived from a single probe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterHealth {
    ConfigMalformed,
    Offline,
    NotReady,
    Ready,
}

impl ClusterHealth {
    /// Classify the body returned by the liveness endpoint
    pub fn from_healthz(body: &[u8]) -> Self {
        if body.eq_ignore_ascii_case(b"ok") {
            Self::Ready
        } else {
            Self::NotReady
        }
    }

    pub fn conditions(self, now: &Time) -> Vec<ClusterCondition> {
        use ClusterConditionType as Type;
        use ConditionStatus::*;

        let observed = |type_, status| ClusterCondition::observed(type_, status, now);
        match self {
            Self::ConfigMalformed => vec![observed(Type::ConfigMalformed, True)],
            Self::Offline => vec![observed(Type::Offline, True)],
            Self::NotReady => vec![observed(Type::Ready, False), observed(Type::Offline, False)],
            Self::Ready => vec![observed(Type::Ready, True)],
        }
    }

    pub fn status(self, now: &Time) -> FederatedClusterStatus {
        FederatedClusterStatus {
            conditions: self.conditions(now),
        }
    }

    /// Recognise a persisted condition set. Sets not produced by a probe map to `None`.
    pub fn from_status(status: &FederatedClusterStatus) -> Option<Self> {
        use ClusterConditionType as Type;
        use ConditionStatus::*;

        let observed: Vec<_> = status
            .conditions
            .iter()
            .map(|c| (c.type_, c.status))
            .collect();
        match observed.as_slice() {
            [(Type::ConfigMalformed, True)] => Some(Self::ConfigMalformed),
            [(Type::Offline, True)] => Some(Self::Offline),
            [(Type::Ready, False), (Type::Offline, False)] => Some(Self::NotReady),
            [(Type::Ready, True)] => Some(Self::Ready),
            _ => None,
        }
    }

    pub fn metric_label(self) -> &'static str {
        match self {
            Self::ConfigMalformed => "config_malformed",
            Self::Offline => "offline",
            Self::NotReady => "not_ready",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for ClusterHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMalformed => write!(f, "ConfigMalformed"),
            Self::Offline => write!(f, "Offline"),
            Self::NotReady => write!(f, "NotReady"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

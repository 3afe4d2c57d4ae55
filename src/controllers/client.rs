use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::Api,
    client::{Body, ClientBuilder},
    Client, Config, ResourceExt as _,
};
use tower::limit::{ConcurrencyLimitLayer, RateLimitLayer};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::api::federated_cluster::{FederatedCluster, FederatedClusterStatus};

use super::conditions::ClusterHealth;
use super::{ConfigError, ProbeError, UnreachableError};

pub static USER_AGENT_NAME: &str = "federated-cluster-controller";
pub static TOKEN_KEY: &str = "token";
pub static HEALTHZ_PATH: &str = "/healthz";

/// Requests per second allowed against a member cluster
pub const KUBE_API_QPS: u64 = 20;
/// Requests allowed in flight against a member cluster
pub const KUBE_API_BURST: usize = 30;

/// Credential lookup for member cluster secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, kube::Error>;
}

/// Resolves secrets from the management cluster
#[derive(Clone)]
pub struct KubeSecretResolver {
    client: Client,
}

impl KubeSecretResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretResolver for KubeSecretResolver {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, kube::Error> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }
}

/// Outcome of a single probe of a member cluster
#[derive(Debug)]
pub struct HealthReport {
    pub health: ClusterHealth,
    /// Cause of a malformed or unreachable classification
    pub error: Option<ProbeError>,
}

impl HealthReport {
    pub fn reachable(health: ClusterHealth) -> Self {
        Self {
            health,
            error: None,
        }
    }

    pub fn malformed(err: ConfigError) -> Self {
        Self {
            health: ClusterHealth::ConfigMalformed,
            error: Some(err.into()),
        }
    }

    pub fn offline(err: UnreachableError) -> Self {
        Self {
            health: ClusterHealth::Offline,
            error: Some(err.into()),
        }
    }

    pub fn status(&self, now: &Time) -> FederatedClusterStatus {
        self.health.status(now)
    }
}

/// Short-lived client to a member cluster
pub struct ClusterClient {
    client: Client,
    cluster_name: String,
    timeout: Duration,
}

impl ClusterClient {
    pub async fn new(
        cluster: &FederatedCluster,
        secrets: &dyn SecretResolver,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = build_cluster_config(cluster, secrets, timeout).await?;
        let client = ClientBuilder::try_from(config)
            .map_err(ConfigError::ClientBuild)?
            .with_layer(&ConcurrencyLimitLayer::new(KUBE_API_BURST))
            .with_layer(&RateLimitLayer::new(KUBE_API_QPS, Duration::from_secs(1)))
            .build();

        Ok(Self {
            client,
            cluster_name: cluster.name_any(),
            timeout,
        })
    }

    /// Gets the kubernetes cluster health status by requesting "/healthz"
    pub async fn health(&self) -> HealthReport {
        match self.healthz().await {
            Ok(body) => HealthReport::reachable(ClusterHealth::from_healthz(&body)),
            Err(err) => {
                warn!(cluster = %self.cluster_name, error = %err, "Failed to do cluster health check");
                HealthReport::offline(err)
            }
        }
    }

    /// Raw liveness body, which is not required to be UTF-8
    async fn healthz(&self) -> Result<Vec<u8>, UnreachableError> {
        let request = http::Request::get(HEALTHZ_PATH)
            .header(http::header::USER_AGENT, USER_AGENT_NAME)
            .body(Body::empty())?;

        let exchange = async {
            let response = self.client.send(request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(UnreachableError::Status(status));
            }
            Ok(response.into_body().collect_bytes().await?.to_vec())
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| UnreachableError::Timeout(self.timeout))?
    }
}

/// Probe a member cluster once, classifying construction and transport failures
pub async fn probe(
    cluster: &FederatedCluster,
    secrets: &dyn SecretResolver,
    timeout: Duration,
) -> HealthReport {
    match ClusterClient::new(cluster, secrets, timeout).await {
        Ok(client) => client.health().await,
        Err(err) => {
            debug!(cluster = %cluster.name_any(), error = %err, "Unable to build cluster client");
            HealthReport::malformed(err)
        }
    }
}

async fn build_cluster_config(
    cluster: &FederatedCluster,
    secrets: &dyn SecretResolver,
    timeout: Duration,
) -> Result<Config, ConfigError> {
    let spec = &cluster.spec;
    if spec.api_endpoint.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    if spec.secret_ref.name.is_empty() {
        return Err(ConfigError::MissingSecretRef);
    }

    let namespace = cluster.namespace().unwrap_or(String::from("default"));
    let secret = secrets
        .get_secret(&namespace, &spec.secret_ref.name)
        .await
        .map_err(ConfigError::SecretLookup)?;

    let token = secret
        .data
        .and_then(|mut data| data.remove(TOKEN_KEY))
        .filter(|token| !token.0.is_empty())
        .ok_or(ConfigError::MissingToken)?;
    let token = String::from_utf8(token.0)?;

    let cluster_url: http::Uri = spec
        .api_endpoint
        .parse()
        .map_err(|_| ConfigError::MalformedEndpoint(spec.api_endpoint.clone()))?;
    if cluster_url.scheme().is_none() || cluster_url.authority().is_none() {
        return Err(ConfigError::MalformedEndpoint(spec.api_endpoint.clone()));
    }

    let mut config = Config::new(cluster_url);
    config.default_namespace = namespace;
    config.root_cert = spec
        .ca_bundle
        .as_ref()
        .map(|bundle| parse_ca_bundle(&bundle.0))
        .transpose()?;
    config.auth_info.token = Some(token.into());
    config.connect_timeout = Some(timeout);
    config.read_timeout = Some(timeout);
    config.write_timeout = Some(timeout);

    Ok(config)
}

/// Decode PEM certificates into the DER roots accepted by the client
fn parse_ca_bundle(bundle: &[u8]) -> Result<Vec<Vec<u8>>, ConfigError> {
    let certs: Vec<_> = pem::parse_many(bundle)
        .map_err(|e| ConfigError::InvalidCaBundle(e.to_string()))?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(pem::Pem::into_contents)
        .collect();

    if certs.is_empty() {
        return Err(ConfigError::InvalidCaBundle(
            "no certificates found".to_string(),
        ));
    }

    Ok(certs)
}

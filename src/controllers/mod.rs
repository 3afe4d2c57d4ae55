use std::time::Duration;

use thiserror::Error;

/// Descriptor or credential is unusable. Only an operator can fix it.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("empty endpoint")]
    EmptyEndpoint,

    #[error("missing secret reference")]
    MissingSecretRef,

    #[error("secret lookup error: {0}")]
    SecretLookup(#[source] kube::Error),

    #[error("missing token")]
    MissingToken,

    #[error("token is not valid UTF-8: {0}")]
    InvalidToken(#[from] std::string::FromUtf8Error),

    #[error("malformed endpoint {0:?}")]
    MalformedEndpoint(String),

    #[error("invalid CA bundle: {0}")]
    InvalidCaBundle(String),

    #[error("client build error: {0}")]
    ClientBuild(#[source] kube::Error),
}

/// The member cluster could not be reached within the deadline.
#[derive(Error, Debug)]
pub enum UnreachableError {
    #[error("health check request error: {0}")]
    Request(#[from] http::Error),

    #[error("health check failed: {0}")]
    Transport(#[from] kube::Error),

    #[error("health check returned {0}")]
    Status(http::StatusCode),

    #[error("health check timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("cluster config error: {0}")]
    Config(#[from] ConfigError),

    #[error("cluster unreachable: {0}")]
    Unreachable(#[from] UnreachableError),
}

#[derive(Error, Debug)]
pub enum StatusUpdateError {
    #[error("status update conflict: {0}")]
    Conflict(#[source] kube::Error),

    #[error("status update error: {0}")]
    Persistence(#[source] kube::Error),
}

impl From<kube::Error> for StatusUpdateError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 409 => Self::Conflict(err),
            err => Self::Persistence(err),
        }
    }
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Cluster lookup error: {0}")]
    Lookup(#[source] kube::Error),
}

pub type ConfigFetchResult<T> = std::result::Result<T, kube::Error>;

pub mod client;
pub mod cluster;
pub mod conditions;
pub mod controller;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the cluster object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
}

/// Failures while provisioning the certificate chain and local key material.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("custom resource definition {0} not found, please install cert-manager first")]
    CrdMissing(String),
    #[error("failed to check custom resource definition {crd}: {source}")]
    CrdCheck {
        crd: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to look up secret {namespace}/{name}: {source}")]
    Lookup {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("timed out waiting for {field} in secret {namespace}/{name}")]
    MaterialNotFound {
        namespace: String,
        name: String,
        field: &'static str,
    },
    #[error("secret {namespace}/{name} did not appear within {waited:?}")]
    Timeout {
        namespace: String,
        name: String,
        waited: Duration,
    },
    #[error("secret {namespace}/{name} has no {field}")]
    FieldMissing {
        namespace: String,
        name: String,
        field: &'static str,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while declaring webhook configurations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("failed to read CA bundle: {0}")]
    CaBundle(#[source] BootstrapError),
    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },
}

/// Per-request failures that end in an errored admission response.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("admission request carries no object")]
    MissingObject,
    #[error("failed to decode pod: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to build json patch: {0}")]
    PatchBuild(String),
}

impl AdmissionError {
    /// HTTP-like status code reported back in the admission response.
    pub fn code(&self) -> u16 {
        match self {
            AdmissionError::MissingObject | AdmissionError::Decode(_) => 400,
            AdmissionError::PatchBuild(_) => 500,
        }
    }
}

/// Startup failure, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("precondition failed: {0}")]
    Precondition(#[source] BootstrapError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[source] BootstrapError),
    #[error("registration failed: {0}")]
    Registration(#[source] RegistrationError),
    #[error("credential check failed: {0}")]
    Credentials(#[source] BootstrapError),
}

impl From<BootstrapError> for StartupError {
    fn from(e: BootstrapError) -> Self {
        match e {
            BootstrapError::CrdMissing(_) | BootstrapError::CrdCheck { .. } => {
                StartupError::Precondition(e)
            }
            e => StartupError::Bootstrap(e),
        }
    }
}

impl From<RegistrationError> for StartupError {
    fn from(e: RegistrationError) -> Self {
        StartupError::Registration(e)
    }
}

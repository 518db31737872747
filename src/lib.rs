use reconcilers::duration_parser;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Cryostat is not yet Ready: {message}")]
    NotReady {
        message: String,
        reason: String,
        requeue_after: Option<Duration>,
    },

    #[error("Certificate {0} is not yet Ready")]
    CertNotReady(String),

    #[error("Pod {0} has no IP address yet")]
    TargetUnavailable(String),

    #[error("No Cryostat instance found in namespace {0}")]
    CryostatNotFound(String),

    #[error("Unknown recording state {0:?}")]
    UnknownRecordingState(String),

    #[error("Failed to make Cryostat API call: {0}")]
    RecordingCallFailed(reqwest::Error),

    #[error("Failed to read the service account token: {0}")]
    TokenUnavailable(std::io::Error),

    #[error("Invalid TLS material: {0}")]
    InvalidTlsMaterial(String),

    #[error("The key {1} in {0} does not exist")]
    MissingObjectKey(String, String),

    #[error(transparent)]
    InvalidDuration(#[from] duration_parser::ParseError),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::FinalizerError(_) => "FinalizerError",
            Error::NotReady { .. } => "NotReady",
            Error::CertNotReady(_) => "CertNotReady",
            Error::TargetUnavailable(_) => "TargetUnavailable",
            Error::CryostatNotFound(_) => "CryostatNotFound",
            Error::UnknownRecordingState(_) => "UnknownRecordingState",
            Error::RecordingCallFailed(_) => "RecordingCallFailed",
            Error::TokenUnavailable(_) => "TokenUnavailable",
            Error::InvalidTlsMaterial(_) => "InvalidTlsMaterial",
            Error::MissingObjectKey(_, _) => "MissingObjectKey",
            Error::InvalidDuration(_) => "InvalidDuration",
            Error::InvalidUrl(_) => "InvalidUrl",
        }
    }
}

pub mod controllers;
pub use controllers::{run, State};

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Shared reconcile helpers
pub mod reconcilers;

/// Cryostat web API client
pub mod recordings;

/// Own and external CRDs
pub mod resources;

#[cfg(test)]
mod test_utils;

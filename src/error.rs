//! Error types for the webhook bootstrap

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// `WEBHOOK_PORT` (or another port source) did not parse as a port number
    #[error("Invalid webhook port {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// Creating the certificate directory or writing a file into it failed
    #[error("Filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generating a private key or certificate failed
    #[error("Failed to generate key material: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    /// The server factory rejected its options
    #[error("Failed to construct webhook server: {0}")]
    ServerConstruction(String),

    /// A webhook builder could not produce a webhook
    #[error("Failed to build webhook {name:?}: {reason}")]
    WebhookBuild { name: String, reason: String },

    /// Batch registration with the server failed
    #[error("Failed to register webhooks: {0}")]
    Registration(String),

    /// TLS material could not be loaded for serving
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

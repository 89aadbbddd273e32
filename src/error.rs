//! Error types for control plane certificate bootstrap

use std::path::{Path, PathBuf};

use controlplane_certchains::CertChainError;
use thiserror::Error;

/// Main error type for certificate bootstrap
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Building, walking or regenerating the certificate chains failed
    #[error(transparent)]
    CertChain(#[from] CertChainError),

    /// A file outside the certificate chains could not be read or written
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The run configuration file is not valid YAML for the expected schema
    #[error("invalid config file {}: {source}", path.display())]
    Yaml {
        /// Path of the config file
        path: PathBuf,
        /// The underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// The run configuration parses but cannot be used
    #[error("validation error: {0}")]
    Validation(String),

    /// Generating or encoding the service account key failed
    #[error("service account key error: {0}")]
    ServiceAccountKey(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a service account key error with the given message
    pub fn service_account_key(msg: impl Into<String>) -> Self {
        Self::ServiceAccountKey(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error comes from configuration rather than the environment
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::CertChain(e) => e.is_config_error(),
            Self::Yaml { .. } | Self::Validation(_) => true,
            _ => false,
        }
    }
}

//! Error types for certificate chain operations
//!
//! Every variant is fatal to the bootstrap sequence. The variants fall into
//! three groups: file system errors, certificate errors (malformed material,
//! signing failures, broken chains) and configuration errors (a tree or
//! bundle declaration that cannot be satisfied).

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced while building, walking or regenerating certificate chains
#[derive(Debug, Error)]
pub enum CertChainError {
    /// A file or directory could not be read, created or written
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path of the file or directory being accessed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Malformed PEM, certificate or key material
    #[error("certificate parsing error: {0}")]
    Parse(String),

    /// Certificate generation or signing failed
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A CA certificate is not signed by its parent CA
    #[error("certificate chain mismatch for signer {signer}: {reason}")]
    ChainMismatch {
        /// Name of the signer whose CA does not chain to its parent
        signer: String,
        /// Description of the mismatch
        reason: String,
    },

    /// The serial counter file does not hold a hexadecimal serial number
    #[error("invalid serial file {}: {message}", path.display())]
    InvalidSerial {
        /// Path of the serial file
        path: PathBuf,
        /// Description of what's invalid
        message: String,
    },

    /// A hostname cannot be encoded as a subject alternative name
    #[error("invalid subject alternative name '{name}': {message}")]
    InvalidName {
        /// The rejected hostname
        name: String,
        /// Why it was rejected
        message: String,
    },

    /// An externally supplied CA is missing one of its files
    #[error("CA {signer} is externally supplied but {} does not exist", path.display())]
    MissingCaFile {
        /// Name of the signer owning the CA
        signer: String,
        /// The missing file
        path: PathBuf,
    },

    /// A bundle or lookup references a signer that is not in the tree
    #[error("unknown signer: {0}")]
    UnknownSigner(String),

    /// Two entries in the tree share a name where names must be unique
    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName {
        /// The duplicated name
        name: String,
        /// Where the duplicate was found
        scope: String,
    },

    /// A certificate path does not address any certificate in the tree
    #[error("no certificate at path {0}")]
    UnknownPath(String),

    /// The operation needs to rewrite an externally supplied CA
    #[error("CA {0} is externally supplied and cannot be regenerated")]
    ExternallySupplied(String),

    /// Any other invalid tree declaration
    #[error("configuration error: {0}")]
    Config(String),
}

impl CertChainError {
    /// Build a closure that wraps an I/O error with the path it happened at
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error comes from an unsatisfiable tree or bundle declaration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCaFile { .. }
                | Self::UnknownSigner(_)
                | Self::DuplicateName { .. }
                | Self::UnknownPath(_)
                | Self::ExternallySupplied(_)
                | Self::Config(_)
        )
    }
}

/// Result type for certificate chain operations
pub type Result<T> = std::result::Result<T, CertChainError>;

/// Render a certificate path the way it appears in logs and errors
pub(crate) fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_name_the_path() {
        let err = CertChainError::io(Path::new("/certs/root-ca/ca.key"))(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let msg = err.to_string();
        assert!(msg.contains("/certs/root-ca/ca.key"));
        assert!(msg.contains("denied"));
        assert!(!err.is_config_error());
    }

    #[test]
    fn declaration_errors_are_config_errors() {
        assert!(CertChainError::UnknownSigner("etcd-ca".into()).is_config_error());
        assert!(CertChainError::ExternallySupplied("root-ca".into()).is_config_error());
        assert!(CertChainError::config("empty bundle").is_config_error());
        assert!(!CertChainError::Parse("bad pem".into()).is_config_error());
        assert!(!CertChainError::ChainMismatch {
            signer: "server-ca".into(),
            reason: "signature verification failed".into(),
        }
        .is_config_error());
    }

    #[test]
    fn paths_render_with_slashes() {
        assert_eq!(
            display_path(&["root-ca", "client-ca", "admin"]),
            "root-ca/client-ca/admin"
        );
        assert_eq!(display_path::<&str>(&[]), "");
    }
}

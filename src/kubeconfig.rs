//! Kubeconfig generation for internal components
//!
//! The control plane's own components reach the API server with a client
//! certificate from the chains and trust the server CA bundle. The
//! kubeconfig has a single cluster, context and user.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use controlplane_certchains::files;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Cluster and context name
pub const KUBECONFIG_NAME: &str = "multicluster-controlplane";

/// User entry name
pub const KUBECONFIG_USER: &str = "user";

/// Context namespace
pub const KUBECONFIG_NAMESPACE: &str = "default";

/// Kubeconfig document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// Always `v1`
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Always `Config`
    pub kind: String,
    /// Cluster entries
    pub clusters: Vec<NamedCluster>,
    /// Context entries
    pub contexts: Vec<NamedContext>,
    /// Name of the selected context
    #[serde(rename = "current-context")]
    pub current_context: String,
    /// User entries
    pub users: Vec<NamedUser>,
}

/// Named cluster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// Entry name
    pub name: String,
    /// Cluster connection details
    pub cluster: Cluster,
}

/// Cluster connection details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    /// API server URL
    pub server: String,
    /// Base64-encoded PEM trust bundle
    pub certificate_authority_data: String,
}

/// Named context entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    /// Entry name
    pub name: String,
    /// Cluster, user and namespace selection
    pub context: Context,
}

/// Cluster, user and namespace selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Cluster entry name
    pub cluster: String,
    /// Default namespace
    pub namespace: String,
    /// User entry name
    pub user: String,
}

/// Named user entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    /// Entry name
    pub name: String,
    /// Client credentials
    pub user: User,
}

/// Client credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    /// Base64-encoded PEM client certificate
    pub client_certificate_data: String,
    /// Base64-encoded PEM client key
    pub client_key_data: String,
}

impl Kubeconfig {
    /// Build a kubeconfig for `server` from PEM material
    pub fn new(server: &str, ca_bundle_pem: &str, cert_pem: &str, key_pem: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: KUBECONFIG_NAME.to_string(),
                cluster: Cluster {
                    server: server.to_string(),
                    certificate_authority_data: STANDARD.encode(ca_bundle_pem.as_bytes()),
                },
            }],
            contexts: vec![NamedContext {
                name: KUBECONFIG_NAME.to_string(),
                context: Context {
                    cluster: KUBECONFIG_NAME.to_string(),
                    namespace: KUBECONFIG_NAMESPACE.to_string(),
                    user: KUBECONFIG_USER.to_string(),
                },
            }],
            current_context: KUBECONFIG_NAME.to_string(),
            users: vec![NamedUser {
                name: KUBECONFIG_USER.to_string(),
                user: User {
                    client_certificate_data: STANDARD.encode(cert_pem.as_bytes()),
                    client_key_data: STANDARD.encode(key_pem.as_bytes()),
                },
            }],
        }
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization(format!("failed to serialize kubeconfig: {}", e)))
    }
}

/// Write the kubeconfig to `path`, readable by the owner only
pub fn write_kubeconfig(path: &Path, kubeconfig: &Kubeconfig) -> Result<()> {
    let yaml = kubeconfig.to_yaml()?;

    files::write_private_file(path, &yaml)?;

    info!(path = %path.display(), "Wrote kubeconfig");
    Ok(())
}

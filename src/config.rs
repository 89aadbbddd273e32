//! Control plane run configuration
//!
//! Read from a YAML file (`ocmconfig.yaml` by default):
//!
//! ```yaml
//! configDirectory: .ocmconfig
//! apiserver:
//!   externalHostname: cp.example.com
//!   port: 9443
//!   caFile: /etc/pki/root-ca.crt      # optional, together with caKeyFile
//!   caKeyFile: /etc/pki/root-ca.key
//! etcd:
//!   mode: embed                       # or external
//! ```
//!
//! Missing keys take their defaults. Keys consumed by other components
//! (external etcd endpoints, deployment flags) are accepted and ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Config file read when none is given
pub const DEFAULT_CONFIG_FILE: &str = "ocmconfig.yaml";

/// Directory holding generated state when none is configured
pub const DEFAULT_CONFIG_DIRECTORY: &str = ".ocmconfig";

/// API server secure port when none is configured
pub const DEFAULT_APISERVER_PORT: u16 = 9443;

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlplaneConfig {
    /// Directory for generated state; certificates live in its `cert` subdirectory
    pub config_directory: PathBuf,
    /// API server settings
    pub apiserver: ApiserverConfig,
    /// Key-value store settings
    pub etcd: EtcdConfig,
}

/// API server settings relevant to certificates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiserverConfig {
    /// Hostname clients use to reach the API server
    pub external_hostname: String,
    /// Secure port
    pub port: u16,
    /// Externally supplied root CA certificate
    pub ca_file: Option<PathBuf>,
    /// Externally supplied root CA key
    pub ca_key_file: Option<PathBuf>,
}

/// Key-value store settings relevant to certificates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EtcdConfig {
    /// Whether the store runs embedded (and needs its own CA) or externally
    pub mode: EtcdMode,
}

/// How the key-value store is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EtcdMode {
    /// Embedded in the control plane process
    #[default]
    Embed,
    /// Run elsewhere, with its own certificates
    External,
}

impl Default for ControlplaneConfig {
    fn default() -> Self {
        Self {
            config_directory: PathBuf::from(DEFAULT_CONFIG_DIRECTORY),
            apiserver: ApiserverConfig::default(),
            etcd: EtcdConfig::default(),
        }
    }
}

impl Default for ApiserverConfig {
    fn default() -> Self {
        Self {
            external_hostname: String::new(),
            port: DEFAULT_APISERVER_PORT,
            ca_file: None,
            ca_key_file: None,
        }
    }
}

impl ControlplaneConfig {
    /// Load and validate the config file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(Error::io(path))?;
        let config = Self::from_yaml(&data).map_err(|e| match e {
            Error::Yaml { source, .. } => Error::Yaml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), config = ?config, "Loaded controlplane config");
        Ok(config)
    }

    /// Parse and validate config YAML
    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document means all defaults
        let config: Self = if data.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(data).map_err(|source| Error::Yaml {
                path: PathBuf::new(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the fields certificate bootstrap depends on
    pub fn validate(&self) -> Result<()> {
        if self.apiserver.external_hostname.trim().is_empty() {
            return Err(Error::validation(
                "apiserver.externalHostname must not be empty",
            ));
        }
        if self.apiserver.port == 0 {
            return Err(Error::validation("apiserver.port must not be 0"));
        }
        match (self.ca_file(), self.ca_key_file()) {
            (Some(_), None) | (None, Some(_)) => Err(Error::validation(
                "apiserver.caFile and apiserver.caKeyFile must be set together",
            )),
            _ => Ok(()),
        }
    }

    /// Whether the root CA is supplied through `caFile`/`caKeyFile`
    pub fn is_ca_provided(&self) -> bool {
        self.ca_file().is_some() && self.ca_key_file().is_some()
    }

    /// Externally supplied root CA certificate, ignoring empty values
    pub fn ca_file(&self) -> Option<&Path> {
        non_empty(&self.apiserver.ca_file)
    }

    /// Externally supplied root CA key, ignoring empty values
    pub fn ca_key_file(&self) -> Option<&Path> {
        non_empty(&self.apiserver.ca_key_file)
    }

    /// Whether the key-value store is embedded and needs its own CA
    pub fn is_embed_etcd(&self) -> bool {
        self.etcd.mode == EtcdMode::Embed
    }

    /// Root of the certificate tree
    pub fn certs_directory(&self) -> PathBuf {
        self.config_directory.join("cert")
    }

    /// URL clients use to reach the API server
    pub fn api_url(&self) -> String {
        format!(
            "https://{}:{}/",
            self.apiserver.external_hostname, self.apiserver.port
        )
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

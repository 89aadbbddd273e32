//! Certificate bootstrap for a self-hosted multicluster control plane
//!
//! On every start the control plane needs a complete PKI before it can serve
//! traffic. This crate declares the concrete CA tree on top of
//! [`controlplane_certchains`], keeps the service account signing key,
//! rotates certificates close to expiry and writes the kubeconfig internal
//! components use.
//!
//! # Modules
//!
//! - [`config`] - YAML run configuration
//! - [`certificate`] - The control plane CA tree and startup sequence
//! - [`kubeconfig`] - Kubeconfig generation from chain material
//! - [`service_account`] - RSA service account signing key
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod certificate;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod service_account;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use tracing::{info, warn};

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Control plane certificate bootstrap
#[derive(Parser, Debug)]
#[command(name = "controlplane-certs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the run configuration file
    #[arg(
        long = "config-file",
        env = "CONTROLPLANE_CONFIG_FILE",
        default_value = config::DEFAULT_CONFIG_FILE,
        global = true
    )]
    pub config_file: PathBuf,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or repair certificates, rotate what is due and write the kubeconfig
    Init,

    /// Report certificates due for rotation without changing anything
    ///
    /// Exits with an error when any certificate is due.
    Check,
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        let config = config::ControlplaneConfig::load(&self.config_file)?;
        match self.command {
            Commands::Init => {
                certificate::bootstrap(&config)?;
                Ok(())
            }
            Commands::Check => {
                let due = certificate::pending_rotation(&config, OffsetDateTime::now_utc())?;
                if due.is_empty() {
                    info!("No certificates are due for rotation");
                    return Ok(());
                }
                for path in &due {
                    warn!(path = %path.join("/"), "Certificate is due for rotation");
                }
                Err(Error::validation(format!(
                    "{} certificate(s) due for rotation",
                    due.len()
                )))
            }
        }
    }
}

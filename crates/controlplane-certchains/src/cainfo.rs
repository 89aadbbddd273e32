//! CA descriptor: where a CA lives and how to obtain it
//!
//! A CA is either *self-managed* (the engine generates it and keeps a serial
//! counter next to it) or *externally supplied* (cert and key files are
//! provided and never rewritten). The serial file is what tells the two
//! apart: externally supplied CAs have none.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::authority::CertificateAuthority;
use crate::error::{CertChainError, Result};
use crate::files;

/// Identity and file locations of a single CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaInfo {
    /// Common name of the CA certificate
    pub signer_name: String,
    /// Validity period used when the CA is generated
    pub validity_days: u32,
    /// CA certificate file
    pub cert_file: PathBuf,
    /// CA private key file
    pub key_file: PathBuf,
    /// Serial counter file; `None` for externally supplied CAs
    pub serial_file: Option<PathBuf>,
}

impl CaInfo {
    /// A CA generated and maintained by the engine under `dir`
    pub fn self_managed(signer_name: impl Into<String>, validity_days: u32, dir: &Path) -> Self {
        Self {
            signer_name: signer_name.into(),
            validity_days,
            cert_file: files::ca_cert_path(dir),
            key_file: files::ca_key_path(dir),
            serial_file: Some(files::ca_serial_path(dir)),
        }
    }

    /// A CA provided from outside; both files must exist.
    ///
    /// The signer name is filled in by the signer that uses it.
    pub fn external(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            signer_name: String::new(),
            validity_days: 0,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            serial_file: None,
        }
    }

    /// Whether the CA files are provided from outside and must not be rewritten
    pub fn is_externally_supplied(&self) -> bool {
        self.serial_file.is_none()
    }

    /// Load the CA if its files exist, otherwise generate and persist it.
    ///
    /// Without a parent the generated CA is self-signed. Existing material is
    /// returned unchanged as long as it parses and chains to `parent`.
    pub fn ensure_ca(&self, parent: Option<&CertificateAuthority>) -> Result<CertificateAuthority> {
        let cert_exists = self.cert_file.exists();
        let key_exists = self.key_file.exists();

        if cert_exists && key_exists {
            let cert_pem = files::read_pem(&self.cert_file)?;
            let key_pem = files::read_pem(&self.key_file)?;
            let ca = CertificateAuthority::from_pem(
                &self.signer_name,
                &cert_pem,
                &key_pem,
                self.serial_file.clone(),
            )?;

            if let Some(parent) = parent {
                if !parent.has_signed(ca.ca_cert_pem())? {
                    if self.is_externally_supplied() {
                        return Err(CertChainError::ChainMismatch {
                            signer: self.signer_name.clone(),
                            reason: format!("CA is not signed by {}", parent.name()),
                        });
                    }
                    warn!(
                        signer = %self.signer_name,
                        parent = %parent.name(),
                        "CA is not signed by its parent, regenerating"
                    );
                    return self.generate(Some(parent));
                }
            }

            debug!(
                signer = %self.signer_name,
                path = %self.cert_file.display(),
                "Using existing CA"
            );
            return Ok(ca);
        }

        if self.is_externally_supplied() {
            let missing = if cert_exists {
                &self.key_file
            } else {
                &self.cert_file
            };
            return Err(CertChainError::MissingCaFile {
                signer: self.signer_name.clone(),
                path: missing.clone(),
            });
        }

        if cert_exists != key_exists {
            warn!(
                signer = %self.signer_name,
                path = %self.cert_file.display(),
                "Incomplete CA material on disk, regenerating"
            );
        }

        self.generate(parent)
    }

    /// Generate a fresh CA regardless of what is on disk
    pub fn regenerate_ca(&self, parent: Option<&CertificateAuthority>) -> Result<CertificateAuthority> {
        if self.is_externally_supplied() {
            return Err(CertChainError::ExternallySupplied(self.signer_name.clone()));
        }
        self.generate(parent)
    }

    fn generate(&self, parent: Option<&CertificateAuthority>) -> Result<CertificateAuthority> {
        let ca = match parent {
            Some(parent) => CertificateAuthority::generate_signed_by(
                &self.signer_name,
                self.validity_days,
                self.serial_file.clone(),
                parent,
            )?,
            None => CertificateAuthority::generate_self_signed(
                &self.signer_name,
                self.validity_days,
                self.serial_file.clone(),
            )?,
        };

        ca.write_to(&self.cert_file, &self.key_file)?;

        info!(
            signer = %self.signer_name,
            path = %self.cert_file.display(),
            validity_days = self.validity_days,
            "Generated CA certificate"
        );

        Ok(ca)
    }
}

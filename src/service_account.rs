//! Service account signing key
//!
//! The API server signs and validates bearer tokens with a 2048-bit RSA key
//! stored as PKCS#1 PEM next to the certificate tree. The key is kept across
//! restarts so that issued tokens stay valid.

use std::path::Path;

use controlplane_certchains::files;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::RsaPrivateKey;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Service account key size in bits
pub const SERVICE_ACCOUNT_KEY_BITS: usize = 2048;

/// Generate a PKCS#1 PEM RSA private key
pub fn generate_service_account_key() -> Result<zeroize::Zeroizing<String>> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), SERVICE_ACCOUNT_KEY_BITS)
        .map_err(|e| Error::service_account_key(format!("failed to generate RSA key: {}", e)))?;
    key.to_pkcs1_pem(Default::default())
        .map_err(|e| Error::service_account_key(format!("failed to encode RSA key: {}", e)))
}

/// Make sure a usable key exists at `path`; returns whether one was generated
pub fn ensure_service_account_key(path: &Path) -> Result<bool> {
    if path.exists() {
        let existing = std::fs::read_to_string(path).map_err(Error::io(path))?;
        match RsaPrivateKey::from_pkcs1_pem(&existing) {
            Ok(_) => {
                debug!(path = %path.display(), "Using existing service account key");
                return Ok(false);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Service account key is unusable, regenerating");
            }
        }
    }

    let pem = generate_service_account_key()?;
    files::write_private_file(path, &pem)?;

    info!(path = %path.display(), "Generated service account key");
    Ok(true)
}

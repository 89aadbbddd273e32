//! On-disk layout of a signer directory and PEM file writing.
//!
//! A signer directory holds `ca.crt`, `ca.key` and `serial.txt`. Each leaf
//! certificate lives in a subdirectory named after its request, holding
//! `server.*`, `client.*` or `peer.*` depending on the request kind.
//! On Unix, private key files are written with 0600 permissions.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CertChainError, Result};

/// CA certificate file name inside a signer directory
pub const CA_CERT_FILE_NAME: &str = "ca.crt";
/// CA private key file name inside a signer directory
pub const CA_KEY_FILE_NAME: &str = "ca.key";
/// Serial counter file name inside a signer directory
pub const CA_SERIAL_FILE_NAME: &str = "serial.txt";
/// Serving certificate file name
pub const SERVER_CERT_FILE_NAME: &str = "server.crt";
/// Serving key file name
pub const SERVER_KEY_FILE_NAME: &str = "server.key";
/// Client certificate file name
pub const CLIENT_CERT_FILE_NAME: &str = "client.crt";
/// Client key file name
pub const CLIENT_KEY_FILE_NAME: &str = "client.key";
/// Peer certificate file name
pub const PEER_CERT_FILE_NAME: &str = "peer.crt";
/// Peer key file name
pub const PEER_KEY_FILE_NAME: &str = "peer.key";

/// Path of the CA certificate in a signer directory
pub fn ca_cert_path(dir: &Path) -> PathBuf {
    dir.join(CA_CERT_FILE_NAME)
}

/// Path of the CA key in a signer directory
pub fn ca_key_path(dir: &Path) -> PathBuf {
    dir.join(CA_KEY_FILE_NAME)
}

/// Path of the serial counter in a signer directory
pub fn ca_serial_path(dir: &Path) -> PathBuf {
    dir.join(CA_SERIAL_FILE_NAME)
}

/// Read a PEM file into a string
pub(crate) fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(CertChainError::io(path))
}

/// Write a public PEM file, creating parent directories as needed
pub(crate) fn write_pem(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, contents).map_err(CertChainError::io(path))
}

/// Write a file holding private key material, creating parent directories.
///
/// On Unix the file is created with 0600 permissions, and an existing file
/// is restricted to 0600 before it is overwritten.
pub fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(CertChainError::io(path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(CertChainError::io(path))?;
    }

    file.write_all(contents.as_bytes())
        .map_err(CertChainError::io(path))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(CertChainError::io(parent))?;
        }
    }
    Ok(())
}

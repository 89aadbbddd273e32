//! Certificate authority operations
//!
//! A [`CertificateAuthority`] is a CA certificate and its private key held in
//! memory. It can mint intermediate CAs and serving, client or peer leaf
//! certificates. Key material is ECDSA P-256 for everything generated here;
//! an externally supplied CA may use any key type rcgen can sign with.
//!
//! Serial numbers come from the CA's serial counter file when it has one
//! (self-managed CAs) and are random otherwise (externally supplied CAs).

use std::path::{Path, PathBuf};

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

use crate::error::{CertChainError, Result};
use crate::files;
use crate::info::{self, CertificateInfo};
use crate::request::{LeafKind, LeafSpec};

/// First serial number handed out by a freshly created CA
const INITIAL_SERIAL: u64 = 1;

/// Compute the certificate validity window starting now
fn compute_validity(days: u32) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(i64::from(days));
    (now, not_after)
}

/// A PEM certificate and its private key
#[derive(Clone)]
pub struct CertKeyPair {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key (zeroized on drop)
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for CertKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertKeyPair")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// A loaded CA able to sign certificates
pub struct CertificateAuthority {
    /// Signer name, used for logging and errors
    name: String,
    /// PEM-encoded CA certificate
    ca_cert_pem: String,
    /// PEM-encoded CA key (we deserialize on each signature since KeyPair isn't Clone)
    ca_key_pem: Zeroizing<String>,
    /// Serial counter file; random serials are used without one
    serial_file: Option<PathBuf>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("name", &self.name)
            .field("serial_file", &self.serial_file)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load a CA from PEM material, validating both the certificate and the key.
    ///
    /// The key may be PKCS#8, SEC1 or a traditional PKCS#1 RSA key, and must
    /// belong to the certificate. It is held as PKCS#8 from then on.
    pub fn from_pem(
        name: &str,
        cert_pem: &str,
        key_pem: &str,
        serial_file: Option<PathBuf>,
    ) -> Result<Self> {
        let key_pair = parse_key_pair(key_pem).map_err(|e| {
            CertChainError::Parse(format!("failed to parse CA key for {}: {}", name, e))
        })?;

        let cert = CertificateInfo::from_pem(cert_pem)?;
        if !cert.is_ca {
            return Err(CertChainError::Parse(format!(
                "certificate for {} is not a CA certificate",
                name
            )));
        }
        if !key_matches(&key_pair, cert_pem)? {
            return Err(CertChainError::ChainMismatch {
                signer: name.to_string(),
                reason: "CA key does not belong to the CA certificate".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: Zeroizing::new(key_pair.serialize_pem()),
            serial_file,
        })
    }

    /// Generate a self-signed CA; serials start over in `serial_file` if given
    pub fn generate_self_signed(
        name: &str,
        validity_days: u32,
        serial_file: Option<PathBuf>,
    ) -> Result<Self> {
        let mut params = ca_params(name, validity_days);
        params.serial_number = Some(random_serial());

        let key_pair = KeyPair::generate().map_err(|e| {
            CertChainError::KeyGeneration(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            CertChainError::Generation(format!("failed to create CA cert {}: {}", name, e))
        })?;

        Ok(Self {
            name: name.to_string(),
            ca_cert_pem: cert.pem(),
            ca_key_pem: Zeroizing::new(key_pair.serialize_pem()),
            serial_file,
        })
    }

    /// Generate an intermediate CA signed by `parent`
    pub fn generate_signed_by(
        name: &str,
        validity_days: u32,
        serial_file: Option<PathBuf>,
        parent: &CertificateAuthority,
    ) -> Result<Self> {
        let mut params = ca_params(name, validity_days);
        params.serial_number = Some(parent.next_serial()?);
        params.use_authority_key_identifier_extension = true;

        let key_pair = KeyPair::generate().map_err(|e| {
            CertChainError::KeyGeneration(format!("failed to generate CA key: {}", e))
        })?;

        let parent_key = parent.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&parent.ca_cert_pem, &parent_key)
            .map_err(|e| CertChainError::Parse(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&key_pair, &issuer).map_err(|e| {
            CertChainError::Generation(format!(
                "failed to sign CA cert {} with {}: {}",
                name, parent.name, e
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            ca_cert_pem: cert.pem(),
            ca_key_pem: Zeroizing::new(key_pair.serialize_pem()),
            serial_file,
        })
    }

    /// Signer name this CA belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Get the CA private key in PKCS#8 PEM format
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Get certificate info (validity period, etc.)
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    /// Whether `cert_pem` was issued by this CA's current key
    pub fn has_signed(&self, cert_pem: &str) -> Result<bool> {
        info::is_signed_by(cert_pem, &self.ca_cert_pem)
    }

    /// Persist the certificate and key, and reset the serial counter when present
    pub(crate) fn write_to(&self, cert_file: &Path, key_file: &Path) -> Result<()> {
        files::write_pem(cert_file, &self.ca_cert_pem)?;
        files::write_private_file(key_file, &self.ca_key_pem)?;
        if let Some(serial_file) = &self.serial_file {
            write_serial(serial_file, INITIAL_SERIAL)?;
        }
        Ok(())
    }

    /// Issue a leaf certificate described by `spec`
    pub fn issue(&self, spec: &LeafSpec) -> Result<CertKeyPair> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(spec.common_name.clone()),
        );
        if let Some(org) = &spec.organization {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
        }
        params.distinguished_name = dn;

        // Not a CA
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match spec.kind {
            LeafKind::Serving => vec![ExtendedKeyUsagePurpose::ServerAuth],
            LeafKind::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
            LeafKind::Peer => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
        };
        params.use_authority_key_identifier_extension = true;

        let (not_before, not_after) = compute_validity(spec.validity_days);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = spec
            .hostnames
            .iter()
            .map(|san| san_type(san))
            .collect::<Result<Vec<_>>>()?;

        params.serial_number = Some(self.next_serial()?);

        let leaf_key = KeyPair::generate().map_err(|e| {
            CertChainError::KeyGeneration(format!(
                "failed to generate {} key for {}: {}",
                spec.kind, spec.name, e
            ))
        })?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| CertChainError::Parse(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            CertChainError::Generation(format!(
                "failed to sign {} cert {} with {}: {}",
                spec.kind, spec.name, self.name, e
            ))
        })?;

        Ok(CertKeyPair {
            cert_pem: cert.pem(),
            key_pem: Zeroizing::new(leaf_key.serialize_pem()),
        })
    }

    /// Load the key pair from stored PEM
    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| CertChainError::Parse(format!("failed to load CA key: {}", e)))
    }

    /// Take the next serial number, advancing the counter file if there is one
    fn next_serial(&self) -> Result<SerialNumber> {
        let Some(serial_file) = &self.serial_file else {
            return Ok(random_serial());
        };

        let serial = if serial_file.exists() {
            read_serial(serial_file)?
        } else {
            INITIAL_SERIAL
        };
        write_serial(serial_file, serial + 1)?;
        Ok(SerialNumber::from(serial))
    }
}

/// Parse a private key, falling back to PKCS#1 for RSA keys rcgen rejects
pub(crate) fn parse_key_pair(key_pem: &str) -> std::result::Result<KeyPair, rcgen::Error> {
    KeyPair::from_pem(key_pem).or_else(|e| {
        let Ok(rsa_key) = RsaPrivateKey::from_pkcs1_pem(key_pem) else {
            return Err(e);
        };
        let Ok(der) = rsa_key.to_pkcs8_der() else {
            return Err(e);
        };
        KeyPair::try_from(der.as_bytes())
    })
}

/// Whether `key` is the private half of the key certified by `cert_pem`
pub(crate) fn key_matches(key: &KeyPair, cert_pem: &str) -> Result<bool> {
    Ok(info::subject_public_key(cert_pem)?.as_slice() == key.public_key_raw())
}

/// Build the parameters shared by every CA certificate
fn ca_params(common_name: &str, validity_days: u32) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let (not_before, not_after) = compute_validity(validity_days);
    params.not_before = not_before;
    params.not_after = not_after;

    params
}

/// Map a hostname or IP literal to a SAN entry
fn san_type(san: &str) -> Result<SanType> {
    if let Ok(ip) = san.parse::<std::net::IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    Ia5String::try_from(san.to_string())
        .map(SanType::DnsName)
        .map_err(|e| CertChainError::InvalidName {
            name: san.to_string(),
            message: e.to_string(),
        })
}

/// Random positive 63-bit serial
fn random_serial() -> SerialNumber {
    let serial = (rand::random::<u64>() >> 1).max(1);
    SerialNumber::from(serial)
}

fn read_serial(path: &Path) -> Result<u64> {
    let contents = std::fs::read_to_string(path).map_err(CertChainError::io(path))?;
    u64::from_str_radix(contents.trim(), 16).map_err(|e| CertChainError::InvalidSerial {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn write_serial(path: &Path, serial: u64) -> Result<()> {
    files::write_pem(path, &format!("{:02X}\n", serial))
}

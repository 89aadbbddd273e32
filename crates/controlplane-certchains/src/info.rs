//! Parsed view of a certificate
//!
//! [`CertificateInfo`] is what the tree walker hands to visitors: the
//! validity window, identity and SANs of a certificate, detached from the
//! DER buffer it was parsed from.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ::time::{Duration, OffsetDateTime};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::error::{CertChainError, Result};

/// Certificates whose total validity is shorter than this are short-lived
pub const SHORT_LIVED_THRESHOLD: Duration = Duration::days(5 * 365);

/// Information about a certificate's validity, identity and names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// When the certificate becomes valid
    pub not_before: OffsetDateTime,
    /// When the certificate expires
    pub not_after: OffsetDateTime,
    /// Subject common name
    pub common_name: String,
    /// Subject organizations (group memberships for client identities)
    pub organizations: Vec<String>,
    /// Full subject distinguished name
    pub subject: String,
    /// Full issuer distinguished name
    pub issuer: String,
    /// Whether the certificate carries the CA basic constraint
    pub is_ca: bool,
    /// Serial number as colon separated hex
    pub serial: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<IpAddr>,
}

impl CertificateInfo {
    /// Parse certificate info from the first certificate in a PEM string
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertChainError::Parse(format!("failed to parse certificate: {}", e)))?;

        let not_before = timestamp(cert.validity().not_before.timestamp())?;
        let not_after = timestamp(cert.validity().not_after.timestamp())?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| CertChainError::Parse(format!("invalid SAN extension: {}", e)))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            not_before,
            not_after,
            common_name,
            organizations,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            is_ca: cert.is_ca(),
            serial: cert.raw_serial_as_string(),
            dns_names,
            ip_addresses,
        })
    }

    /// Total lifetime of the certificate
    pub fn lifetime(&self) -> Duration {
        self.not_after - self.not_before
    }

    /// Time left until the certificate expires (negative once expired)
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        self.not_after - now
    }

    /// Whether `now` falls inside the validity window
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    /// Certificates valid for less than five years are short-lived
    pub fn is_short_lived(&self) -> bool {
        self.lifetime() < SHORT_LIVED_THRESHOLD
    }

    /// Whether the subject and issuer are the same name
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Whether the certificate names the given hostname or IP literal
    pub fn covers(&self, host: &str) -> bool {
        match host.parse::<IpAddr>() {
            Ok(ip) => self.ip_addresses.contains(&ip),
            Err(_) => self.dns_names.iter().any(|d| d == host),
        }
    }
}

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| CertChainError::Parse(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Check that `cert_pem` was signed by the key behind `ca_cert_pem`
pub fn is_signed_by(cert_pem: &str, ca_cert_pem: &str) -> Result<bool> {
    let cert_der = parse_pem(cert_pem)?;
    let ca_der = parse_pem(ca_cert_pem)?;

    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| CertChainError::Parse(format!("failed to parse certificate: {}", e)))?;
    let (_, ca) = X509Certificate::from_der(&ca_der)
        .map_err(|e| CertChainError::Parse(format!("failed to parse CA certificate: {}", e)))?;

    Ok(cert.verify_signature(Some(ca.public_key())).is_ok())
}

/// Raw subject public key of `cert_pem`, without the algorithm identifier
pub(crate) fn subject_public_key(cert_pem: &str) -> Result<Vec<u8>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| CertChainError::Parse(format!("failed to parse certificate: {}", e)))?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

fn timestamp(secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| CertChainError::Parse(format!("validity out of range: {}", e)))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

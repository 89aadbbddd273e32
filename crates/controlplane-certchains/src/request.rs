//! Leaf certificate requests declared on a signer
//!
//! Each request names a subdirectory of its signer and describes the
//! certificate that must exist there: serving certificates carry SANs,
//! client certificates carry a user identity, peer certificates carry both.

use std::path::{Path, PathBuf};

use crate::files::{
    CLIENT_CERT_FILE_NAME, CLIENT_KEY_FILE_NAME, PEER_CERT_FILE_NAME, PEER_KEY_FILE_NAME,
    SERVER_CERT_FILE_NAME, SERVER_KEY_FILE_NAME,
};

/// Fields shared by every certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrMeta {
    /// Subdirectory name under the signer directory; also the last path segment
    pub name: String,
    /// Validity period of the issued certificate
    pub validity_days: u32,
}

impl CsrMeta {
    /// Create request metadata
    pub fn new(name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            name: name.into(),
            validity_days,
        }
    }
}

/// Identity embedded in client and peer certificates (CN = name, O = group)
///
/// At most one group is supported: the subject carries a single
/// organization attribute. Declaring more groups is rejected with a
/// configuration error when the chains are constructed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    /// User name, written as the subject common name
    pub name: String,
    /// Group, written as the subject organization; at most one entry
    pub groups: Vec<String>,
}

impl UserInfo {
    /// A user without group memberships
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// A user belonging to one group
    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: vec![group.into()],
        }
    }
}

/// Request for a TLS serving certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServingCertificateRequest {
    /// Name and validity
    pub meta: CsrMeta,
    /// DNS names and IP literals the certificate must be valid for
    pub hostnames: Vec<String>,
}

/// Request for a TLS client certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificateRequest {
    /// Name and validity
    pub meta: CsrMeta,
    /// Identity presented to the API server
    pub user: UserInfo,
}

/// Request for a certificate used for mutual TLS between store members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificateRequest {
    /// Name and validity
    pub meta: CsrMeta,
    /// Identity presented to the other members
    pub user: UserInfo,
    /// DNS names and IP literals the member is reachable at
    pub hostnames: Vec<String>,
}

/// The kind of leaf certificate, which decides file names and key usages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// `server.crt` / `server.key`
    Serving,
    /// `client.crt` / `client.key`
    Client,
    /// `peer.crt` / `peer.key`
    Peer,
}

impl LeafKind {
    /// Certificate file name for this kind
    pub fn cert_file_name(self) -> &'static str {
        match self {
            LeafKind::Serving => SERVER_CERT_FILE_NAME,
            LeafKind::Client => CLIENT_CERT_FILE_NAME,
            LeafKind::Peer => PEER_CERT_FILE_NAME,
        }
    }

    /// Key file name for this kind
    pub fn key_file_name(self) -> &'static str {
        match self {
            LeafKind::Serving => SERVER_KEY_FILE_NAME,
            LeafKind::Client => CLIENT_KEY_FILE_NAME,
            LeafKind::Peer => PEER_KEY_FILE_NAME,
        }
    }
}

impl std::fmt::Display for LeafKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeafKind::Serving => write!(f, "serving"),
            LeafKind::Client => write!(f, "client"),
            LeafKind::Peer => write!(f, "peer"),
        }
    }
}

/// A leaf request resolved against a signer: what to issue and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSpec {
    /// Kind of certificate
    pub kind: LeafKind,
    /// Request name (subdirectory and path segment)
    pub name: String,
    /// Validity period
    pub validity_days: u32,
    /// Subject common name
    pub common_name: String,
    /// Subject organization, if any
    pub organization: Option<String>,
    /// Subject alternative names
    pub hostnames: Vec<String>,
}

impl LeafSpec {
    /// Directory holding this leaf under the given signer directory
    pub fn dir(&self, signer_dir: &Path) -> PathBuf {
        signer_dir.join(&self.name)
    }

    /// Certificate file under the given signer directory
    pub fn cert_path(&self, signer_dir: &Path) -> PathBuf {
        self.dir(signer_dir).join(self.kind.cert_file_name())
    }

    /// Key file under the given signer directory
    pub fn key_path(&self, signer_dir: &Path) -> PathBuf {
        self.dir(signer_dir).join(self.kind.key_file_name())
    }
}

impl ServingCertificateRequest {
    /// Resolve the request, appending the externally reachable host when set.
    ///
    /// The subject CN is the first hostname, falling back to the request name.
    pub(crate) fn to_spec(&self, api_host: Option<&str>) -> LeafSpec {
        let mut hostnames = self.hostnames.clone();
        if let Some(host) = api_host.filter(|h| !h.is_empty()) {
            if !hostnames.iter().any(|h| h == host) {
                hostnames.push(host.to_string());
            }
        }
        dedup_preserving_order(&mut hostnames);

        LeafSpec {
            kind: LeafKind::Serving,
            name: self.meta.name.clone(),
            validity_days: self.meta.validity_days,
            common_name: hostnames
                .first()
                .cloned()
                .unwrap_or_else(|| self.meta.name.clone()),
            organization: None,
            hostnames,
        }
    }
}

impl ClientCertificateRequest {
    pub(crate) fn to_spec(&self) -> LeafSpec {
        LeafSpec {
            kind: LeafKind::Client,
            name: self.meta.name.clone(),
            validity_days: self.meta.validity_days,
            common_name: self.user.name.clone(),
            organization: self.user.groups.first().cloned(),
            hostnames: Vec::new(),
        }
    }
}

impl PeerCertificateRequest {
    pub(crate) fn to_spec(&self) -> LeafSpec {
        let mut hostnames = self.hostnames.clone();
        dedup_preserving_order(&mut hostnames);

        LeafSpec {
            kind: LeafKind::Peer,
            name: self.meta.name.clone(),
            validity_days: self.meta.validity_days,
            common_name: self.user.name.clone(),
            organization: self.user.groups.first().cloned(),
            hostnames,
        }
    }
}

fn dedup_preserving_order(values: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

//! Certificate signer nodes
//!
//! A [`CertificateSigner`] owns one CA, the leaf certificates that CA issues
//! and any number of sub-signers whose CAs it signs. The whole hierarchy is
//! declared up front as a plain value and never mutated afterwards:
//!
//! ```text
//! root-ca
//!   ├── server-ca        serving: kube-apiserver, kube-aggregator
//!   ├── client-ca        client:  admin, kube-apiserver, kube-aggregator
//!   └── etcd-ca          client:  client   peer: peer
//! ```
//!
//! Nodes hold no reference to their parent; the parent CA is passed down
//! while the tree is traversed.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::authority::{self, CertificateAuthority};
use crate::cainfo::CaInfo;
use crate::error::{CertChainError, Result};
use crate::files;
use crate::info::CertificateInfo;
use crate::request::{
    ClientCertificateRequest, LeafSpec, PeerCertificateRequest, ServingCertificateRequest, UserInfo,
};

/// Settings applied while issuing certificates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningConfig {
    /// Externally reachable API hostname, added to every serving certificate
    pub api_host: Option<String>,
}

impl SigningConfig {
    /// Signing config carrying the external API hostname
    pub fn with_api_host(api_host: impl Into<String>) -> Self {
        Self {
            api_host: Some(api_host.into()),
        }
    }
}

/// A node of the CA tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSigner {
    /// Signer name; the CA common name and the path segment for this node
    pub name: String,
    /// Directory holding `ca.crt`, `ca.key`, `serial.txt` and leaf subdirectories
    pub dir: PathBuf,
    /// Validity of this node's CA when it is generated
    pub validity_days: u32,
    /// Overrides where the CA comes from (e.g. an externally supplied root)
    pub ca_info: Option<CaInfo>,
    /// Serving certificates issued by this CA
    pub serving_certificates: Vec<ServingCertificateRequest>,
    /// Client certificates issued by this CA
    pub client_certificates: Vec<ClientCertificateRequest>,
    /// Peer certificates issued by this CA
    pub peer_certificates: Vec<PeerCertificateRequest>,
    /// Intermediate CAs signed by this CA
    pub sub_signers: Vec<CertificateSigner>,
}

/// State of a leaf certificate on disk relative to its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LeafState {
    /// Present and matching the request
    Current,
    /// Certificate or key file absent
    Missing,
    /// Present but unusable, with the reason
    Invalid(String),
}

impl CertificateSigner {
    /// A signer with no leaf requests and no sub-signers
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, validity_days: u32) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            validity_days,
            ca_info: None,
            serving_certificates: Vec::new(),
            client_certificates: Vec::new(),
            peer_certificates: Vec::new(),
            sub_signers: Vec::new(),
        }
    }

    /// The CA descriptor in effect: the override with blanks filled in, or
    /// a self-managed CA in this signer's directory
    pub fn resolved_ca_info(&self) -> CaInfo {
        match &self.ca_info {
            Some(info) => {
                let mut info = info.clone();
                if info.signer_name.is_empty() {
                    info.signer_name = self.name.clone();
                }
                if info.validity_days == 0 {
                    info.validity_days = self.validity_days;
                }
                info
            }
            None => CaInfo::self_managed(&self.name, self.validity_days, &self.dir),
        }
    }

    /// Whether this node's CA is provided from outside
    pub fn is_externally_supplied(&self) -> bool {
        self.ca_info
            .as_ref()
            .is_some_and(CaInfo::is_externally_supplied)
    }

    /// Resolve every leaf request, serving first, then client, then peer
    pub fn leaf_specs(&self, signing: &SigningConfig) -> Vec<LeafSpec> {
        let api_host = signing.api_host.as_deref();
        self.serving_certificates
            .iter()
            .map(|r| r.to_spec(api_host))
            .chain(self.client_certificates.iter().map(|r| r.to_spec()))
            .chain(self.peer_certificates.iter().map(|r| r.to_spec()))
            .collect()
    }

    /// Resolve the leaf request with the given name
    pub fn leaf_spec(&self, name: &str, signing: &SigningConfig) -> Option<LeafSpec> {
        self.leaf_specs(signing).into_iter().find(|s| s.name == name)
    }

    /// Direct sub-signer with the given name
    pub fn child(&self, name: &str) -> Option<&CertificateSigner> {
        self.sub_signers.iter().find(|s| s.name == name)
    }

    /// Signer with the given name anywhere in this subtree
    pub fn find(&self, name: &str) -> Option<&CertificateSigner> {
        if self.name == name {
            return Some(self);
        }
        self.sub_signers.iter().find_map(|s| s.find(name))
    }

    /// Make sure this node's CA, its leaves and its whole subtree exist.
    ///
    /// With `force` every self-managed CA and every leaf in the subtree is
    /// issued anew; otherwise only missing or invalid material is.
    pub fn ensure(
        &self,
        parent: Option<&CertificateAuthority>,
        signing: &SigningConfig,
        force: bool,
    ) -> Result<CertificateAuthority> {
        let ca_info = self.resolved_ca_info();
        let ca = if force && !ca_info.is_externally_supplied() {
            ca_info.regenerate_ca(parent)?
        } else {
            ca_info.ensure_ca(parent)?
        };

        for spec in self.leaf_specs(signing) {
            if force {
                self.issue_leaf(&ca, &spec)?;
            } else {
                self.ensure_leaf(&ca, &spec)?;
            }
        }

        for sub in &self.sub_signers {
            sub.ensure(Some(&ca), signing, force)?;
        }

        Ok(ca)
    }

    /// Load (or create) this node's CA without touching its leaves
    pub(crate) fn load_ca(&self, parent: Option<&CertificateAuthority>) -> Result<CertificateAuthority> {
        self.resolved_ca_info().ensure_ca(parent)
    }

    /// Issue the leaf unless a matching one is already on disk
    pub(crate) fn ensure_leaf(&self, ca: &CertificateAuthority, spec: &LeafSpec) -> Result<()> {
        match self.leaf_state(ca, spec)? {
            LeafState::Current => {
                debug!(
                    signer = %self.name,
                    kind = %spec.kind,
                    name = %spec.name,
                    "Using existing certificate"
                );
                Ok(())
            }
            LeafState::Missing => self.issue_leaf(ca, spec),
            LeafState::Invalid(reason) => {
                warn!(
                    signer = %self.name,
                    kind = %spec.kind,
                    name = %spec.name,
                    reason = %reason,
                    "Existing certificate is unusable, reissuing"
                );
                self.issue_leaf(ca, spec)
            }
        }
    }

    /// Issue the leaf and overwrite whatever is on disk
    pub(crate) fn issue_leaf(&self, ca: &CertificateAuthority, spec: &LeafSpec) -> Result<()> {
        let issued = ca.issue(spec)?;
        let cert_path = spec.cert_path(&self.dir);
        let key_path = spec.key_path(&self.dir);

        files::write_private_file(&key_path, &issued.key_pem)?;
        files::write_pem(&cert_path, &issued.cert_pem)?;

        info!(
            signer = %self.name,
            kind = %spec.kind,
            name = %spec.name,
            path = %cert_path.display(),
            "Issued certificate"
        );
        Ok(())
    }

    pub(crate) fn leaf_state(&self, ca: &CertificateAuthority, spec: &LeafSpec) -> Result<LeafState> {
        let cert_path = spec.cert_path(&self.dir);
        let key_path = spec.key_path(&self.dir);
        if !cert_path.exists() || !key_path.exists() {
            return Ok(LeafState::Missing);
        }

        let cert_pem = files::read_pem(&cert_path)?;
        let key_pem = files::read_pem(&key_path)?;

        let info = match CertificateInfo::from_pem(&cert_pem) {
            Ok(info) => info,
            Err(e) => return Ok(LeafState::Invalid(e.to_string())),
        };
        let Ok(key) = authority::parse_key_pair(&key_pem) else {
            return Ok(LeafState::Invalid("private key does not parse".to_string()));
        };
        if !authority::key_matches(&key, &cert_pem).unwrap_or(false) {
            return Ok(LeafState::Invalid(
                "private key does not belong to the certificate".to_string(),
            ));
        }
        if !ca.has_signed(&cert_pem).unwrap_or(false) {
            return Ok(LeafState::Invalid(format!("not signed by {}", ca.name())));
        }
        if info.common_name != spec.common_name {
            return Ok(LeafState::Invalid(format!(
                "subject {} does not match {}",
                info.common_name, spec.common_name
            )));
        }
        if info.organizations.first() != spec.organization.as_ref() {
            return Ok(LeafState::Invalid("subject organization changed".to_string()));
        }
        if let Some(host) = spec.hostnames.iter().find(|h| !info.covers(h)) {
            return Ok(LeafState::Invalid(format!("missing subject alternative name {}", host)));
        }

        Ok(LeafState::Current)
    }

    /// Walk the subtree depth-first, CA before its leaves before its sub-signers
    pub(crate) fn walk(
        &self,
        prefix: &mut Vec<String>,
        visitor: &mut dyn FnMut(&[String], &CertificateInfo) -> Result<()>,
    ) -> Result<()> {
        prefix.push(self.name.clone());

        let ca_cert = files::read_pem(&self.resolved_ca_info().cert_file)?;
        visitor(prefix.as_slice(), &CertificateInfo::from_pem(&ca_cert)?)?;

        for spec in self.leaf_specs(&SigningConfig::default()) {
            let cert = files::read_pem(&spec.cert_path(&self.dir))?;
            prefix.push(spec.name.clone());
            visitor(prefix.as_slice(), &CertificateInfo::from_pem(&cert)?)?;
            prefix.pop();
        }

        for sub in &self.sub_signers {
            sub.walk(prefix, visitor)?;
        }

        prefix.pop();
        Ok(())
    }

    /// Check the declaration of this subtree.
    ///
    /// `signer_names` collects signer names across the whole tree, which
    /// must be unique so bundles can refer to signers by name.
    pub(crate) fn validate(&self, signer_names: &mut HashSet<String>) -> Result<()> {
        check_segment(&self.name, "signer name")?;
        if !signer_names.insert(self.name.clone()) {
            return Err(CertChainError::DuplicateName {
                name: self.name.clone(),
                scope: "signer tree".to_string(),
            });
        }
        if self.validity_days == 0 && !self.is_externally_supplied() {
            return Err(CertChainError::config(format!(
                "signer {} has a zero validity period",
                self.name
            )));
        }

        let mut children = HashSet::new();
        let leaves = self
            .serving_certificates
            .iter()
            .map(|r| &r.meta)
            .chain(self.client_certificates.iter().map(|r| &r.meta))
            .chain(self.peer_certificates.iter().map(|r| &r.meta));
        for meta in leaves {
            check_segment(&meta.name, "certificate name")?;
            if meta.validity_days == 0 {
                return Err(CertChainError::config(format!(
                    "certificate {}/{} has a zero validity period",
                    self.name, meta.name
                )));
            }
            if !children.insert(meta.name.as_str()) {
                return Err(CertChainError::DuplicateName {
                    name: meta.name.clone(),
                    scope: format!("signer {}", self.name),
                });
            }
        }
        for sub in &self.sub_signers {
            if !children.insert(sub.name.as_str()) {
                return Err(CertChainError::DuplicateName {
                    name: sub.name.clone(),
                    scope: format!("signer {}", self.name),
                });
            }
        }

        let identities = self
            .client_certificates
            .iter()
            .map(|r| (&r.meta.name, &r.user))
            .chain(self.peer_certificates.iter().map(|r| (&r.meta.name, &r.user)));
        for (name, user) in identities {
            check_identity(&self.name, name, user)?;
        }

        for sub in &self.sub_signers {
            sub.validate(signer_names)?;
        }
        Ok(())
    }
}

fn check_segment(name: &str, what: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(CertChainError::config(format!("invalid {} '{}'", what, name)));
    }
    Ok(())
}

// rcgen keeps one value per attribute type, so only a single O can be encoded
fn check_identity(signer: &str, name: &str, user: &UserInfo) -> Result<()> {
    if user.name.is_empty() {
        return Err(CertChainError::config(format!(
            "certificate {}/{} has an empty user name",
            signer, name
        )));
    }
    if user.groups.len() > 1 {
        return Err(CertChainError::config(format!(
            "certificate {}/{} declares {} groups, at most one is supported",
            signer,
            name,
            user.groups.len()
        )));
    }
    Ok(())
}

//! Chain orchestrator
//!
//! [`CertificateChains`] owns the root signer and the bundle declarations.
//! Certificates are addressed by path: the signer names from the root down,
//! optionally followed by a leaf request name, e.g.
//! `["root-ca", "client-ca", "admin"]`.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::authority::{CertKeyPair, CertificateAuthority};
use crate::error::{display_path, CertChainError, Result};
use crate::files;
use crate::info::CertificateInfo;
use crate::request::LeafSpec;
use crate::signer::{CertificateSigner, SigningConfig};

/// A bundle file concatenating the CA certificates of the named signers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaBundle {
    /// Output file
    pub path: PathBuf,
    /// Signer names, in the order their CA certificates are written
    pub signers: Vec<String>,
}

impl CaBundle {
    /// Declare a bundle
    pub fn new<S: Into<String>>(path: impl Into<PathBuf>, signers: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into(),
            signers: signers.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a certificate path resolves to
enum Target<'a> {
    Signer(&'a CertificateSigner),
    Leaf(&'a CertificateSigner, LeafSpec),
}

/// The CA tree together with its bundle declarations
#[derive(Debug, Clone)]
pub struct CertificateChains {
    root: CertificateSigner,
    bundles: Vec<CaBundle>,
    signing: SigningConfig,
}

impl CertificateChains {
    /// Validate the declaration. Nothing is written to disk.
    pub fn new(root: CertificateSigner, bundles: Vec<CaBundle>) -> Result<Self> {
        root.validate(&mut HashSet::new())?;

        for bundle in &bundles {
            if bundle.signers.is_empty() {
                return Err(CertChainError::config(format!(
                    "bundle {} names no signers",
                    bundle.path.display()
                )));
            }
            if let Some(missing) = bundle.signers.iter().find(|s| root.find(s).is_none()) {
                return Err(CertChainError::UnknownSigner(missing.clone()));
            }
        }

        Ok(Self {
            root,
            bundles,
            signing: SigningConfig::default(),
        })
    }

    /// The root signer
    pub fn root(&self) -> &CertificateSigner {
        &self.root
    }

    /// The declared bundles
    pub fn bundles(&self) -> &[CaBundle] {
        &self.bundles
    }

    /// Create every missing or invalid CA and leaf, then write the bundles
    pub fn complete(mut self, signing: SigningConfig) -> Result<Self> {
        self.signing = signing;
        self.root.ensure(None, &self.signing, false)?;
        self.write_bundles()?;
        info!(root = %self.root.name, "Certificate chains complete");
        Ok(self)
    }

    /// PEM certificate and key at `path`, which may name a CA or a leaf
    pub fn get_cert_key<S: AsRef<str>>(&self, path: &[S]) -> Result<CertKeyPair> {
        let (cert_file, key_file) = match self.resolve(path)? {
            Target::Signer(signer) => {
                let ca_info = signer.resolved_ca_info();
                (ca_info.cert_file, ca_info.key_file)
            }
            Target::Leaf(signer, spec) => (spec.cert_path(&signer.dir), spec.key_path(&signer.dir)),
        };

        Ok(CertKeyPair {
            cert_pem: files::read_pem(&cert_file)?,
            key_pem: files::read_pem(&key_file)?.into(),
        })
    }

    /// Visit every certificate with its path, CA before its leaves before
    /// its sub-signers. With a `filter` only the subtree of that signer path
    /// is visited.
    pub fn walk_chains<S, F>(&self, filter: Option<&[S]>, mut visitor: F) -> Result<()>
    where
        S: AsRef<str>,
        F: FnMut(&[String], &CertificateInfo) -> Result<()>,
    {
        match filter {
            None => self.root.walk(&mut Vec::new(), &mut visitor),
            Some(path) => match self.resolve(path)? {
                Target::Signer(signer) => {
                    let mut prefix: Vec<String> = path[..path.len() - 1]
                        .iter()
                        .map(|s| s.as_ref().to_string())
                        .collect();
                    signer.walk(&mut prefix, &mut visitor)
                }
                Target::Leaf(..) => Err(CertChainError::UnknownPath(format!(
                    "{} is not a signer",
                    display_path(path)
                ))),
            },
        }
    }

    /// Re-issue the certificate at `path` and rewrite the bundles.
    ///
    /// A leaf is re-issued by its existing CA. A CA is regenerated together
    /// with everything it signs; its ancestors and siblings are untouched.
    pub fn regenerate<S: AsRef<str>>(&self, path: &[S]) -> Result<()> {
        let unknown = || CertChainError::UnknownPath(display_path(path));
        let (first, rest) = path.split_first().ok_or_else(unknown)?;
        if first.as_ref() != self.root.name {
            return Err(unknown());
        }

        let mut parent: Option<CertificateAuthority> = None;
        let mut signer = &self.root;
        let mut remaining = rest;

        loop {
            let Some((segment, tail)) = remaining.split_first() else {
                if signer.is_externally_supplied() {
                    return Err(CertChainError::ExternallySupplied(signer.name.clone()));
                }
                signer.ensure(parent.as_ref(), &self.signing, true)?;
                info!(path = %display_path(path), "Regenerated CA and its subtree");
                break;
            };

            let ca = signer.load_ca(parent.as_ref())?;
            if let Some(child) = signer.child(segment.as_ref()) {
                parent = Some(ca);
                signer = child;
                remaining = tail;
                continue;
            }

            match signer.leaf_spec(segment.as_ref(), &self.signing) {
                Some(spec) if tail.is_empty() => {
                    signer.issue_leaf(&ca, &spec)?;
                    info!(path = %display_path(path), "Regenerated certificate");
                    break;
                }
                _ => return Err(unknown()),
            }
        }

        self.write_bundles()
    }

    /// Whether `path` names a CA backed by externally supplied files
    pub fn is_externally_supplied<S: AsRef<str>>(&self, path: &[S]) -> Result<bool> {
        Ok(match self.resolve(path)? {
            Target::Signer(signer) => signer.is_externally_supplied(),
            Target::Leaf(..) => false,
        })
    }

    fn write_bundles(&self) -> Result<()> {
        for bundle in &self.bundles {
            let mut contents = String::new();
            for name in &bundle.signers {
                let signer = self
                    .root
                    .find(name)
                    .ok_or_else(|| CertChainError::UnknownSigner(name.clone()))?;
                let pem = files::read_pem(&signer.resolved_ca_info().cert_file)?;
                contents.push_str(&pem);
                if !pem.ends_with('\n') {
                    contents.push('\n');
                }
            }

            let unchanged = std::fs::read_to_string(&bundle.path)
                .map(|existing| existing == contents)
                .unwrap_or(false);
            if unchanged {
                debug!(path = %bundle.path.display(), "CA bundle up to date");
                continue;
            }

            files::write_pem(&bundle.path, &contents)?;
            info!(
                path = %bundle.path.display(),
                signers = %bundle.signers.join(","),
                "Wrote CA bundle"
            );
        }
        Ok(())
    }

    fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Result<Target<'_>> {
        let unknown = || CertChainError::UnknownPath(display_path(path));
        let (first, rest) = path.split_first().ok_or_else(unknown)?;
        if first.as_ref() != self.root.name {
            return Err(unknown());
        }

        let mut signer = &self.root;
        for (i, segment) in rest.iter().enumerate() {
            if let Some(child) = signer.child(segment.as_ref()) {
                signer = child;
                continue;
            }
            return match signer.leaf_spec(segment.as_ref(), &self.signing) {
                Some(spec) if i + 1 == rest.len() => Ok(Target::Leaf(signer, spec)),
                _ => Err(unknown()),
            };
        }
        Ok(Target::Signer(signer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ClientCertificateRequest, CsrMeta, UserInfo};

    fn tree(dir: &std::path::Path) -> CertificateSigner {
        CertificateSigner {
            sub_signers: vec![CertificateSigner {
                client_certificates: vec![ClientCertificateRequest {
                    meta: CsrMeta::new("admin", 365),
                    user: UserInfo::with_group("system:admin", "system:masters"),
                }],
                ..CertificateSigner::new("client-ca", dir.join("client-ca"), 365)
            }],
            ..CertificateSigner::new("root-ca", dir.join("root-ca"), 3650)
        }
    }

    #[test]
    fn bundle_with_unknown_signer_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let err = CertificateChains::new(
            tree(tmp.path()),
            vec![CaBundle::new(tmp.path().join("b.crt"), ["root-ca", "server-ca"])],
        )
        .expect_err("unknown signer should fail");
        assert!(matches!(err, CertChainError::UnknownSigner(ref s) if s == "server-ca"));
        assert!(err.is_config_error());
        assert!(!tmp.path().join("root-ca").exists());
    }

    #[test]
    fn empty_bundle_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let err = CertificateChains::new(
            tree(tmp.path()),
            vec![CaBundle::new(tmp.path().join("b.crt"), Vec::<String>::new())],
        )
        .expect_err("empty bundle should fail");
        assert!(err.is_config_error());
    }

    #[test]
    fn paths_resolve_to_signers_and_leaves() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let chains = CertificateChains::new(tree(tmp.path()), vec![]).expect("valid tree");

        assert!(matches!(
            chains.resolve(&["root-ca", "client-ca"]),
            Ok(Target::Signer(s)) if s.name == "client-ca"
        ));
        assert!(matches!(
            chains.resolve(&["root-ca", "client-ca", "admin"]),
            Ok(Target::Leaf(_, spec)) if spec.common_name == "system:admin"
        ));
        assert!(chains.resolve(&["root-ca", "admin"]).is_err());
        assert!(chains.resolve(&["client-ca"]).is_err());
        assert!(chains.resolve(&["root-ca", "client-ca", "admin", "x"]).is_err());
        assert!(chains.resolve::<&str>(&[]).is_err());
    }

    #[test]
    fn get_cert_key_reads_ca_and_leaf_material() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let chains = CertificateChains::new(tree(tmp.path()), vec![])
            .expect("valid tree")
            .complete(SigningConfig::default())
            .expect("complete should succeed");

        let admin = chains
            .get_cert_key(&["root-ca", "client-ca", "admin"])
            .expect("admin credentials should exist");
        assert!(admin.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(admin.key_pem.contains("PRIVATE KEY"));

        let ca = chains
            .get_cert_key(&["root-ca", "client-ca"])
            .expect("CA credentials should exist");
        let info = CertificateInfo::from_pem(&ca.cert_pem).expect("CA should parse");
        assert!(info.is_ca);
        assert_eq!(info.common_name, "client-ca");
    }

    #[test]
    fn externally_supplied_is_reported_per_path() {
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let chains = CertificateChains::new(tree(tmp.path()), vec![]).expect("valid tree");
        assert!(!chains
            .is_externally_supplied(&["root-ca"])
            .expect("path should resolve"));
        assert!(!chains
            .is_externally_supplied(&["root-ca", "client-ca", "admin"])
            .expect("path should resolve"));
        assert!(chains.is_externally_supplied(&["nope"]).is_err());
    }
}

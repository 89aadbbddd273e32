//! Certificate chains for the control plane PKI
//!
//! This crate builds and maintains a multi-level X.509 hierarchy on disk:
//!
//! - **Tree**: a root CA, intermediate CAs ([`CertificateSigner`]) and the
//!   serving, client and peer certificates each of them issues
//! - **Bundles**: files concatenating selected CA certificates ([`CaBundle`])
//! - **Rotation**: which certificates are too close to expiry to keep
//!   ([`rotation::certs_to_regenerate`])
//!
//! # Usage
//!
//! The tree is declared once as a plain value, validated by
//! [`CertificateChains::new`] and materialized with
//! [`CertificateChains::complete`], which creates anything missing or
//! invalid and leaves everything else untouched. Everything is synchronous
//! and expects exclusive ownership of the certificate directory.
//!
//! Any error is fatal: a partially built PKI must not be used to serve
//! traffic.

#![deny(missing_docs)]

mod authority;
mod cainfo;
mod chains;
mod error;
pub mod files;
mod info;
mod request;
pub mod rotation;
mod signer;

pub use authority::{CertKeyPair, CertificateAuthority};
pub use cainfo::CaInfo;
pub use chains::{CaBundle, CertificateChains};
pub use error::{CertChainError, Result};
pub use info::{is_signed_by, parse_pem, CertificateInfo};
pub use request::{
    ClientCertificateRequest, CsrMeta, LeafKind, LeafSpec, PeerCertificateRequest,
    ServingCertificateRequest, UserInfo,
};
pub use signer::{CertificateSigner, SigningConfig};

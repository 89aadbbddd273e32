//! The control plane certificate tree
//!
//! Declares the concrete hierarchy the control plane runs on and drives the
//! startup sequence: build the tree, keep the service account key, rotate
//! what is close to expiry, then write the kubeconfig for internal
//! components.
//!
//! ```text
//! <configDirectory>/cert/
//!   root-ca/                       ca.crt ca.key serial.txt
//!   server-ca/kube-apiserver/      server.crt server.key
//!   server-ca/kube-aggregator/     server.crt server.key
//!   request-header-ca/auth-proxy/  client.crt client.key
//!   client-ca/admin/               client.crt client.key
//!   client-ca/kube-apiserver/      client.crt client.key
//!   client-ca/kube-aggregator/     client.crt client.key
//!   etcd-ca/client/                client.crt client.key   (embedded etcd)
//!   etcd-ca/peer/                  peer.crt peer.key       (embedded etcd)
//!   ca-bundle/*.crt
//!   kube-serviceaccount.key
//!   kube-aggregator.kubeconfig
//! ```

use std::path::{Path, PathBuf};

use controlplane_certchains::{
    files, rotation, CaBundle, CaInfo, CertificateChains, CertificateSigner,
    ClientCertificateRequest, CsrMeta, PeerCertificateRequest, ServingCertificateRequest,
    SigningConfig, UserInfo,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::ControlplaneConfig;
use crate::kubeconfig::{write_kubeconfig, Kubeconfig};
use crate::service_account::ensure_service_account_key;
use crate::Result;

// =============================================================================
// Names
// =============================================================================

/// Root CA signer
pub const ROOT_CA: &str = "root-ca";
/// Signs API serving certificates
pub const SERVER_CA: &str = "server-ca";
/// Signs front-proxy client certificates
pub const REQUEST_HEADER_CA: &str = "request-header-ca";
/// Signs client certificates for internal components
pub const CLIENT_CA: &str = "client-ca";
/// Signs embedded etcd certificates
pub const ETCD_CA: &str = "etcd-ca";

/// Admin client certificate
pub const ADMIN: &str = "admin";
/// API server serving and client certificates
pub const KUBE_APISERVER: &str = "kube-apiserver";
/// Aggregator serving and client certificates
pub const KUBE_AGGREGATOR: &str = "kube-aggregator";
/// Front-proxy client certificate
pub const AUTH_PROXY: &str = "auth-proxy";
/// Etcd peer certificate
pub const ETCD_PEER: &str = "peer";
/// Etcd client certificate
pub const ETCD_CLIENT: &str = "client";

/// Cluster administrator user
pub const USER_ADMIN: &str = "system:admin";
/// API server identity towards aggregated servers
pub const USER_KUBE_APISERVER: &str = "kube-apiserver";
/// Front-proxy identity
pub const USER_AUTH_PROXY: &str = "system:auth-proxy";
/// Cluster administrators group
pub const GROUP_MASTERS: &str = "system:masters";
/// Etcd client user and group
pub const USER_ETCD: &str = "etcd";
/// Etcd client group
pub const GROUP_ETCD: &str = "etcd";
/// Etcd peer user
pub const USER_ETCD_PEER: &str = "system:etcd-peer:client";
/// Etcd peer group
pub const GROUP_ETCD_PEER: &str = "system:etcd-peers";

/// Bundle directory under the certificate root
pub const CA_BUNDLE_DIR: &str = "ca-bundle";
/// Root CA only
pub const ROOT_CA_BUNDLE: &str = "root-ca-bundle.crt";
/// Root and server CA
pub const SERVER_CA_BUNDLE: &str = "server-ca-bundle.crt";
/// Root and request-header CA
pub const REQUEST_HEADER_CA_BUNDLE: &str = "request-header-ca-bundle.crt";
/// Root and client CA
pub const CLIENT_CA_BUNDLE: &str = "client-ca-bundle.crt";
/// Root and etcd CA
pub const ETCD_CA_BUNDLE: &str = "etcd-ca-bundle.crt";

/// Service account signing key
pub const SERVICE_ACCOUNT_KEY_FILE: &str = "kube-serviceaccount.key";
/// Kubeconfig for internal components
pub const KUBECONFIG_FILE: &str = "kube-aggregator.kubeconfig";

/// Validity of the root CA
pub const LONG_LIVED_VALIDITY_DAYS: u32 = 5 * 365;
/// Validity of intermediate CAs and leaf certificates
pub const SHORT_LIVED_VALIDITY_DAYS: u32 = 365;

/// IP the API server is reachable at from the control plane host
pub const API_HOST_IP: &str = "127.0.0.1";
/// First service cluster IP, the in-cluster `kubernetes` service
pub const FIRST_SERVICE_CLUSTER_IP: &str = "10.0.0.1";

// =============================================================================
// Paths
// =============================================================================

/// Bundle file under the certificate root
pub fn ca_bundle_path(certs_dir: &Path, bundle: &str) -> PathBuf {
    certs_dir.join(CA_BUNDLE_DIR).join(bundle)
}

/// Service account key file
pub fn service_account_key_file(certs_dir: &Path) -> PathBuf {
    certs_dir.join(SERVICE_ACCOUNT_KEY_FILE)
}

/// Kubeconfig file for internal components
pub fn kubeconfig_file(certs_dir: &Path) -> PathBuf {
    certs_dir.join(KUBECONFIG_FILE)
}

/// API server serving certificate
pub fn serving_cert_file(certs_dir: &Path) -> PathBuf {
    certs_dir
        .join(SERVER_CA)
        .join(KUBE_APISERVER)
        .join(files::SERVER_CERT_FILE_NAME)
}

/// API server serving key
pub fn serving_key_file(certs_dir: &Path) -> PathBuf {
    certs_dir
        .join(SERVER_CA)
        .join(KUBE_APISERVER)
        .join(files::SERVER_KEY_FILE_NAME)
}

/// Client CA certificate, used to verify client certificates
pub fn client_ca_cert_file(certs_dir: &Path) -> PathBuf {
    files::ca_cert_path(&certs_dir.join(CLIENT_CA))
}

/// Client CA key
pub fn client_ca_key_file(certs_dir: &Path) -> PathBuf {
    files::ca_key_path(&certs_dir.join(CLIENT_CA))
}

// =============================================================================
// Tree
// =============================================================================

fn serving(name: &str, hostnames: &[&str]) -> ServingCertificateRequest {
    ServingCertificateRequest {
        meta: CsrMeta::new(name, SHORT_LIVED_VALIDITY_DAYS),
        hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
    }
}

fn client(name: &str, user: UserInfo) -> ClientCertificateRequest {
    ClientCertificateRequest {
        meta: CsrMeta::new(name, SHORT_LIVED_VALIDITY_DAYS),
        user,
    }
}

/// Declare the control plane tree and bundles for `config`.
///
/// Nothing is written; see [`cert_setup`].
pub fn certificate_chains(config: &ControlplaneConfig) -> Result<CertificateChains> {
    let certs_dir = config.certs_directory();
    let api_host = config.apiserver.external_hostname.as_str();

    let server_signer = CertificateSigner {
        serving_certificates: vec![
            serving(
                KUBE_APISERVER,
                &[
                    "kubernetes.default",
                    "kubernetes.default.svc",
                    "localhost",
                    API_HOST_IP,
                    api_host,
                    FIRST_SERVICE_CLUSTER_IP,
                ],
            ),
            serving(
                KUBE_AGGREGATOR,
                &["api.kube-public.svc", "localhost", API_HOST_IP],
            ),
        ],
        ..CertificateSigner::new(SERVER_CA, certs_dir.join(SERVER_CA), SHORT_LIVED_VALIDITY_DAYS)
    };

    let request_header_signer = CertificateSigner {
        client_certificates: vec![client(AUTH_PROXY, UserInfo::new(USER_AUTH_PROXY))],
        ..CertificateSigner::new(
            REQUEST_HEADER_CA,
            certs_dir.join(REQUEST_HEADER_CA),
            SHORT_LIVED_VALIDITY_DAYS,
        )
    };

    let client_signer = CertificateSigner {
        client_certificates: vec![
            client(ADMIN, UserInfo::with_group(USER_ADMIN, GROUP_MASTERS)),
            client(KUBE_APISERVER, UserInfo::new(USER_KUBE_APISERVER)),
            client(KUBE_AGGREGATOR, UserInfo::with_group(USER_ADMIN, GROUP_MASTERS)),
        ],
        ..CertificateSigner::new(CLIENT_CA, certs_dir.join(CLIENT_CA), SHORT_LIVED_VALIDITY_DAYS)
    };

    let mut sub_signers = vec![server_signer, request_header_signer, client_signer];
    let mut bundles = vec![
        CaBundle::new(ca_bundle_path(&certs_dir, ROOT_CA_BUNDLE), [ROOT_CA]),
        CaBundle::new(
            ca_bundle_path(&certs_dir, SERVER_CA_BUNDLE),
            [ROOT_CA, SERVER_CA],
        ),
        CaBundle::new(
            ca_bundle_path(&certs_dir, REQUEST_HEADER_CA_BUNDLE),
            [ROOT_CA, REQUEST_HEADER_CA],
        ),
        CaBundle::new(
            ca_bundle_path(&certs_dir, CLIENT_CA_BUNDLE),
            [ROOT_CA, CLIENT_CA],
        ),
    ];

    // An external store brings its own certificates
    if config.is_embed_etcd() {
        sub_signers.push(CertificateSigner {
            client_certificates: vec![client(
                ETCD_CLIENT,
                UserInfo::with_group(USER_ETCD, GROUP_ETCD),
            )],
            peer_certificates: vec![PeerCertificateRequest {
                meta: CsrMeta::new(ETCD_PEER, SHORT_LIVED_VALIDITY_DAYS),
                user: UserInfo::with_group(USER_ETCD_PEER, GROUP_ETCD_PEER),
                hostnames: vec!["localhost".to_string()],
            }],
            ..CertificateSigner::new(ETCD_CA, certs_dir.join(ETCD_CA), SHORT_LIVED_VALIDITY_DAYS)
        });
        bundles.push(CaBundle::new(
            ca_bundle_path(&certs_dir, ETCD_CA_BUNDLE),
            [ROOT_CA, ETCD_CA],
        ));
    }

    let ca_info = match (config.ca_file(), config.ca_key_file()) {
        (Some(cert), Some(key)) => Some(CaInfo::external(cert, key)),
        _ => None,
    };

    let root = CertificateSigner {
        ca_info,
        sub_signers,
        ..CertificateSigner::new(ROOT_CA, certs_dir.join(ROOT_CA), LONG_LIVED_VALIDITY_DAYS)
    };

    Ok(CertificateChains::new(root, bundles)?)
}

/// Materialize the tree and the service account key
pub fn cert_setup(config: &ControlplaneConfig) -> Result<CertificateChains> {
    let chains = certificate_chains(config)?
        .complete(SigningConfig::with_api_host(&config.apiserver.external_hostname))?;

    ensure_service_account_key(&service_account_key_file(&config.certs_directory()))?;
    Ok(chains)
}

/// Build the tree, then regenerate whatever the rotation policy flags
///
/// A flagged path below a CA that was just regenerated is skipped, since it
/// was re-issued with that CA. Externally supplied CAs are never touched.
pub fn init_certs(config: &ControlplaneConfig) -> Result<CertificateChains> {
    let chains = cert_setup(config)?;
    rotate(&chains, OffsetDateTime::now_utc())?;
    Ok(chains)
}

/// Regenerate every certificate due at `now`; returns the regenerated paths
pub fn rotate(chains: &CertificateChains, now: OffsetDateTime) -> Result<Vec<Vec<String>>> {
    let mut regenerated: Vec<Vec<String>> = Vec::new();

    for path in rotation::certs_to_regenerate(chains, now)? {
        let shown = path.join("/");
        if regenerated.iter().any(|done| path.starts_with(done)) {
            debug!(path = %shown, "Already re-issued with its CA");
            continue;
        }
        if chains.is_externally_supplied(&path)? {
            warn!(path = %shown, "Externally supplied CA is due for rotation, leaving it alone");
            continue;
        }

        info!(path = %shown, "Regenerating certificate close to expiry");
        chains.regenerate(&path)?;
        regenerated.push(path);
    }

    Ok(regenerated)
}

/// Write the kubeconfig internal components use to reach the API server
pub fn init_kubeconfig(config: &ControlplaneConfig, chains: &CertificateChains) -> Result<()> {
    let certs_dir = config.certs_directory();
    let bundle_path = ca_bundle_path(&certs_dir, SERVER_CA_BUNDLE);
    let trust_bundle =
        std::fs::read_to_string(&bundle_path).map_err(crate::Error::io(&bundle_path))?;

    let credentials = chains.get_cert_key(&[ROOT_CA, CLIENT_CA, KUBE_AGGREGATOR])?;
    let kubeconfig = Kubeconfig::new(
        &config.api_url(),
        &trust_bundle,
        &credentials.cert_pem,
        &credentials.key_pem,
    );
    write_kubeconfig(&kubeconfig_file(&certs_dir), &kubeconfig)
}

/// Full startup sequence: certificates, rotation, then the kubeconfig
pub fn bootstrap(config: &ControlplaneConfig) -> Result<CertificateChains> {
    let chains = init_certs(config)?;
    init_kubeconfig(config, &chains)?;
    info!(
        certs_dir = %config.certs_directory().display(),
        "Control plane certificates ready"
    );
    Ok(chains)
}

/// Paths the rotation policy would regenerate at `now`, without writing
/// anything. All certificates must already exist.
pub fn pending_rotation(
    config: &ControlplaneConfig,
    now: OffsetDateTime,
) -> Result<Vec<Vec<String>>> {
    let chains = certificate_chains(config)?;
    Ok(rotation::certs_to_regenerate(&chains, now)?)
}

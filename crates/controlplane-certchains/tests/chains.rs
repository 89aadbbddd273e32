//! Integration tests for building, walking and regenerating certificate chains
//!
//! Every test works in its own temporary directory and exercises the public
//! API only.

use std::fs;
use std::path::{Path, PathBuf};

use controlplane_certchains::{
    is_signed_by, rotation, CaBundle, CaInfo, CertChainError, CertificateAuthority,
    CertificateChains, CertificateInfo, CertificateSigner, ClientCertificateRequest, CsrMeta,
    PeerCertificateRequest, ServingCertificateRequest, SigningConfig, UserInfo,
};
use time::OffsetDateTime;

fn serving(name: &str, hostnames: &[&str]) -> ServingCertificateRequest {
    ServingCertificateRequest {
        meta: CsrMeta::new(name, 365),
        hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
    }
}

fn client(name: &str, user: &str, group: &str) -> ClientCertificateRequest {
    ClientCertificateRequest {
        meta: CsrMeta::new(name, 365),
        user: UserInfo::with_group(user, group),
    }
}

/// root-ca with a server-ca (two serving certs) and a client-ca (two client certs)
fn control_plane_tree(dir: &Path) -> CertificateSigner {
    CertificateSigner {
        sub_signers: vec![
            CertificateSigner {
                serving_certificates: vec![
                    serving("kube-apiserver", &["localhost", "10.0.0.1"]),
                    serving("kube-aggregator", &["api.kube-public.svc", "localhost"]),
                ],
                ..CertificateSigner::new("server-ca", dir.join("server-ca"), 365)
            },
            CertificateSigner {
                client_certificates: vec![
                    client("admin", "system:admin", "system:masters"),
                    client("kube-aggregator", "system:admin", "system:masters"),
                ],
                ..CertificateSigner::new("client-ca", dir.join("client-ca"), 365)
            },
        ],
        ..CertificateSigner::new("root-ca", dir.join("root-ca"), 5 * 365)
    }
}

fn bundles(dir: &Path) -> Vec<CaBundle> {
    vec![
        CaBundle::new(dir.join("ca-bundle/root-ca-bundle.crt"), ["root-ca"]),
        CaBundle::new(
            dir.join("ca-bundle/server-ca-bundle.crt"),
            ["root-ca", "server-ca"],
        ),
    ]
}

fn complete(dir: &Path) -> CertificateChains {
    CertificateChains::new(control_plane_tree(dir), bundles(dir))
        .expect("tree should be valid")
        .complete(SigningConfig::default())
        .expect("complete should succeed")
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path.as_ref())
        .unwrap_or_else(|e| panic!("{} should be readable: {}", path.as_ref().display(), e))
}

/// Every file under `dir`, sorted, with its contents
fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    fn collect(dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
        for entry in fs::read_dir(dir).expect("dir should be readable") {
            let path = entry.expect("entry should be readable").path();
            if path.is_dir() {
                collect(&path, out);
            } else {
                let bytes = fs::read(&path).expect("file should be readable");
                out.push((path, bytes));
            }
        }
    }
    let mut out = Vec::new();
    collect(dir, &mut out);
    out.sort();
    out
}

// =============================================================================
// Construction
// =============================================================================

/// Story: a fresh control plane starts from an empty directory.
///
/// One root, one server sub-CA with a serving cert for localhost and
/// 10.0.0.1, one bundle [root, server].
#[test]
fn end_to_end_from_empty_directory() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();

    let root = CertificateSigner {
        sub_signers: vec![CertificateSigner {
            serving_certificates: vec![serving("kube-apiserver", &["localhost", "10.0.0.1"])],
            ..CertificateSigner::new("server-ca", dir.join("server-ca"), 365)
        }],
        ..CertificateSigner::new("root-ca", dir.join("root-ca"), 5 * 365)
    };
    let bundle = dir.join("ca-bundle/server-ca-bundle.crt");
    CertificateChains::new(root, vec![CaBundle::new(&bundle, ["root-ca", "server-ca"])])
        .expect("tree should be valid")
        .complete(SigningConfig::default())
        .expect("complete should succeed");

    let root_pem = read(dir.join("root-ca/ca.crt"));
    let root_info = CertificateInfo::from_pem(&root_pem).expect("root should parse");
    assert!(root_info.is_ca);
    assert!(root_info.is_self_issued());
    assert!(is_signed_by(&root_pem, &root_pem).expect("verification should run"));
    assert!(dir.join("root-ca/serial.txt").exists());

    let server_pem = read(dir.join("server-ca/ca.crt"));
    let server_info = CertificateInfo::from_pem(&server_pem).expect("server CA should parse");
    assert!(server_info.is_ca);
    assert_eq!(server_info.issuer, root_info.subject);
    assert!(is_signed_by(&server_pem, &root_pem).expect("verification should run"));

    let leaf_pem = read(dir.join("server-ca/kube-apiserver/server.crt"));
    let leaf = CertificateInfo::from_pem(&leaf_pem).expect("serving cert should parse");
    assert!(!leaf.is_ca);
    assert!(leaf.covers("localhost"));
    assert!(leaf.covers("10.0.0.1"));
    assert!(is_signed_by(&leaf_pem, &server_pem).expect("verification should run"));
    assert!(!is_signed_by(&leaf_pem, &root_pem).expect("verification should run"));
    assert!(dir.join("server-ca/kube-apiserver/server.key").exists());

    assert_eq!(read(&bundle), format!("{}{}", root_pem, server_pem));
}

#[test]
fn complete_is_idempotent() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    complete(tmp.path());
    let first = snapshot(tmp.path());

    complete(tmp.path());
    let second = snapshot(tmp.path());

    assert_eq!(first.len(), second.len());
    assert_eq!(first, second);
}

#[test]
fn every_certificate_chains_to_its_signer() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = complete(tmp.path());

    let mut visited = Vec::new();
    chains
        .walk_chains::<&str, _>(None, |path, cert| {
            visited.push(path.join("/"));

            let own = chains.get_cert_key(path)?;
            let issuer_path = if path.len() == 1 { path } else { &path[..path.len() - 1] };
            let issuer = chains.get_cert_key(issuer_path)?;

            assert!(
                is_signed_by(&own.cert_pem, &issuer.cert_pem)?,
                "{} should be signed by {}",
                path.join("/"),
                issuer_path.join("/")
            );
            let issuer_info = CertificateInfo::from_pem(&issuer.cert_pem)?;
            assert_eq!(cert.issuer, issuer_info.subject);
            Ok(())
        })
        .expect("walk should succeed");

    assert_eq!(
        visited,
        vec![
            "root-ca",
            "root-ca/server-ca",
            "root-ca/server-ca/kube-apiserver",
            "root-ca/server-ca/kube-aggregator",
            "root-ca/client-ca",
            "root-ca/client-ca/admin",
            "root-ca/client-ca/kube-aggregator",
        ]
    );
}

#[test]
fn walk_can_be_restricted_to_a_subtree() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = complete(tmp.path());

    let mut visited = Vec::new();
    chains
        .walk_chains(Some(&["root-ca", "client-ca"][..]), |path, _| {
            visited.push(path.join("/"));
            Ok(())
        })
        .expect("walk should succeed");

    assert_eq!(
        visited,
        vec![
            "root-ca/client-ca",
            "root-ca/client-ca/admin",
            "root-ca/client-ca/kube-aggregator",
        ]
    );
}

#[test]
fn bundle_preserves_declared_order() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let reversed = dir.join("ca-bundle/reversed.crt");
    CertificateChains::new(
        control_plane_tree(dir),
        vec![CaBundle::new(&reversed, ["client-ca", "root-ca"])],
    )
    .expect("tree should be valid")
    .complete(SigningConfig::default())
    .expect("complete should succeed");

    let expected = format!(
        "{}{}",
        read(dir.join("client-ca/ca.crt")),
        read(dir.join("root-ca/ca.crt"))
    );
    assert_eq!(read(&reversed), expected);
}

#[test]
fn peer_certificate_carries_identity_and_names() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let root = CertificateSigner {
        sub_signers: vec![CertificateSigner {
            peer_certificates: vec![PeerCertificateRequest {
                meta: CsrMeta::new("peer", 365),
                user: UserInfo::with_group("system:etcd-peer:client", "system:etcd-peers"),
                hostnames: vec!["localhost".to_string()],
            }],
            ..CertificateSigner::new("etcd-ca", tmp.path().join("etcd-ca"), 365)
        }],
        ..CertificateSigner::new("root-ca", tmp.path().join("root-ca"), 5 * 365)
    };
    let chains = CertificateChains::new(root, vec![])
        .expect("tree should be valid")
        .complete(SigningConfig::default())
        .expect("complete should succeed");

    let peer = chains
        .get_cert_key(&["root-ca", "etcd-ca", "peer"])
        .expect("peer credentials should exist");
    let info = CertificateInfo::from_pem(&peer.cert_pem).expect("peer cert should parse");
    assert_eq!(info.common_name, "system:etcd-peer:client");
    assert_eq!(info.organizations, vec!["system:etcd-peers".to_string()]);
    assert!(info.covers("localhost"));
    assert!(tmp.path().join("etcd-ca/peer/peer.key").exists());
}

#[test]
fn api_host_is_added_to_serving_certificates() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = CertificateChains::new(control_plane_tree(tmp.path()), vec![])
        .expect("tree should be valid")
        .complete(SigningConfig::with_api_host("cp.example.com"))
        .expect("complete should succeed");

    for name in ["kube-apiserver", "kube-aggregator"] {
        let pair = chains
            .get_cert_key(&["root-ca", "server-ca", name])
            .expect("serving credentials should exist");
        let info = CertificateInfo::from_pem(&pair.cert_pem).expect("cert should parse");
        assert!(info.covers("cp.example.com"), "{} should cover the api host", name);
    }
}

#[cfg(unix)]
#[test]
fn private_keys_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().expect("tempdir should be created");
    complete(tmp.path());

    for key in [
        "root-ca/ca.key",
        "server-ca/ca.key",
        "server-ca/kube-apiserver/server.key",
        "client-ca/admin/client.key",
    ] {
        let mode = fs::metadata(tmp.path().join(key))
            .expect("key should exist")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600, "{} should be 0600", key);
    }
}

// =============================================================================
// Regeneration
// =============================================================================

#[test]
fn regenerating_a_leaf_leaves_siblings_alone() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let chains = complete(dir);

    let root_ca = fs::read(dir.join("root-ca/ca.crt")).expect("root CA");
    let server_ca = fs::read(dir.join("server-ca/ca.crt")).expect("server CA");
    let sibling = fs::read(dir.join("server-ca/kube-aggregator/server.crt")).expect("sibling");
    let admin = fs::read(dir.join("client-ca/admin/client.crt")).expect("admin");
    let target = fs::read(dir.join("server-ca/kube-apiserver/server.crt")).expect("target");

    chains
        .regenerate(&["root-ca", "server-ca", "kube-apiserver"])
        .expect("regenerate should succeed");

    let fresh = read(dir.join("server-ca/kube-apiserver/server.crt"));
    assert_ne!(fresh.as_bytes(), target.as_slice());
    assert!(is_signed_by(&fresh, &read(dir.join("server-ca/ca.crt"))).expect("verification"));

    assert_eq!(fs::read(dir.join("root-ca/ca.crt")).expect("root CA"), root_ca);
    assert_eq!(fs::read(dir.join("server-ca/ca.crt")).expect("server CA"), server_ca);
    assert_eq!(
        fs::read(dir.join("server-ca/kube-aggregator/server.crt")).expect("sibling"),
        sibling
    );
    assert_eq!(fs::read(dir.join("client-ca/admin/client.crt")).expect("admin"), admin);
}

#[test]
fn regenerating_a_ca_reissues_its_subtree_and_bundles() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let chains = complete(dir);

    let root_ca = read(dir.join("root-ca/ca.crt"));
    let old_server_ca = read(dir.join("server-ca/ca.crt"));
    let admin = fs::read(dir.join("client-ca/admin/client.crt")).expect("admin");

    chains
        .regenerate(&["root-ca", "server-ca"])
        .expect("regenerate should succeed");

    let server_ca = read(dir.join("server-ca/ca.crt"));
    assert_ne!(server_ca, old_server_ca);
    assert!(is_signed_by(&server_ca, &root_ca).expect("verification"));
    for leaf in ["kube-apiserver", "kube-aggregator"] {
        let cert = read(dir.join(format!("server-ca/{}/server.crt", leaf)));
        assert!(is_signed_by(&cert, &server_ca).expect("verification"));
    }

    assert_eq!(read(dir.join("root-ca/ca.crt")), root_ca);
    assert_eq!(fs::read(dir.join("client-ca/admin/client.crt")).expect("admin"), admin);
    assert_eq!(
        read(dir.join("ca-bundle/server-ca-bundle.crt")),
        format!("{}{}", root_ca, server_ca)
    );
}

#[test]
fn regenerating_unknown_path_fails() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = complete(tmp.path());

    for path in [
        vec!["root-ca", "server-ca", "nope"],
        vec!["root-ca", "admin"],
        vec!["server-ca"],
    ] {
        let err = chains.regenerate(&path).expect_err("unknown path should fail");
        assert!(matches!(err, CertChainError::UnknownPath(_)), "{:?}", path);
    }
}

#[test]
fn deleted_leaf_is_recreated_on_next_start() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    complete(dir);
    let sibling = fs::read(dir.join("client-ca/kube-aggregator/client.crt")).expect("sibling");

    fs::remove_file(dir.join("client-ca/admin/client.key")).expect("delete key");
    complete(dir);

    assert!(dir.join("client-ca/admin/client.key").exists());
    let admin = read(dir.join("client-ca/admin/client.crt"));
    assert!(is_signed_by(&admin, &read(dir.join("client-ca/ca.crt"))).expect("verification"));
    assert_eq!(
        fs::read(dir.join("client-ca/kube-aggregator/client.crt")).expect("sibling"),
        sibling
    );
}

#[test]
fn leaf_with_a_replaced_key_is_reissued_on_next_start() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    complete(dir);

    let cert_path = dir.join("server-ca/kube-apiserver/server.crt");
    let key_path = dir.join("server-ca/kube-apiserver/server.key");
    let cert_before = read(&cert_path);
    let foreign = CertificateAuthority::generate_self_signed("other-ca", 365, None)
        .expect("CA creation should succeed");
    fs::write(&key_path, foreign.ca_key_pem()).expect("write should succeed");

    complete(dir);

    assert_ne!(read(&cert_path), cert_before);
    assert_ne!(read(&key_path), foreign.ca_key_pem());
    assert!(is_signed_by(&read(&cert_path), &read(dir.join("server-ca/ca.crt"))).expect("verification"));

    let settled = snapshot(dir);
    complete(dir);
    assert_eq!(snapshot(dir), settled);
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn fresh_tree_needs_no_rotation_until_margins_are_reached() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = complete(tmp.path());

    let now = OffsetDateTime::now_utc();
    let due = rotation::certs_to_regenerate(&chains, now).expect("walk should succeed");
    assert!(due.is_empty(), "nothing should be due yet: {:?}", due);

    // 1-year certs have under 7 months left after 6 months
    let later = now + time::Duration::days(6 * 30);
    let due = rotation::certs_to_regenerate(&chains, later).expect("walk should succeed");
    assert!(due.contains(&vec!["root-ca".to_string(), "server-ca".to_string()]));
    assert!(due.contains(&vec![
        "root-ca".to_string(),
        "client-ca".to_string(),
        "admin".to_string()
    ]));
    assert!(!due.contains(&vec!["root-ca".to_string()]));
}

#[test]
fn expired_root_is_flagged() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let chains = complete(tmp.path());

    let after_expiry = OffsetDateTime::now_utc() + time::Duration::days(6 * 365);
    let due = rotation::certs_to_regenerate(&chains, after_expiry).expect("walk should succeed");
    assert_eq!(due.len(), 7);
    assert_eq!(due[0], vec!["root-ca".to_string()]);
}

// =============================================================================
// Externally supplied root
// =============================================================================

fn external_root(dir: &Path) -> (PathBuf, PathBuf, String) {
    let provided = CertificateAuthority::generate_self_signed("corp-root", 10 * 365, None)
        .expect("CA creation should succeed");
    let cert = dir.join("provided/ca.crt");
    let key = dir.join("provided/ca.key");
    fs::create_dir_all(dir.join("provided")).expect("mkdir");
    fs::write(&cert, provided.ca_cert_pem()).expect("write cert");
    fs::write(&key, provided.ca_key_pem()).expect("write key");
    (cert, key, provided.ca_cert_pem().to_string())
}

#[test]
fn external_root_signs_the_tree_and_is_never_rewritten() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let (cert, key, root_pem) = external_root(dir);

    let root = CertificateSigner {
        ca_info: Some(CaInfo::external(&cert, &key)),
        ..control_plane_tree(dir)
    };
    let chains = CertificateChains::new(root, bundles(dir))
        .expect("tree should be valid")
        .complete(SigningConfig::default())
        .expect("complete should succeed");

    assert!(!dir.join("root-ca/ca.crt").exists());
    assert!(is_signed_by(&read(dir.join("server-ca/ca.crt")), &root_pem).expect("verification"));
    assert_eq!(read(dir.join("ca-bundle/root-ca-bundle.crt")), root_pem);
    assert!(chains
        .is_externally_supplied(&["root-ca"])
        .expect("path should resolve"));

    let err = chains
        .regenerate(&["root-ca"])
        .expect_err("external root cannot be regenerated");
    assert!(matches!(err, CertChainError::ExternallySupplied(_)));
    assert_eq!(read(&cert), root_pem);
}

#[test]
fn missing_external_root_is_a_config_error() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let root = CertificateSigner {
        ca_info: Some(CaInfo::external(dir.join("missing.crt"), dir.join("missing.key"))),
        ..control_plane_tree(dir)
    };

    let err = CertificateChains::new(root, vec![])
        .expect("tree should be valid")
        .complete(SigningConfig::default())
        .expect_err("missing external CA should fail");
    assert!(err.is_config_error());
    assert!(!dir.join("server-ca").exists());
}

#[test]
fn duplicate_signer_names_are_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir should be created");
    let dir = tmp.path();
    let mut root = control_plane_tree(dir);
    root.sub_signers[1].sub_signers.push(CertificateSigner::new(
        "server-ca",
        dir.join("nested"),
        365,
    ));

    let err = CertificateChains::new(root, vec![]).expect_err("duplicate name should fail");
    assert!(matches!(err, CertChainError::DuplicateName { .. }));
}

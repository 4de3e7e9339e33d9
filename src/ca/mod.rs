//! Certificate authority (C5): a long-lived root CA plus on-demand,
//! cached per-host leaf certificates.
//!
//! The root is generated once with `IsCa::Ca(..)`; leaves are generated
//! per-host with `IsCa::NoCa` and signed with
//! `Certificate::serialize_der_with_signer`, which rcgen 0.10 supports
//! directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType, PKCS_RSA_SHA256,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::{Certificate as RustlsCertificate, PrivateKey};

use crate::error::{Error, Result};

const RSA_KEY_BITS: usize = 2048;

const CA_COMMON_NAME: &str = "Roo Sniffer CA";
const CA_ORGANIZATION: &str = "Roo Sniffer";
const CA_COUNTRY: &str = "US";
const CA_FILE_STEM: &str = "roo-sniffer-ca";

/// A per-host leaf certificate handed to the MITM bridge.
#[derive(Debug, Clone)]
pub struct LeafCert {
    pub cert: RustlsCertificate,
    pub key: PrivateKey,
}

struct RootMaterial {
    rcgen_cert: Certificate,
    cert_der: RustlsCertificate,
    key_der: PrivateKey,
}

/// Owns the root key pair, the root's self-signed certificate, and an
/// in-process cache of minted leaves. Unbounded for the process's lifetime —
/// leaves are never evicted or persisted, per the design's data model.
pub struct CertificateAuthority {
    root: Arc<RootMaterial>,
    leaves: Mutex<HashMap<String, Arc<LeafCert>>>,
    cert_path: PathBuf,
    key_path: PathBuf,
}

/// The root cert/key file paths the CA persists under a given `cert_dir`,
/// exposed so the `cert generate`/`cert inspect` CLI commands can locate
/// them without duplicating the naming scheme.
pub fn ca_paths(cert_dir: &Path) -> (PathBuf, PathBuf) {
    (
        cert_dir.join(format!("{}.pem", CA_FILE_STEM)),
        cert_dir.join(format!("{}-key.pem", CA_FILE_STEM)),
    )
}

impl CertificateAuthority {
    /// Load the CA from `cert_dir` if both files exist and parse; otherwise
    /// generate a fresh root and persist it, creating `cert_dir` if needed.
    pub fn load_or_init(cert_dir: &Path) -> Result<Self> {
        let (cert_path, key_path) = ca_paths(cert_dir);

        let root = match load_root(&cert_path, &key_path) {
            Some(root) => root,
            None => {
                let root = generate_root()?;
                persist_root(cert_dir, &cert_path, &key_path, &root)?;
                root
            }
        };

        Ok(Self {
            root: Arc::new(root),
            leaves: Mutex::new(HashMap::new()),
            cert_path,
            key_path,
        })
    }

    /// The on-disk path of the root certificate PEM, for the operator to
    /// install as a trust root.
    pub fn ca_cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Return the cached leaf for `hostname`, generating and caching one if
    /// absent. RSA key generation runs on a blocking thread so the accept
    /// loop keeps making progress for unrelated connections during a
    /// first-time leaf mint.
    pub async fn leaf_for(&self, hostname: &str) -> Result<Arc<LeafCert>> {
        if let Some(leaf) = self.leaves.lock().unwrap().get(hostname) {
            return Ok(Arc::clone(leaf));
        }

        let root = Arc::clone(&self.root);
        let host = hostname.to_string();
        let leaf = tokio::task::spawn_blocking(move || generate_leaf(&root, &host))
            .await
            .map_err(|e| Error::CryptoError(format!("leaf generation task panicked: {}", e)))??;
        let leaf = Arc::new(leaf);

        // Concurrent first-time insertion for the same hostname is allowed
        // to race: whichever call's leaf lands last wins, both are
        // semantically equivalent.
        self.leaves
            .lock()
            .unwrap()
            .insert(hostname.to_string(), Arc::clone(&leaf));
        Ok(leaf)
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }
}

/// rcgen can only *generate* ECDSA/Ed25519 keys on its own; RSA key material
/// has to come from elsewhere and be handed in as an external keypair. `rsa`
/// generates the 2048-bit key spec.md §3 requires for both the root and every
/// leaf; its PKCS#8 DER encoding is exactly what `rcgen::KeyPair::from_der`
/// (backed by `ring`'s RSA signing support) accepts.
fn generate_rsa_key_pair() -> Result<rcgen::KeyPair> {
    let rsa_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
        .map_err(|e| Error::CryptoError(format!("rsa key generation failed: {}", e)))?;
    let pkcs8_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| Error::CryptoError(format!("rsa key encoding failed: {}", e)))?;
    rcgen::KeyPair::from_der(pkcs8_der.as_bytes()).map_err(Error::from)
}

/// Monotonically increasing serial derived from wall-clock nanoseconds
/// (spec.md §3: "serial = monotonically increasing from wall-clock"). Falls
/// back to a bare increment of the last-issued serial when two leaves are
/// minted within the same clock tick, so two serials are never equal.
fn next_serial() -> u64 {
    static LAST_SERIAL: AtomicU64 = AtomicU64::new(0);

    let wall_clock = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    loop {
        let last = LAST_SERIAL.load(Ordering::SeqCst);
        let candidate = wall_clock.max(last + 1);
        if LAST_SERIAL
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

fn generate_root() -> Result<RootMaterial> {
    let mut params = CertificateParams::new(Vec::<String>::new());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, CA_COUNTRY);
    dn.push(DnType::OrganizationName, CA_ORGANIZATION);
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.alg = &PKCS_RSA_SHA256;
    params.key_pair = Some(generate_rsa_key_pair()?);

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + Duration::from_secs(10 * 365 * 24 * 60 * 60)).into();

    let rcgen_cert = Certificate::from_params(params)?;
    let cert_der = RustlsCertificate(rcgen_cert.serialize_der()?);
    let key_der = PrivateKey(rcgen_cert.serialize_private_key_der());

    Ok(RootMaterial {
        rcgen_cert,
        cert_der,
        key_der,
    })
}

fn generate_leaf(root: &RootMaterial, hostname: &str) -> Result<LeafCert> {
    let mut params = CertificateParams::new(vec![hostname.to_string()]);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    params.distinguished_name = dn;

    params.is_ca = IsCa::NoCa;
    params.subject_alt_names = vec![SanType::DnsName(hostname.to_string())];
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.alg = &PKCS_RSA_SHA256;
    params.key_pair = Some(generate_rsa_key_pair()?);
    params.serial_number = Some(next_serial());

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + Duration::from_secs(365 * 24 * 60 * 60)).into();

    let leaf = Certificate::from_params(params)?;
    let cert_der = leaf.serialize_der_with_signer(&root.rcgen_cert)?;
    let key_der = leaf.serialize_private_key_der();

    Ok(LeafCert {
        cert: RustlsCertificate(cert_der),
        key: PrivateKey(key_der),
    })
}

fn load_root(cert_path: &Path, key_path: &Path) -> Option<RootMaterial> {
    let cert_pem = std::fs::read(cert_path).ok()?;
    let key_pem = std::fs::read(key_path).ok()?;

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .ok()?
        .into_iter()
        .next()?;
    let key_der = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())
        .ok()?
        .into_iter()
        .next()?;

    // The on-disk PEM is the source of truth for what we serve as the CA's
    // own cert/key. To *sign* new leaves we still need a rcgen::Certificate
    // carrying the same key pair and subject, so re-derive one from the
    // loaded key material rather than the (already-persisted) DER bytes.
    let key_pair = rcgen::KeyPair::from_der(&key_der).ok()?;

    let mut params = CertificateParams::new(Vec::<String>::new());
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, CA_COUNTRY);
    dn.push(DnType::OrganizationName, CA_ORGANIZATION);
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.alg = &PKCS_RSA_SHA256;
    params.key_pair = Some(key_pair);

    let rcgen_cert = Certificate::from_params(params).ok()?;

    Some(RootMaterial {
        rcgen_cert,
        cert_der: RustlsCertificate(cert_der),
        key_der: PrivateKey(key_der),
    })
}

fn persist_root(cert_dir: &Path, cert_path: &Path, key_path: &Path, root: &RootMaterial) -> Result<()> {
    std::fs::create_dir_all(cert_dir).map_err(Error::TransportError)?;

    write_pem(cert_path, "CERTIFICATE", &root.cert_der.0)?;
    write_pem(key_path, "PRIVATE KEY", &root.key_der.0)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(())
}

fn write_pem(path: &Path, label: &str, der: &[u8]) -> Result<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let b64 = STANDARD.encode(der);
    let wrapped: Vec<&str> = {
        let mut lines = Vec::new();
        let bytes = b64.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let end = (i + 64).min(bytes.len());
            lines.push(std::str::from_utf8(&bytes[i..end]).unwrap_or(""));
            i = end;
        }
        lines
    };
    let pem = format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        wrapped.join("\n"),
        label = label,
    );
    std::fs::write(path, pem).map_err(Error::TransportError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    #[test]
    fn generates_and_persists_root_once() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();
        let first_bytes = std::fs::read(ca.ca_cert_path()).unwrap();

        // Reload against the same directory: the file must be byte-identical
        // (Property 3: CA idempotence across a restart).
        let ca2 = CertificateAuthority::load_or_init(dir.path()).unwrap();
        let second_bytes = std::fs::read(ca2.ca_cert_path()).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn leaf_is_signed_by_root_with_matching_cn_and_san() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();

        let leaf = ca.leaf_for("api.example.test").await.unwrap();
        let (_, parsed) = X509Certificate::from_der(&leaf.cert.0).unwrap();

        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(cn, "api.example.test");

        let sans: Vec<String> = parsed
            .subject_alternative_name()
            .unwrap()
            .unwrap()
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect();
        assert!(sans.contains(&"api.example.test".to_string()));
    }

    #[tokio::test]
    async fn leaf_for_same_host_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();

        let first = ca.leaf_for("cached.test").await.unwrap();
        let second = ca.leaf_for("cached.test").await.unwrap();
        assert_eq!(first.cert.0, second.cert.0);
        assert_eq!(ca.cache_len(), 1);
    }

    /// spec.md §3: both the root and every leaf are 2048-bit RSA, not
    /// rcgen's ECDSA default.
    #[tokio::test]
    async fn leaf_and_root_use_2048_bit_rsa_keys() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();

        let root_pem = std::fs::read(ca.ca_cert_path()).unwrap();
        let root_der = rustls_pemfile::certs(&mut root_pem.as_slice())
            .unwrap()
            .remove(0);
        assert_rsa_2048(&root_der);

        let leaf = ca.leaf_for("rsa.example.test").await.unwrap();
        assert_rsa_2048(&leaf.cert.0);
    }

    fn assert_rsa_2048(der: &[u8]) {
        let (_, parsed) = X509Certificate::from_der(der).unwrap();
        let spki = parsed.public_key();
        assert_eq!(spki.algorithm.algorithm.to_id_string(), "1.2.840.113549.1.1.1");
        match spki.parsed().unwrap() {
            x509_parser::public_key::PublicKey::RSA(rsa_key) => {
                assert_eq!(rsa_key.key_size(), 2048);
            }
            _ => panic!("expected an RSA public key"),
        }
    }

    /// spec.md §3: leaf serials are monotonically increasing from wall-clock.
    #[tokio::test]
    async fn leaf_serials_increase_across_mints() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();

        let first = ca.leaf_for("first.example.test").await.unwrap();
        let second = ca.leaf_for("second.example.test").await.unwrap();

        let (_, p1) = X509Certificate::from_der(&first.cert.0).unwrap();
        let (_, p2) = X509Certificate::from_der(&second.cert.0).unwrap();
        assert!(p2.raw_serial_as_string() != p1.raw_serial_as_string());
    }
}

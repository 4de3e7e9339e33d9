//! rustls config helpers for the MITM bridge (C6): a server config built
//! from a minted leaf certificate, and a client config for the outbound
//! connection to the real host.

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Build the TLS server config the MITM bridge presents to the client,
/// using a leaf certificate minted for this connection's hostname.
///
/// HTTP/2 is out of scope (the sniffer only understands HTTP/1.1 framing),
/// so ALPN only advertises `http/1.1` — unlike the source this was modeled
/// on, which also advertised `h2`.
pub fn create_server_config(cert: Certificate, key: PrivateKey) -> Result<Arc<ServerConfig>> {
    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|e| Error::TlsError(e.to_string()))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Build the TLS client config used for the MITM bridge's outbound
/// connection to the real upstream host.
///
/// When `verify_upstream_tls` is false (the default, matching the
/// documented trade-off that this is an interception tool and must
/// tolerate unusual upstream chains), certificate validation is disabled
/// entirely via [`AcceptAllCertVerifier`]. When true, the system root
/// store is used for standard validation.
pub fn create_client_config(verify_upstream_tls: bool) -> Result<Arc<ClientConfig>> {
    let config = if verify_upstream_tls {
        let mut root_store = RootCertStore::empty();
        add_system_root_certificates(&mut root_store);
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAllCertVerifier))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn add_system_root_certificates(root_store: &mut RootCertStore) {
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let mut added = 0;
            for cert_der in certs {
                if root_store.add(&Certificate(cert_der.to_vec())).is_ok() {
                    added += 1;
                }
            }
            debug!("loaded {} system root certificates", added);
        }
        Err(e) => warn!("could not load system root certificates: {}", e),
    }
}

/// Disables upstream certificate verification. This is a documented
/// security trade-off, not an oversight: the system is an interception
/// tool whose operator has already opted in by installing the private CA.
pub struct AcceptAllCertVerifier;

impl ServerCertVerifier for AcceptAllCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

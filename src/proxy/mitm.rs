//! MITM TLS bridge (C6): for watched `CONNECT` targets, terminate TLS
//! toward the client with a freshly minted leaf certificate, open a second
//! TLS connection to the real host, and splice the two together while
//! feeding a copy of each direction's plaintext to the framing sniffer (C7).
//!
//! Each direction is sniffed independently; requests and their eventual
//! responses are paired up through a FIFO queue on the assumption that
//! HTTP/1.1 keep-alive never reorders responses relative to requests.

use std::collections::VecDeque;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error};

use crate::models::body_preview;
use crate::proxy::listener::ProxyContext;
use crate::tls::{create_client_config, create_server_config};
use crate::utils::logging::log_connect_failure;
use crate::RequestRecord;

const READ_BUF_SIZE: usize = 8192;

/// Run the MITM bridge for one `CONNECT`ed client's raw stream, already past
/// the literal tunnel acknowledgment the listener (C1) wrote to it.
pub async fn run(ctx: ProxyContext, client: TcpStream, host: String, port: u16) {
    let leaf = match ctx.ca.leaf_for(&host).await {
        Ok(leaf) => leaf,
        Err(e) => {
            error!("leaf cert generation failed for {}: {}", host, e);
            return;
        }
    };

    let server_config = match create_server_config(leaf.cert.clone(), leaf.key.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("tls server config failed for {}: {}", host, e);
            return;
        }
    };

    let client_tls = match TlsAcceptor::from(server_config).accept(client).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("tls accept failed for {}: {}", host, e);
            return;
        }
    };

    let server_name = match rustls::ServerName::try_from(host.as_str()) {
        Ok(name) => name,
        Err(e) => {
            error!("invalid server name {}: {}", host, e);
            return;
        }
    };

    let client_config = match create_client_config(ctx.config.verify_upstream_tls) {
        Ok(config) => config,
        Err(e) => {
            error!("tls client config failed for {}: {}", host, e);
            return;
        }
    };

    let connect_timeout = std::time::Duration::from_secs(ctx.config.request_timeout_secs);
    let upstream_tcp = match tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log_connect_failure(&host, port, &e.to_string());
            return;
        }
        Err(_) => {
            log_connect_failure(&host, port, "connect timed out");
            return;
        }
    };

    let upstream_tls = match TlsConnector::from(client_config).connect(server_name, upstream_tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("upstream tls handshake failed for {}:{}: {}", host, port, e);
            return;
        }
    };

    splice(&ctx, client_tls, upstream_tls, &host).await;
}

/// Copy bytes in both directions, feeding each direction's plaintext to its
/// own sniffer. Sniffing never gates the copy: bytes are written upstream
/// (or back to the client) the moment they are read, and parsing happens on
/// a cloned slice afterward.
async fn splice<C, U>(ctx: &ProxyContext, client_tls: C, upstream_tls: U, host: &str)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    U: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use crate::sniffer::{RequestSniffer, ResponseSniffer};

    let (mut client_rd, mut client_wr) = split(client_tls);
    let (mut upstream_rd, mut upstream_wr) = split(upstream_tls);

    let mut request_sniffer = RequestSniffer::new();
    let mut response_sniffer = ResponseSniffer::new();
    let mut pending: VecDeque<RequestRecord> = VecDeque::new();

    let mut up_buf = vec![0u8; READ_BUF_SIZE];
    let mut down_buf = vec![0u8; READ_BUF_SIZE];
    let preview_limit = ctx.config.max_body_preview_bytes;

    loop {
        tokio::select! {
            result = client_rd.read(&mut up_buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        if upstream_wr.write_all(&up_buf[..n]).await.is_err() {
                            break;
                        }
                        for parsed in request_sniffer.feed(&up_buf[..n]) {
                            let mut record = RequestRecord::new(parsed.method.clone(), host.to_string(), parsed.path.clone(), true);
                            if ctx.config.verbose {
                                record.headers = Some(parsed.headers.clone());
                            }
                            if matches!(parsed.method.as_str(), "POST" | "PUT" | "PATCH") && !parsed.body.is_empty() {
                                record.body_preview = Some(body_preview(&parsed.body, preview_limit));
                            }
                            ctx.sink.emit(&record);
                            pending.push_back(record);
                        }
                    }
                    Err(e) => {
                        debug!("mitm read from client for {} ended: {}", host, e);
                        break;
                    }
                }
            }
            result = upstream_rd.read(&mut down_buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        if client_wr.write_all(&down_buf[..n]).await.is_err() {
                            break;
                        }
                        for parsed in response_sniffer.feed(&down_buf[..n], preview_limit) {
                            debug!("{} {} <- {} {}", host, "response", parsed.status_code, parsed.reason);
                            if let Some(record) = pending.pop_front() {
                                let preview = if ctx.config.verbose {
                                    parsed.body_preview.as_deref().map(|body| body_preview(body, preview_limit))
                                } else {
                                    None
                                };
                                ctx.sink.emit(&record.with_response(parsed.status_code, preview));
                            }
                        }
                    }
                    Err(e) => {
                        debug!("mitm read from upstream for {} ended: {}", host, e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use crate::config::Config;
    use crate::sink::{RingBufferSubscriber, Sink};
    use crate::watch::WatchList;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_context(sink: Arc<dyn Sink>) -> ProxyContext {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();
        ProxyContext::new(
            Arc::new(Config::default()),
            Arc::new(WatchList::new(vec!["example.test".to_string()])),
            Arc::new(ca),
            sink,
        )
    }

    /// Scenario S3 (minus the TLS handshake): feeding a plaintext POST
    /// through `splice` both forwards it byte-for-byte to the upstream half
    /// (Property 6: the sniffer never gates forwarding) and emits exactly one
    /// watched `RequestRecord` carrying the body preview.
    #[tokio::test]
    async fn splice_forwards_bytes_and_emits_sniffed_record() {
        let ring = Arc::new(RingBufferSubscriber::new(10));
        let ctx = test_context(ring.clone());

        let (client_near, client_far) = tokio::io::duplex(256);
        let (mut upstream_near, upstream_far) = tokio::io::duplex(256);

        let request = b"POST /v1/m HTTP/1.1\r\nHost: api.example.test\r\nContent-Length: 5\r\n\r\nhello";

        let splice_task = tokio::spawn(async move {
            splice(&ctx, client_far, upstream_far, "api.example.test").await;
        });

        let mut client_near = client_near;
        client_near.write_all(request).await.unwrap();

        let mut received = vec![0u8; request.len()];
        upstream_near.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, request);

        drop(client_near);
        drop(upstream_near);
        splice_task.await.unwrap();

        let records = ring.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].method, "POST");
        assert_eq!(records[0].path, "/v1/m");
        assert!(records[0].watched);
        assert_eq!(records[0].body_preview.as_deref(), Some("hello"));
    }
}

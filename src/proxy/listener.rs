//! Listener/dispatcher (C1): binds the single listening port and, for each
//! accepted connection, reads the first HTTP request line and header block
//! itself before deciding where the connection goes.
//!
//! This proxy owns the accept loop rather than handing sockets to
//! `hyper::Server`: the `CONNECT` acknowledgment (C4/C6) must be the literal
//! bytes `HTTP/1.1 200 Connection Established\r\n\r\n`, and `http::StatusCode`
//! has no way to render a non-canonical reason phrase, so a response built
//! through hyper's normal dispatch can only ever say "200 OK". Reading the
//! head ourselves also matches this proxy's own framing sniffer (C7) and
//! `httphead` module rather than introducing a second, hyper-owned parser.
//! Non-`CONNECT` connections still get full HTTP/1.1 handling via
//! `hyper::server::conn::Http`, fed the bytes already read off the wire
//! followed by the rest of the live socket. Multi-process accept-socket
//! sharing (SO_REUSEPORT) is out of scope — one listener is enough for an
//! interception proxy meant to watch one client's traffic.

use std::io::Cursor;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::httphead::{find_header_terminator, parse_request_head};
use crate::proxy::{forward, mitm, tunnel};
use crate::sink::Sink;
use crate::utils::http::parse_connect_target;
use crate::utils::logging::{log_connect_established, log_incoming_request};
use crate::watch::WatchList;
use crate::{Error, RequestRecord, Result};

/// Upper bound on how many bytes of request line + headers this listener
/// will buffer while looking for the terminating `\r\n\r\n` before giving up
/// on a connection.
const MAX_HEAD_BYTES: usize = 8192;

/// Shared, read-mostly state handed to every connection: config, the
/// hot-swappable watch list, the certificate authority, the observation
/// sink, and the upstream HTTP client used by the plain forwarder. Cloned
/// cheaply per connection (everything inside is already reference-counted).
#[derive(Clone)]
pub struct ProxyContext {
    pub config: Arc<Config>,
    pub watch_list: Arc<WatchList>,
    pub ca: Arc<CertificateAuthority>,
    pub sink: Arc<dyn Sink>,
    pub http_client: hyper::Client<hyper::client::HttpConnector>,
}

impl ProxyContext {
    pub fn new(
        config: Arc<Config>,
        watch_list: Arc<WatchList>,
        ca: Arc<CertificateAuthority>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        // Bounds only the connect phase of each upstream request, per
        // `Config::request_timeout_secs`'s documented contract — mirrors the
        // teacher's `http_connector.set_connect_timeout` usage rather than
        // wrapping the whole request/response exchange in a timeout.
        let mut connector = hyper::client::HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.request_timeout_secs)));
        let http_client = hyper::Client::builder().build(connector);

        Self {
            config,
            watch_list,
            ca,
            sink,
            http_client,
        }
    }
}

/// Bind the listener and accept forever, spawning one task per connection.
pub async fn run(ctx: ProxyContext) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.listen_port));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::PortInUse(format!("{}: {}", addr, e)))?;

    info!("roo-sniffer listening on {}", addr);

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(handle_connection(ctx, stream, remote_addr));
    }
}

/// Read the request line + headers off a freshly accepted connection and
/// route it: `CONNECT` targets go to [`handle_connect`], everything else is
/// served as plain HTTP/1.1 with the bytes already read replayed first.
async fn handle_connection(ctx: ProxyContext, mut stream: TcpStream, remote_addr: SocketAddr) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(idx) = find_header_terminator(&buf) {
            break idx + 4;
        }
        if buf.len() >= MAX_HEAD_BYTES {
            warn!("request head from {} exceeded {} bytes", remote_addr, MAX_HEAD_BYTES);
            return;
        }
        match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!("read from {} failed: {}", remote_addr, e);
                return;
            }
        }
    };

    let (method, target, _version, _headers) = parse_request_head(&buf[..head_end]);
    log_incoming_request(&method, &target, &remote_addr);

    if method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(ctx, &target, stream).await;
    } else {
        serve_forwarded(ctx, buf, stream, remote_addr).await;
    }
}

/// Parse the `CONNECT` target, record the tunnel-open event, write the
/// literal acknowledgment spec.md requires directly to the socket, then hand
/// the raw stream to the opaque tunneler (C4) or the MITM bridge (C6)
/// depending on the watch matcher's verdict.
async fn handle_connect(ctx: ProxyContext, target: &str, mut stream: TcpStream) {
    let (host, port) = match parse_connect_target(target) {
        Ok(hp) => hp,
        Err(e) => {
            let body = format!("bad CONNECT target: {}", e);
            let _ = stream
                .write_all(
                    format!(
                        "HTTP/1.1 400 Bad Request\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    )
                    .as_bytes(),
                )
                .await;
            return;
        }
    };

    let watched = ctx.watch_list.is_watched(&host);
    log_connect_established(&host, port, watched);
    ctx.sink.emit(&RequestRecord::new("CONNECT", host.clone(), format!(":{}", port), watched));

    if stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.is_err() {
        return;
    }

    if watched {
        mitm::run(ctx, stream, host, port).await;
    } else {
        let connect_timeout = Duration::from_secs(ctx.config.request_timeout_secs);
        tunnel::run(stream, host, port, connect_timeout).await;
    }
}

/// Serve a non-`CONNECT` connection as plain HTTP/1.1, replaying the bytes
/// already consumed while looking for the head before falling through to
/// the live socket.
async fn serve_forwarded(ctx: ProxyContext, prefix: Vec<u8>, stream: TcpStream, remote_addr: SocketAddr) {
    let io = PrefixedStream::new(prefix, stream);
    let service = service_fn(move |req| {
        let ctx = ctx.clone();
        async move { Ok::<Response<Body>, std::convert::Infallible>(forward::handle(&ctx, req).await) }
    });

    if let Err(e) = Http::new().http1_only(true).serve_connection(io, service).await {
        debug!("connection from {} ended: {}", remote_addr, e);
    }
}

/// Replays a buffered prefix ahead of a live `TcpStream` on read; writes pass
/// straight through. Lets a connection whose head this listener already
/// consumed be handed to `hyper::server::conn::Http` as if nothing had been
/// read from it yet.
struct PrefixedStream {
    prefix: Cursor<Vec<u8>>,
    stream: TcpStream,
}

impl PrefixedStream {
    fn new(prefix: Vec<u8>, stream: TcpStream) -> Self {
        Self {
            prefix: Cursor::new(prefix),
            stream,
        }
    }

    fn prefix_remaining(&self) -> usize {
        self.prefix.get_ref().len() - self.prefix.position() as usize
    }
}

impl AsyncRead for PrefixedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.prefix_remaining() > 0 {
            let pos = self.prefix.position() as usize;
            let available = &self.prefix.get_ref()[pos..];
            let n = available.len().min(buf.remaining());
            buf.put_slice(&available[..n]);
            self.prefix.set_position((pos + n) as u64);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Property asserted by scenarios S2/S3: the client must observe the
    /// literal spec status line, not whatever `http::StatusCode::OK`'s
    /// canonical reason phrase would render.
    #[tokio::test]
    async fn connect_ack_is_the_literal_spec_bytes() {
        use crate::ca::CertificateAuthority;
        use crate::sink::{RingBufferSubscriber, Sink};
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_init(dir.path()).unwrap();
        let ring: Arc<dyn Sink> = Arc::new(RingBufferSubscriber::new(10));
        let ctx = ProxyContext::new(
            Arc::new(Config::default()),
            Arc::new(WatchList::new(vec![])),
            Arc::new(ca),
            ring,
        );

        let accept_task = tokio::spawn(async move {
            let (stream, remote_addr) = listener.accept().await.unwrap();
            handle_connection(ctx, stream, remote_addr).await;
        });

        let mut client = TcpStream::connect(server_addr).await.unwrap();
        client.write_all(b"CONNECT example.test:443 HTTP/1.1\r\nHost: example.test:443\r\n\r\n").await.unwrap();

        let mut observed = vec![0u8; "HTTP/1.1 200 Connection Established\r\n\r\n".len()];
        client.read_exact(&mut observed).await.unwrap();
        assert_eq!(&observed, b"HTTP/1.1 200 Connection Established\r\n\r\n");

        drop(client);
        let _ = accept_task.await;
    }
}

//! Opaque TCP tunneler (C4): for `CONNECT` targets the watch matcher does
//! not select, splice bytes between the client and the real destination
//! without parsing a single one of them.
//!
//! Uses `tokio::io::copy_bidirectional` over the already upgraded
//! connection — no parsing, no buffering beyond what that helper does
//! internally.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::utils::logging::log_connect_failure;

/// Connect to `host:port` and splice it with the client's already-accepted
/// raw stream until either side closes. Property: bytes observed on the wire
/// in this mode are byte-for-byte identical to a direct, unproxied
/// connection — nothing here inspects or rewrites the stream.
///
/// `connect_timeout` bounds only the initial upstream connect (per
/// `Config::request_timeout_secs`); it does not apply to bytes already
/// flowing through an established tunnel.
pub async fn run(mut client: TcpStream, host: String, port: u16, connect_timeout: Duration) {
    let mut upstream = match tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
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

    splice(&mut client, &mut upstream, &host, port).await;
}

/// The actual byte-splice, pulled out of [`run`] so it can be exercised
/// against anything `AsyncRead + AsyncWrite` (a real `TcpStream` pair in
/// production, an in-memory duplex pair in tests) rather than only through a
/// live `CONNECT` handshake.
async fn splice<C, U>(client: &mut C, upstream: &mut U, host: &str, port: u16)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(client, upstream).await {
        Ok((to_upstream, to_client)) => {
            debug!(
                "tunnel to {}:{} closed ({} bytes up, {} bytes down)",
                host, port, to_upstream, to_client
            );
        }
        Err(e) => debug!("tunnel to {}:{} ended: {}", host, port, e),
    }
}

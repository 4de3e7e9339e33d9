//! Error handling for the proxy server.
//!
//! Every error kind is either fatal at startup (`ConfigError`, `CryptoError`,
//! `PortInUse`) or scoped to a single connection (everything else) — nothing
//! here is allowed to unwind the accept loop.

use thiserror::Error;

/// Top-level error type for the proxy server.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid listen port, unusable cert dir. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// CA load/parse failed and regeneration also failed. Fatal at startup.
    #[error("certificate authority error: {0}")]
    CryptoError(String),

    /// Listen bind failed with EADDRINUSE. Fatal at startup.
    #[error("port already in use: {0}")]
    PortInUse(String),

    /// Per-connection I/O failure. Logged, connection closed, proxy continues.
    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    /// Bad request line or malformed absolute-form URL in the plain forwarder.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Cannot reach the origin in the plain forwarder.
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// TLS handshake failure in either direction of a MITM bridge.
    #[error("tls error: {0}")]
    TlsError(String),

    /// Log-file write failure. Record dropped for that sink, never
    /// propagated to the proxy path.
    #[error("sink error: {0}")]
    SinkError(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CryptoError(err.to_string())
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(err: rcgen::RcgenError) -> Self {
        Error::CryptoError(err.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::TlsError(err.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::TransportError(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SinkError(err.to_string())
    }
}

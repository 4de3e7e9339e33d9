//! Proxy configuration.
//!
//! `Config` is immutable after start (per the design's concurrency model):
//! the listener, forwarder, tunneler and MITM bridge all read from a single
//! `Arc<Config>` handed to them at startup. The one runtime-mutable piece,
//! `watch_domains`, is carried separately as an `ArcSwap` by
//! [`crate::watch::WatchList`] rather than living inside this struct.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Top-level configuration for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the listener binds on all interfaces.
    pub listen_port: u16,

    /// Filesystem path for the append-only JSON-lines observation sink.
    pub log_path: PathBuf,

    /// Case-insensitive substrings; a host matches if any is contained in it.
    pub watch_domains: Vec<String>,

    /// Emit per-record headers and response previews, not just the summary.
    pub verbose: bool,

    /// Directory holding `roo-sniffer-ca.pem` / `roo-sniffer-ca-key.pem`.
    pub cert_dir: PathBuf,

    /// `tracing` filter directive for human-facing logs (not the sink).
    pub log_level: String,

    /// Timeout for the initial upstream connect in the plain forwarder (C2),
    /// the opaque tunneler (C4), and the MITM bridge's outbound connection
    /// (C6). Does not apply to bytes already flowing through an established
    /// tunnel.
    pub request_timeout_secs: u64,

    /// Preview truncation length used by the sniffer and the plain forwarder.
    pub max_body_preview_bytes: usize,

    /// When true, the MITM bridge verifies the upstream TLS certificate
    /// instead of accepting anything. Defaults to false: an interception
    /// proxy whose operator has already installed the private CA has
    /// already opted out of the usual trust model.
    pub verify_upstream_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            log_path: PathBuf::from("roo-sniffer.log"),
            watch_domains: Vec::new(),
            verbose: false,
            cert_dir: PathBuf::from("./certs"),
            log_level: "info".to_string(),
            request_timeout_secs: 10,
            max_body_preview_bytes: 500,
            verify_upstream_tls: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits, then layer `ROO_SNIFFER_*` environment variable
    /// overrides on top. A missing file is not an error — the proxy can run
    /// entirely off defaults, the environment, and CLI overrides.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(Error::ConfigError(format!("{}: {}", path.display(), e))),
        };
        Ok(config.apply_env_overrides())
    }

    /// Override individual fields from `ROO_SNIFFER_*` environment variables
    /// when present; an unset or unparseable variable leaves the field as
    /// loaded from the file/default, matching the teacher's `from_env`
    /// `std::env::var(..).ok().and_then(|v| v.parse().ok())` style in
    /// `proxy/http_client.rs`.
    fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_parsed("ROO_SNIFFER_LISTEN_PORT") {
            self.listen_port = v;
        }
        if let Ok(v) = std::env::var("ROO_SNIFFER_LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROO_SNIFFER_WATCH_DOMAINS") {
            self.watch_domains = v.split(',').map(|d| d.trim().to_string()).filter(|d| !d.is_empty()).collect();
        }
        if let Some(v) = env_parsed("ROO_SNIFFER_VERBOSE") {
            self.verbose = v;
        }
        if let Ok(v) = std::env::var("ROO_SNIFFER_CERT_DIR") {
            self.cert_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROO_SNIFFER_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = env_parsed("ROO_SNIFFER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_parsed("ROO_SNIFFER_MAX_BODY_PREVIEW_BYTES") {
            self.max_body_preview_bytes = v;
        }
        if let Some(v) = env_parsed("ROO_SNIFFER_VERIFY_UPSTREAM_TLS") {
            self.verify_upstream_tls = v;
        }
        self
    }

    /// Validate invariants that would otherwise surface as confusing errors
    /// deep inside the listener or CA.
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(Error::ConfigError("listen_port must be nonzero".into()));
        }
        if self.max_body_preview_bytes == 0 {
            return Err(Error::ConfigError(
                "max_body_preview_bytes must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Read an environment variable and parse it, discarding both an unset
/// variable and one that fails to parse — callers treat both the same as
/// "no override".
fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `std::env::set_var` mutates process-global state; serialize the tests
    // that touch it so they don't race each other's env vars.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.listen_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let config = Config::load(std::path::Path::new("/nonexistent/roo-sniffer.toml")).unwrap();
        assert_eq!(config.listen_port, Config::default().listen_port);
    }

    #[test]
    fn env_override_wins_over_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("ROO_SNIFFER_LISTEN_PORT", "9999");
        std::env::set_var("ROO_SNIFFER_WATCH_DOMAINS", "anthropic, example.test");

        let config = Config::load(std::path::Path::new("/nonexistent/roo-sniffer.toml")).unwrap();

        std::env::remove_var("ROO_SNIFFER_LISTEN_PORT");
        std::env::remove_var("ROO_SNIFFER_WATCH_DOMAINS");

        assert_eq!(config.listen_port, 9999);
        assert_eq!(config.watch_domains, vec!["anthropic".to_string(), "example.test".to_string()]);
    }

    #[test]
    fn unset_env_vars_leave_defaults_untouched() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("ROO_SNIFFER_LISTEN_PORT");
        let config = Config::load(std::path::Path::new("/nonexistent/roo-sniffer.toml")).unwrap();
        assert_eq!(config.listen_port, Config::default().listen_port);
    }
}

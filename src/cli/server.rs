//! `serve` subcommand: load configuration, apply CLI overrides, and run the
//! listener until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::info;

use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::proxy::{self, ProxyContext};
use crate::sink::{FanoutSink, JsonlFileSink, Sink, TerminalSink};
use crate::watch::WatchList;
use crate::Result;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Path to a TOML configuration file. Missing is not an error — the
    /// proxy runs entirely off defaults and the flags below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port the listener binds on all interfaces.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Watch-domain substring. Repeat the flag to watch several domains.
    #[arg(long = "watch", value_name = "DOMAIN")]
    pub watch: Vec<String>,

    /// Emit per-record headers and response previews, not just the summary.
    #[arg(long)]
    pub verbose: bool,

    /// Directory holding the root CA cert/key.
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Path for the append-only JSON-lines observation log.
    #[arg(long)]
    pub log_path: Option<PathBuf>,
}

impl ServeArgs {
    fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if !self.watch.is_empty() {
            config.watch_domains = self.watch.clone();
        }
        if self.verbose {
            config.verbose = true;
        }
        if let Some(dir) = &self.cert_dir {
            config.cert_dir = dir.clone();
        }
        if let Some(path) = &self.log_path {
            config.log_path = path.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub async fn run(&self) -> Result<()> {
        let config = self.to_config()?;
        crate::logging::init_logger_with_config(&config.log_level, true);

        let ca = CertificateAuthority::load_or_init(&config.cert_dir)?;
        info!("CA root certificate: {}", ca.ca_cert_path().display());
        info!("install this certificate in clients you want to intercept");

        let watch_list = WatchList::new(config.watch_domains.clone());

        let jsonl_sink = JsonlFileSink::open(&config.log_path)?;
        let sink: Arc<dyn Sink> = Arc::new(
            FanoutSink::new()
                .add(Box::new(jsonl_sink))
                .add(Box::new(TerminalSink)),
        );

        let ctx = ProxyContext::new(Arc::new(config), Arc::new(watch_list), Arc::new(ca), sink);

        tokio::select! {
            result = proxy::run(ctx) => result,
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping listener");
                Ok(())
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

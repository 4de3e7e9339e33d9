//! Human-facing log lines for the interception pipeline. These are
//! operator-facing `tracing` events, separate from the structured
//! `RequestRecord`s the observation sink (`crate::sink`) writes.

use std::net::SocketAddr;

use crate::logging::process_info;
use crate::{log_debug, log_info};

pub fn log_incoming_request(method: &str, target: &str, remote_addr: &SocketAddr) {
    if method == "CONNECT" {
        log_debug!("🔐 CONNECT {} from {}", target, remote_addr.ip());
    } else {
        log_info!("{} 📥 {} {} from {}", process_info(), method, target, remote_addr.ip());
    }
}

pub fn log_connect_established(host: &str, port: u16, watched: bool) {
    if watched {
        log_debug!("🔍 intercepting {}:{} (watched)", host, port);
    } else {
        log_debug!("🔗 tunneling {}:{} (opaque)", host, port);
    }
}

pub fn log_connect_failure(host: &str, port: u16, error: &str) {
    log_debug!("❌ upstream connect failed for {}:{}: {}", host, port, error);
}

pub fn log_forwarded_response(method: &str, host: &str, path: &str, status: u16) {
    log_info!("✅ {} {}{} → {}", method, host, path, status);
}

pub fn log_upstream_error(method: &str, host: &str, path: &str, error: &str) {
    log_info!("❌ {} {}{} → upstream error: {}", method, host, path, error);
}

//! Roo Sniffer — an intercepting HTTP/HTTPS forward proxy for observing API
//! traffic made by client applications.
//!
//! The core interception pipeline (listener/dispatcher, plain-HTTP
//! forwarder, watch matcher, opaque tunneler, certificate authority, MITM
//! bridge, framing sniffer) lives under [`proxy`], [`watch`], [`ca`], and
//! [`sniffer`]. Everything else — config loading, CLI, logging, the
//! observation sink's file/terminal backends — is ambient plumbing around
//! that core.

pub mod ca;
pub mod cli;
pub mod config;
pub mod error;
pub mod httphead;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod sink;
pub mod sniffer;
pub mod tls;
pub mod utils;
pub mod watch;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{body_preview, HeaderMultiMap, RequestRecord};

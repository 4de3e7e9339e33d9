//! The interception pipeline: listener/dispatcher (C1), plain-HTTP
//! forwarder (C2), opaque TCP tunneler (C4), and the MITM TLS bridge (C6).
//!
//! The watch matcher (C3) lives in [`crate::watch`], the certificate
//! authority (C5) in [`crate::ca`], the framing sniffer (C7) in
//! [`crate::sniffer`], and the observation sink (C8) in [`crate::sink`] —
//! this module wires all of them together around one accepted connection
//! at a time.

pub mod forward;
pub mod listener;
pub mod mitm;
pub mod tunnel;

pub use listener::{run, ProxyContext};

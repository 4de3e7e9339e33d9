//! Small helpers shared by the interception pipeline.

pub mod http;
pub mod logging;

pub use http::*;

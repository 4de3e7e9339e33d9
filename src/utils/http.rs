//! Small HTTP plumbing shared by the plain forwarder (C2) and the listener
//! (C1): hop-by-hop header stripping, `CONNECT`-target parsing, and
//! boilerplate error responses.

use hyper::{Body, Response, StatusCode};

/// `proxy-connection` is the only header the plain forwarder strips by
/// name; everything else is forwarded unchanged. The broader hop-by-hop set
/// (`connection`, `keep-alive`, `te`, ...) is listed here too since
/// rebuilding a response from a fully buffered body needs to drop those
/// independent of what the plain forwarder does with requests.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Parse a `CONNECT host:port` target, defaulting the port to 443 when the
/// target omits one. The host is lowercased here so every `RequestRecord`
/// derived from a `CONNECT` (the tunnel-open record, and everything the MITM
/// bridge later sniffs using this host) satisfies spec.md §3's "lowercased
/// hostname" invariant without every caller having to remember to do it.
pub fn parse_connect_target(target: &str) -> Result<(String, u16), String> {
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in CONNECT target: {}", target))?;
            Ok((host.to_ascii_lowercase(), port))
        }
        None => Ok((target.to_ascii_lowercase(), 443)),
    }
}

pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from(message.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_target_defaults_port_443() {
        assert_eq!(
            parse_connect_target("example.test").unwrap(),
            ("example.test".to_string(), 443)
        );
    }

    #[test]
    fn connect_target_parses_explicit_port() {
        assert_eq!(
            parse_connect_target("example.test:8443").unwrap(),
            ("example.test".to_string(), 8443)
        );
    }

    #[test]
    fn connect_target_lowercases_host() {
        assert_eq!(
            parse_connect_target("API.Example.TEST:8443").unwrap(),
            ("api.example.test".to_string(), 8443)
        );
        assert_eq!(
            parse_connect_target("API.Example.TEST").unwrap(),
            ("api.example.test".to_string(), 443)
        );
    }

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop_header("Proxy-Connection"));
        assert!(!is_hop_by_hop_header("Host"));
    }
}

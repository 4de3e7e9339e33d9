//! Shared request-line/header-block parsing used by the listener (C1), the
//! plain forwarder (C2), and the framing sniffer (C7) — the same small
//! piece of text parsing shows up at three layers of this proxy, so it
//! lives once here rather than three times.

use crate::models::HeaderMultiMap;

/// Index just past the first `\r\n\r\n` in `buf`, if the buffer contains one.
pub fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse a request line and header block (the bytes strictly before a
/// `\r\n\r\n` terminator). A malformed request line (fewer than 3
/// space-separated tokens) yields `("UNKNOWN", "/", "HTTP/1.1", ...)`
/// rather than an error — both C1/C2 and C7 want to keep going, not abort.
pub fn parse_request_head(head: &[u8]) -> (String, String, String, HeaderMultiMap) {
    let head = String::from_utf8_lossy(head);
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut tokens = request_line.splitn(3, ' ');
    let (method, target, version) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
        _ => ("UNKNOWN".to_string(), "/".to_string(), "HTTP/1.1".to_string()),
    };

    let headers: HeaderMultiMap = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    (method, target, version, headers)
}

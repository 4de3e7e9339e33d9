//! HTTP framing sniffer (C7): parses request lines, headers, and
//! `Content-Length`-delimited bodies out of a decrypted byte stream for
//! observation, without ever gating forwarding — callers feed it a copy of
//! the bytes already written to the real destination.
//!
//! Request-side state machine, per request within the buffer:
//!
//! ```text
//! ReadingHeaders ──(found \r\n\r\n)──► ReadingBody(remaining = CL)
//! ReadingBody(0) ──► EmitRecord ──► ReadingHeaders
//! ReadingBody(n>0) ──(more bytes)──► ReadingBody(n - new_bytes)
//! ```
//!
//! Both directions are free-running over an ever-growing `Vec<u8>` that is
//! drained as complete messages are recognized; partial messages stay
//! buffered until more bytes arrive.

use crate::httphead::{find_header_terminator, parse_request_head};
use crate::models::HeaderMultiMap;

/// One fully-parsed request observed in the client-to-server direction.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMultiMap,
    pub body: Vec<u8>,
}

/// One fully-parsed response status line observed in the server-to-client
/// direction, with a best-effort body preview.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status_code: u16,
    pub reason: String,
    pub body_preview: Option<Vec<u8>>,
}

/// Sniffs the client→server direction of an intercepted tunnel.
pub struct RequestSniffer {
    buf: Vec<u8>,
}

impl RequestSniffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed newly observed bytes and return every request that becomes
    /// fully parseable as a result. May return zero, one, or several
    /// records (pipelined requests arriving in one read).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParsedRequest> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(header_end) = find_header_terminator(&self.buf) {
            let (method, path, _version, headers) = parse_request_head(&self.buf[..header_end]);
            let content_length = headers
                .get_first("content-length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);

            let body_start = header_end + 4;
            let total_len = body_start + content_length;
            if self.buf.len() < total_len {
                break; // wait for more bytes before emitting
            }

            let body = self.buf[body_start..total_len].to_vec();
            out.push(ParsedRequest {
                method,
                path,
                headers,
                body,
            });
            self.buf.drain(..total_len);
        }

        out
    }
}

impl Default for RequestSniffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sniffs the server→client direction purely to surface status lines for
/// verbose logging. Re-arms after every header block rather than stopping
/// after the first response, so keep-alive tunnels keep reporting status for
/// every request/response pair, not just the first.
pub struct ResponseSniffer {
    buf: Vec<u8>,
}

impl ResponseSniffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8], preview_limit: usize) -> Vec<ParsedResponse> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(header_end) = find_header_terminator(&self.buf) {
            let head = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
            let mut lines = head.split("\r\n");
            let status_line = lines.next().unwrap_or_default();
            let (status_code, reason) = parse_status_line(status_line);

            let headers: HeaderMultiMap = lines
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            let content_length = headers
                .get_first("content-length")
                .and_then(|v| v.parse::<usize>().ok());

            let body_start = header_end + 4;
            let (body_preview, consumed) = match content_length {
                Some(cl) => {
                    let total_len = body_start + cl;
                    if self.buf.len() < total_len {
                        break; // best-effort: wait for the body before emitting
                    }
                    let preview_end = (body_start + cl.min(preview_limit)).min(self.buf.len());
                    (Some(self.buf[body_start..preview_end].to_vec()), total_len)
                }
                None => (None, body_start),
            };

            out.push(ParsedResponse {
                status_code,
                reason,
                body_preview,
            });
            self.buf.drain(..consumed);
        }

        out
    }
}

impl Default for ResponseSniffer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_status_line(line: &str) -> (u16, String) {
    let mut tokens = line.splitn(3, ' ');
    let _version = tokens.next();
    let code = tokens
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .unwrap_or(0);
    let reason = tokens.next().unwrap_or("").to_string();
    (code, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_request() {
        let mut sniffer = RequestSniffer::new();
        let out = sniffer.feed(b"POST /v1/m HTTP/1.1\r\nHost: api.test\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method, "POST");
        assert_eq!(out[0].path, "/v1/m");
        assert_eq!(out[0].body, b"hello");
    }

    #[test]
    fn parses_pipelined_requests_in_wire_order() {
        let mut sniffer = RequestSniffer::new();
        let out = sniffer.feed(
            b"GET /a HTTP/1.1\r\nContent-Length: 0\r\n\r\nGET /b HTTP/1.1\r\nContent-Length: 0\r\n\r\n",
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "/a");
        assert_eq!(out[1].path, "/b");
    }

    #[test]
    fn waits_for_full_body_before_emitting() {
        let mut sniffer = RequestSniffer::new();
        let out = sniffer.feed(b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\npartial");
        assert!(out.is_empty());
        let out = sniffer.feed(b"data");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, b"partialdat");
    }

    #[test]
    fn missing_content_length_is_zero_body() {
        let mut sniffer = RequestSniffer::new();
        let out = sniffer.feed(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(out.len(), 1);
        assert!(out[0].body.is_empty());
    }

    #[test]
    fn malformed_request_line_becomes_unknown_slash() {
        let mut sniffer = RequestSniffer::new();
        let out = sniffer.feed(b"not a request\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].method, "UNKNOWN");
        assert_eq!(out[0].path, "/");
    }

    #[test]
    fn response_sniffer_reports_status_and_rearms_for_keepalive() {
        let mut sniffer = ResponseSniffer::new();
        let out = sniffer.feed(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhiHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
            500,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].status_code, 200);
        assert_eq!(out[1].status_code, 404);
    }
}

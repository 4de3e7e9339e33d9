//! The observation data model: `RequestRecord` and its header container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered multi-map of lowercased header names to their values.
///
/// Backed by an ordered `Vec` rather than a `HashMap<String, String>` so
/// repeated headers (such as `Set-Cookie`) don't collapse into a single
/// last-write-wins value. Single-value callers use
/// [`HeaderMultiMap::get_first`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMultiMap {
    entries: Vec<(String, String)>,
}

impl HeaderMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, lowercasing the name. Does not overwrite — repeated
    /// headers (and repeated calls with the same name) all accumulate.
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for HeaderMultiMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.push(&k, v);
        }
        map
    }
}

/// The structured summary of one request (and later its response), emitted
/// to the observation sink.
///
/// `watched` is stable for the life of the record; `method`/`host`/`path`
/// are set at creation and never mutated; `status_code` and
/// `response_preview` may only be set once, after the record has already
/// been emitted once as a request event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub host: String,
    pub path: String,
    pub watched: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMultiMap>,

    #[serde(rename = "bodyPreview", skip_serializing_if = "Option::is_none")]
    pub body_preview: Option<String>,

    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(rename = "responsePreview", skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

impl RequestRecord {
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>, watched: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.into(),
            host: host.into(),
            path: path.into(),
            watched,
            headers: None,
            body_preview: None,
            status_code: None,
            response_preview: None,
        }
    }

    /// Attach the response half of the record (Property: the request event
    /// is always emitted before the response event, so this is applied to
    /// an already-emitted record's clone, not mutated in place on the sink).
    pub fn with_response(mut self, status_code: u16, response_preview: Option<String>) -> Self {
        self.status_code = Some(status_code);
        self.response_preview = response_preview;
        self
    }
}

/// Truncate a body to a UTF-8 preview per the 500-byte rule: valid UTF-8
/// under the limit is returned verbatim; valid UTF-8 over the limit is cut
/// at the limit with a trailing `"..."`; anything that doesn't decode as
/// UTF-8 becomes the literal string `<binary>`.
pub fn body_preview(body: &[u8], limit: usize) -> String {
    match std::str::from_utf8(body) {
        Ok(text) if text.len() <= limit => text.to_string(),
        Ok(text) => {
            // `limit` is a byte offset chosen independent of UTF-8 character
            // boundaries; slicing there directly panics whenever a
            // multi-byte character straddles it, so back off to the nearest
            // boundary at or before the limit.
            let mut end = limit.min(text.len());
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &text[..end])
        }
        Err(_) => "<binary>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_under_limit_is_verbatim() {
        assert_eq!(body_preview(b"hello", 500), "hello");
    }

    #[test]
    fn preview_over_limit_truncates_with_ellipsis() {
        let body = "a".repeat(600);
        let preview = body_preview(body.as_bytes(), 500);
        assert_eq!(preview.len(), 503);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn preview_non_utf8_is_binary_marker() {
        assert_eq!(body_preview(&[0xff, 0xfe, 0x00], 500), "<binary>");
    }

    #[test]
    fn preview_does_not_panic_when_limit_splits_a_multibyte_char() {
        // 499 ascii bytes, then a 2-byte UTF-8 character straddling byte 500.
        let mut body = "a".repeat(499);
        body.push('é');
        body.push_str(&"b".repeat(50));

        let preview = body_preview(body.as_bytes(), 500);
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 503);
        assert_eq!(&preview[..499], "a".repeat(499));
    }

    #[test]
    fn header_multi_map_preserves_repeats() {
        let mut headers = HeaderMultiMap::new();
        headers.push("Set-Cookie", "a=1");
        headers.push("set-cookie", "b=2");
        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get_first("SET-COOKIE"), Some("a=1"));
    }
}

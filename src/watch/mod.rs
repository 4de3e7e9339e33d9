//! Watch matcher (C3): decides per host whether to MITM or tunnel.
//!
//! The list itself can change at runtime (e.g. via a future config-reload
//! collaborator), so it is held behind an [`arc_swap::ArcSwap`] rather than
//! a plain `Vec` — the same pattern `jizhuozhi-hermes` uses for its
//! hot-swappable upstream node list. Every connection reads the list once at
//! match time; there is no lock contention between the swap writer and the
//! many concurrent readers.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Holds the current set of watch-domain substrings and answers matches.
pub struct WatchList {
    domains: ArcSwap<Vec<String>>,
}

impl WatchList {
    pub fn new(domains: Vec<String>) -> Self {
        let lowered = domains.into_iter().map(|d| d.to_ascii_lowercase()).collect();
        Self {
            domains: ArcSwap::from_pointee(lowered),
        }
    }

    /// Replace the whole list atomically. Readers racing this call see
    /// either the old or the new list in full, never a partial one.
    pub fn replace(&self, domains: Vec<String>) {
        let lowered = domains.into_iter().map(|d| d.to_ascii_lowercase()).collect();
        self.domains.store(Arc::new(lowered));
    }

    /// `watched = true` iff at least one configured substring occurs in
    /// `hostname.to_lowercase()`.
    pub fn is_watched(&self, hostname: &str) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        self.domains.load().iter().any(|needle| hostname.contains(needle.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_substring_case_insensitively() {
        let list = WatchList::new(vec!["Anthropic".to_string()]);
        assert!(list.is_watched("api.anthropic.com"));
        assert!(list.is_watched("API.ANTHROPIC.COM"));
        assert!(!list.is_watched("example.com"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let list = WatchList::new(vec![]);
        assert!(!list.is_watched("anything.test"));
    }

    #[test]
    fn replace_is_visible_to_subsequent_reads() {
        let list = WatchList::new(vec!["foo".to_string()]);
        assert!(list.is_watched("foo.test"));
        list.replace(vec!["bar".to_string()]);
        assert!(!list.is_watched("foo.test"));
        assert!(list.is_watched("bar.test"));
    }
}

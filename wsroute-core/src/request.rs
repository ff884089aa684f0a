//! Splitting the upgrade request target into path and query.
//!
//! Only the path takes part in routing. The query string is decoded into a map
//! and handed to the handler as context.
//!
//! ```
//! use wsroute_core::RequestTarget;
//!
//! let target = RequestTarget::parse("/chat/lobby?nick=fred%20s&lang=en");
//! assert_eq!(target.path, "/chat/lobby");
//! assert_eq!(target.query["nick"], "fred s");
//! assert_eq!(target.query["lang"], "en");
//! ```

use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Decoded query parameters. For repeated keys the last value wins.
pub type Query = HashMap<String, String>;

/// A request target split for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestTarget {
    /// The path, exactly as sent. Never empty.
    pub path: String,
    /// Decoded query parameters.
    pub query: Query,
}

impl RequestTarget {
    /// Splits `target` (`path[?query][#fragment]`).
    ///
    /// Absolute-form targets (`ws://host/path`) are reduced to their path. An
    /// empty path becomes `/`. The path itself is not percent-decoded.
    pub fn parse(target: &str) -> Self {
        let target = target.split('#').next().unwrap_or_default();
        let target = strip_authority(target);

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, Query::new()),
        };

        Self {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
        }
    }
}

fn strip_authority(target: &str) -> &str {
    match target.split_once("://") {
        Some((_, rest)) => rest.find(['/', '?']).map_or("", |i| &rest[i..]),
        None => target,
    }
}

/// Decodes an `application/x-www-form-urlencoded` style query string.
pub fn parse_query(query: &str) -> Query {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path() {
        let target = RequestTarget::parse("/echo");
        assert_eq!(target.path, "/echo");
        assert!(target.query.is_empty());
    }

    #[test]
    fn test_empty_target_is_root() {
        assert_eq!(RequestTarget::parse("").path, "/");
        assert_eq!(RequestTarget::parse("?a=1").path, "/");
    }

    #[test]
    fn test_query_is_decoded() {
        let target = RequestTarget::parse("/chat/lobby/?nick=a+b&tag=%E2%9C%93&flag&=x");
        assert_eq!(target.path, "/chat/lobby/");
        assert_eq!(target.query["nick"], "a b");
        assert_eq!(target.query["tag"], "✓");
        assert_eq!(target.query["flag"], "");
        assert_eq!(target.query[""], "x");
    }

    #[test]
    fn test_fragment_is_dropped() {
        let target = RequestTarget::parse("/echo?x=1#top");
        assert_eq!(target.query["x"], "1");
        assert_eq!(target.query.len(), 1);
    }

    #[test]
    fn test_repeated_key_keeps_last() {
        let query = parse_query("a=1&a=2");
        assert_eq!(query["a"], "2");
    }

    #[test]
    fn test_absolute_form_is_reduced_to_path() {
        let target = RequestTarget::parse("ws://localhost:8765/chat/x?y=1");
        assert_eq!(target.path, "/chat/x");
        assert_eq!(target.query["y"], "1");
        assert_eq!(RequestTarget::parse("ws://localhost:8765").path, "/");
    }

    #[test]
    fn test_path_is_not_decoded() {
        assert_eq!(RequestTarget::parse("/a%20b").path, "/a%20b");
    }
}

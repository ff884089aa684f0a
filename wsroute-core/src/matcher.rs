//! Route pattern compilation.
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a
//! literal token or a named capture written `{name}` or `{name:regex}`:
//!
//! ```text
//! /chat/{room}
//! /api/{obj}/{pk:[0-9]+}/detail/
//! ```
//!
//! Patterns are validated and compiled once, at registration time. A compiled
//! [`PathMatcher`] matches a request path anchored at both ends and always
//! tolerates a single trailing slash, however the pattern was written.
//!
//! Rules enforced at compile time:
//!
//! - the empty pattern is rejected (only `/` may have no segments);
//! - the first segment may not be a named capture;
//! - the first segment may not be purely numeric;
//! - every segment must be a literal token (`[\w.~-]+`) or a named capture
//!   whose name is an identifier (`[A-Za-z][A-Za-z0-9_]*`).
//!
//! Custom capture expressions are split on `/` like everything else, so they
//! cannot themselves contain a slash.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Values captured from named segments, keyed by segment name.
pub type Params = HashMap<String, String>;

/// Character class used by captures that do not supply their own expression.
pub const DEFAULT_CAPTURE: &str = r"[\w-]+";

static LITERAL_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.~-]+$").expect("literal segment grammar"));

static NAMED_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{([A-Za-z][A-Za-z0-9_]*)(?::(.+))?\}$").expect("named segment grammar")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture { name: String, expr: String },
}

/// A compiled route pattern.
///
/// # Examples
///
/// ```
/// use wsroute_core::PathMatcher;
///
/// let matcher = PathMatcher::compile("/api/{obj}/{pk}/").unwrap();
/// let params = matcher.matches("/api/items/42").unwrap();
///
/// assert_eq!(params["obj"], "items");
/// assert_eq!(params["pk"], "42");
/// assert!(matcher.matches("/api/items").is_none());
/// ```
#[derive(Debug, Clone)]
pub enum PathMatcher {
    /// Matches exactly `/`.
    Root,
    /// A pattern with no captures, matched by string comparison.
    Literal {
        /// Normalized path, without a trailing slash.
        path: String,
    },
    /// A pattern with captures, matched by an anchored expression.
    Pattern {
        /// `^/seg1/seg2/.../?$`
        regex: Regex,
        /// Capture names in segment order.
        names: Vec<String>,
    },
}

impl PathMatcher {
    /// Validates and compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] naming the pattern and the rule it breaks.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern == "/" {
            return Ok(PathMatcher::Root);
        }

        let trimmed = pattern.strip_prefix('/').unwrap_or(pattern);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(Error::syntax(pattern, "empty pattern (use `/` for the root)"));
        }

        let segments = trimmed
            .split('/')
            .map(|raw| parse_segment(pattern, raw))
            .collect::<Result<Vec<_>>>()?;

        match &segments[0] {
            Segment::Capture { .. } => {
                return Err(Error::syntax(
                    pattern,
                    "the first segment may not be a named capture",
                ));
            }
            Segment::Literal(lit) if lit.bytes().all(|b| b.is_ascii_digit()) => {
                return Err(Error::syntax(
                    pattern,
                    "the first segment may not be purely numeric",
                ));
            }
            Segment::Literal(_) => {}
        }

        let names: Vec<String> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Capture { name, .. } => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect();

        if names.is_empty() {
            let path = segments
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Literal(lit) => Some(format!("/{lit}")),
                    Segment::Capture { .. } => None,
                })
                .collect();
            return Ok(PathMatcher::Literal { path });
        }

        let mut source = String::from("^");
        for segment in &segments {
            source.push('/');
            match segment {
                Segment::Literal(lit) => source.push_str(&regex::escape(lit)),
                Segment::Capture { name, expr } => {
                    source.push_str(&format!("(?P<{name}>(?:{expr}))"));
                }
            }
        }
        source.push_str("/?$");

        let regex = Regex::new(&source).map_err(|e| Error::syntax(pattern, e.to_string()))?;
        Ok(PathMatcher::Pattern { regex, names })
    }

    /// Matches `path` and returns the captured values, or `None`.
    ///
    /// `path` must not carry a query string.
    pub fn matches(&self, path: &str) -> Option<Params> {
        match self {
            PathMatcher::Root => (path == "/").then(Params::new),
            PathMatcher::Literal { path: expected } => {
                let candidate = path.strip_suffix('/').unwrap_or(path);
                (candidate == expected).then(Params::new)
            }
            PathMatcher::Pattern { regex, names } => {
                let caps = regex.captures(path)?;
                Some(
                    names
                        .iter()
                        .filter_map(|name| {
                            caps.name(name)
                                .map(|m| (name.clone(), m.as_str().to_string()))
                        })
                        .collect(),
                )
            }
        }
    }

    /// Names of the captures this matcher produces, in segment order.
    pub fn capture_names(&self) -> &[String] {
        match self {
            PathMatcher::Pattern { names, .. } => names,
            PathMatcher::Root | PathMatcher::Literal { .. } => &[],
        }
    }
}

fn parse_segment(pattern: &str, raw: &str) -> Result<Segment> {
    if let Some(caps) = NAMED_SEGMENT.captures(raw) {
        let name = caps[1].to_string();
        let expr = caps
            .get(2)
            .map_or(DEFAULT_CAPTURE, |m| m.as_str())
            .to_string();
        return Ok(Segment::Capture { name, expr });
    }
    if LITERAL_SEGMENT.is_match(raw) {
        return Ok(Segment::Literal(raw.to_string()));
    }
    Err(Error::syntax(
        pattern,
        format!("segment {raw:?} is neither a literal token nor a named capture"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_root_matches_only_root() {
        let matcher = PathMatcher::compile("/").unwrap();
        assert_eq!(matcher.matches("/"), Some(Params::new()));
        assert_eq!(matcher.matches(""), None);
        assert_eq!(matcher.matches("//"), None);
        assert_eq!(matcher.matches("/chat"), None);
    }

    #[test]
    fn test_literal_pattern_allows_one_trailing_slash() {
        let matcher = PathMatcher::compile("/echo").unwrap();
        assert!(matches!(matcher, PathMatcher::Literal { .. }));
        assert!(matcher.matches("/echo").is_some());
        assert!(matcher.matches("/echo/").is_some());
        assert!(matcher.matches("/echo//").is_none());
        assert!(matcher.matches("/echoes").is_none());
        assert!(matcher.matches("/echo/more").is_none());
    }

    #[test]
    fn test_trailing_slash_in_pattern_is_optional_in_path() {
        let matcher = PathMatcher::compile("/api/{obj}/{pk}/").unwrap();
        assert_eq!(
            matcher.matches("/api/items/42/"),
            Some(params(&[("obj", "items"), ("pk", "42")]))
        );
        assert_eq!(
            matcher.matches("/api/items/42"),
            Some(params(&[("obj", "items"), ("pk", "42")]))
        );
    }

    #[test]
    fn test_capture_keys_equal_named_segments() {
        let cases = [
            ("/this/{that}", "/this/1", params(&[("that", "1")])),
            (
                "/api/{obj}/{pk}/detail/",
                "/api/racoons/99/detail/",
                params(&[("obj", "racoons"), ("pk", "99")]),
            ),
            ("/chat/{room}", "/chat/lobby", params(&[("room", "lobby")])),
            ("/chat/{room}", "/chat/lobby/", params(&[("room", "lobby")])),
        ];

        for (pattern, path, expected) in cases {
            let matcher = PathMatcher::compile(pattern).unwrap();
            assert_eq!(matcher.matches(path), Some(expected), "{pattern} vs {path}");
        }
    }

    #[test]
    fn test_default_capture_class() {
        let matcher = PathMatcher::compile("/users/{name}").unwrap();
        assert!(matcher.matches("/users/jane_doe-2").is_some());
        assert!(matcher.matches("/users/jane.doe").is_none());
        assert!(matcher.matches("/users/").is_none());
    }

    #[test]
    fn test_custom_capture_expression() {
        let matcher = PathMatcher::compile("/items/{pk:[0-9]+}").unwrap();
        assert_eq!(matcher.matches("/items/42"), Some(params(&[("pk", "42")])));
        assert!(matcher.matches("/items/abc").is_none());

        let year = PathMatcher::compile("/archive/{year:\\d{4}}").unwrap();
        assert!(year.matches("/archive/2024").is_some());
        assert!(year.matches("/archive/24").is_none());
    }

    #[test]
    fn test_custom_alternation_stays_inside_its_segment() {
        let matcher = PathMatcher::compile("/feed/{kind:news|sports}/latest").unwrap();
        assert!(matcher.matches("/feed/news/latest").is_some());
        assert!(matcher.matches("/feed/sports/latest").is_some());
        assert!(matcher.matches("/feed/news").is_none());
    }

    #[test]
    fn test_literal_punctuation_is_escaped() {
        let matcher = PathMatcher::compile("/v1.0/{name}").unwrap();
        assert!(matcher.matches("/v1.0/x").is_some());
        assert!(matcher.matches("/v1x0/x").is_none());
    }

    #[test]
    fn test_leading_slash_is_optional_in_pattern() {
        let matcher = PathMatcher::compile("chat/{room}").unwrap();
        assert!(matcher.matches("/chat/lobby").is_some());
    }

    #[test]
    fn test_rejects_named_first_segment() {
        for pattern in ["/{this}/this/", "/{x}", "{x}/y", "/{id:[0-9]+}/z"] {
            let err = PathMatcher::compile(pattern).unwrap_err();
            assert!(matches!(err, Error::Syntax { .. }), "{pattern}");
        }
    }

    #[test]
    fn test_rejects_numeric_first_segment() {
        for pattern in ["/1", "/42/items", "/007/{id}"] {
            let err = PathMatcher::compile(pattern).unwrap_err();
            assert!(matches!(err, Error::Syntax { .. }), "{pattern}");
        }
        assert!(PathMatcher::compile("/v2/items").is_ok());
        assert!(PathMatcher::compile("/items/42").is_ok());
    }

    #[test]
    fn test_rejects_malformed_segments() {
        for pattern in [
            "",
            "//",
            "/thisis/{/",
            "/a//b",
            "/chat/{1room}",
            "/chat/{room:}",
            "/chat/room name",
            "/chat/{ro-om}",
        ] {
            let err = PathMatcher::compile(pattern).unwrap_err();
            assert!(matches!(err, Error::Syntax { .. }), "{pattern:?}");
        }
    }

    #[test]
    fn test_rejects_invalid_custom_expression() {
        let err = PathMatcher::compile("/items/{pk:[0-9}").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_rejects_duplicate_capture_names() {
        let err = PathMatcher::compile("/a/{id}/{id}").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_capture_names_in_order() {
        let matcher = PathMatcher::compile("/api/{obj}/{pk}").unwrap();
        assert_eq!(matcher.capture_names(), ["obj", "pk"]);
        assert!(PathMatcher::compile("/").unwrap().capture_names().is_empty());
    }
}

//! Route table of the file server.
//!
//! Matching is done on the decoded request path against an ordered table:
//! exact matchers win over prefix matchers, which win over the catch-all,
//! independent of the order entries are registered in.

use std::sync::LazyLock;

use axum::{Router, extract::DefaultBodyLimit, http::Method};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::error::FileServerError;
use crate::handlers;

pub const HEALTH_PATH: &str = "/lookup/health";
pub const TEXT_LOOKUP_PREFIX: &str = "/lookup/get/";
pub const JSON_LOOKUP_PREFIX: &str = "/lookup/getjson/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Exact(&'static str),
    Prefix(&'static str),
    CatchAll,
}

impl Matcher {
    fn precedence(&self) -> u8 {
        match self {
            Matcher::Exact(_) => 0,
            Matcher::Prefix(_) => 1,
            Matcher::CatchAll => 2,
        }
    }

    /// Returns the part of `path` after the matched literal.
    fn matches<'p>(&self, path: &'p str) -> Option<&'p str> {
        match self {
            Matcher::Exact(literal) => (path == *literal).then_some(""),
            Matcher::Prefix(prefix) => path.strip_prefix(prefix),
            Matcher::CatchAll => Some(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    TextLookup,
    JsonLookup,
    Files,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub matcher: Matcher,
    pub methods: Vec<Method>,
    pub endpoint: Endpoint,
}

impl RouteEntry {
    pub fn new(matcher: Matcher, methods: &[Method], endpoint: Endpoint) -> Self {
        Self {
            matcher,
            methods: methods.to_vec(),
            endpoint,
        }
    }
}

/// Result of resolving a request against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'p> {
    pub endpoint: Endpoint,
    /// Lookup ID for prefix routes, the full path for the catch-all.
    pub remainder: &'p str,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new(mut entries: Vec<RouteEntry>) -> Self {
        // Stable: entries of equal precedence keep registration order.
        entries.sort_by_key(|entry| entry.matcher.precedence());
        Self { entries }
    }

    pub fn standard() -> Self {
        let read = [Method::GET, Method::HEAD];
        Self::new(vec![
            RouteEntry::new(
                Matcher::CatchAll,
                &[Method::GET, Method::HEAD, Method::POST],
                Endpoint::Files,
            ),
            RouteEntry::new(Matcher::Prefix(TEXT_LOOKUP_PREFIX), &read, Endpoint::TextLookup),
            RouteEntry::new(Matcher::Prefix(JSON_LOOKUP_PREFIX), &read, Endpoint::JsonLookup),
            RouteEntry::new(Matcher::Exact(HEALTH_PATH), &read, Endpoint::Health),
        ])
    }

    /// First entry whose matcher accepts `path`. A method the entry does not
    /// allow is an error rather than a fall-through to later entries.
    pub fn resolve<'p>(
        &self,
        method: &Method,
        path: &'p str,
    ) -> Result<RouteMatch<'p>, FileServerError> {
        for entry in &self.entries {
            let Some(remainder) = entry.matcher.matches(path) else {
                continue;
            };
            if !entry.methods.contains(method) {
                return Err(FileServerError::MethodNotAllowed);
            }
            return Ok(RouteMatch {
                endpoint: entry.endpoint,
                remainder,
            });
        }

        Err(FileServerError::NotFound)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}

pub(crate) static ROUTES: LazyLock<RouteTable> = LazyLock::new(RouteTable::standard);

/// Build the file server router for one server instance.
pub fn file_routes(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);

    Router::new()
        .fallback(handlers::dispatch)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_ignores_registration_order() {
        let table = RouteTable::standard();
        let order: Vec<_> = table.entries().iter().map(|e| e.endpoint).collect();
        assert_eq!(
            order,
            [
                Endpoint::Health,
                Endpoint::TextLookup,
                Endpoint::JsonLookup,
                Endpoint::Files
            ]
        );
    }

    #[test]
    fn test_exact_beats_prefix() {
        let table = RouteTable::new(vec![
            RouteEntry::new(Matcher::Prefix("/lookup/"), &[Method::GET], Endpoint::TextLookup),
            RouteEntry::new(Matcher::Exact("/lookup/health"), &[Method::GET], Endpoint::Health),
        ]);
        let matched = table.resolve(&Method::GET, "/lookup/health").unwrap();
        assert_eq!(matched.endpoint, Endpoint::Health);
    }

    #[test]
    fn test_lookup_ids() {
        let table = RouteTable::standard();

        let text = table.resolve(&Method::GET, "/lookup/get/42").unwrap();
        assert_eq!(text.endpoint, Endpoint::TextLookup);
        assert_eq!(text.remainder, "42");

        let json = table.resolve(&Method::GET, "/lookup/getjson/7").unwrap();
        assert_eq!(json.endpoint, Endpoint::JsonLookup);
        assert_eq!(json.remainder, "7");

        let nested = table.resolve(&Method::GET, "/lookup/get/a/b").unwrap();
        assert_eq!(nested.remainder, "a/b");
    }

    #[test]
    fn test_catch_all() {
        let table = RouteTable::standard();
        for path in ["/", "/docs/", "/lookup/get", "/lookup/other"] {
            let matched = table.resolve(&Method::GET, path).unwrap();
            assert_eq!(matched.endpoint, Endpoint::Files, "{path}");
            assert_eq!(matched.remainder, path);
        }
        let post = table.resolve(&Method::POST, "/docs/").unwrap();
        assert_eq!(post.endpoint, Endpoint::Files);
    }

    #[test]
    fn test_method_not_allowed() {
        let table = RouteTable::standard();
        assert!(matches!(
            table.resolve(&Method::POST, "/lookup/get/1"),
            Err(FileServerError::MethodNotAllowed)
        ));
        assert!(matches!(
            table.resolve(&Method::DELETE, "/file.txt"),
            Err(FileServerError::MethodNotAllowed)
        ));
    }
}

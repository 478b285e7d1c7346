use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

/// Identity of a registered handler: `(path, method)`.
///
/// Methods are normalized to upper case so `get` and `GET` refer to the same
/// route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    /// Registered path or `:name` pattern, e.g. `/users/:id`.
    pub path: String,
    /// Upper-cased HTTP method.
    pub method: String,
}

impl RouteKey {
    /// Build a key, normalizing the method to upper case.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into().to_uppercase(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Routing metadata for a registered handler.
///
/// The JS callable itself is owned by the runtime and keyed by the same
/// [`RouteKey`]; the registry only holds what the HTTP side needs to route
/// and respond.
#[derive(Debug, Clone, Default)]
pub struct HandlerRecord {
    /// Override MIME type used when the handler returns a plain string.
    pub content_type: Option<String>,
    /// Remaining registration options, kept verbatim for future use.
    pub options: Option<Value>,
}

/// Path parameters extracted by [`match_path`], in pattern order.
pub type PathParams = Vec<(String, String)>;

#[derive(Default)]
struct RegistryInner {
    handlers: HashMap<RouteKey, Arc<HandlerRecord>>,
    // Keys of handler routes whose path contains `:name` segments, in
    // registration order. Re-registration keeps the original position.
    patterns: Vec<RouteKey>,
    files: HashSet<String>,
}

/// Thread-safe mapping of `(path, method)` to handler metadata and of `path`
/// to file registrations.
///
/// Lookups come from concurrent HTTP tasks; writes only ever come from the
/// dispatcher thread (registrations happen inside JS, and JS only runs
/// there), so a read-write lock is all the coordination needed.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for `key`.
    pub fn register_handler(&self, key: RouteKey, record: HandlerRecord) {
        let mut inner = self.inner.write();
        if key.path.contains(':') && !inner.patterns.contains(&key) {
            inner.patterns.push(key.clone());
        }
        let replaced = inner.handlers.insert(key.clone(), Arc::new(record));
        info!(
            method = %key.method,
            path = %key.path,
            replaced = replaced.is_some(),
            "registered handler"
        );
    }

    /// Insert or replace the file registration for `path`.
    pub fn register_file(&self, path: impl Into<String>) {
        let path = path.into();
        info!(path = %path, "registered file handler");
        self.inner.write().files.insert(path);
    }

    /// Exact lookup of `(path, method)`.
    pub fn lookup_handler(&self, method: &str, path: &str) -> Option<Arc<HandlerRecord>> {
        self.inner
            .read()
            .handlers
            .get(&RouteKey::new(method, path))
            .cloned()
    }

    /// Walk `:name` patterns in registration order and return the first one
    /// whose method matches and whose pattern matches `path`.
    pub fn match_pattern(&self, method: &str, path: &str) -> Option<(RouteKey, PathParams)> {
        let method = method.to_uppercase();
        let inner = self.inner.read();
        for key in &inner.patterns {
            if key.method != method {
                continue;
            }
            if let Some(params) = match_path(&key.path, path) {
                return Some((key.clone(), params));
            }
        }
        None
    }

    /// Fetch the record for a pattern key found by [`Self::match_pattern`].
    pub fn record(&self, key: &RouteKey) -> Option<Arc<HandlerRecord>> {
        self.inner.read().handlers.get(key).cloned()
    }

    /// Whether a file handler is registered for `path`.
    pub fn has_file(&self, path: &str) -> bool {
        self.inner.read().files.contains(path)
    }
}

/// Match `path` against a `:name` pattern.
///
/// Both sides are split on `/`; the match succeeds when the segment counts
/// are equal, every literal pattern segment equals the corresponding path
/// segment, and every `:name` segment captures a non-empty value. Captured
/// parameters are returned in pattern order.
pub fn match_path(pattern: &str, path: &str) -> Option<PathParams> {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = PathParams::new();
    for (pat, seg) in pattern_segments.iter().zip(&path_segments) {
        if let Some(name) = pat.strip_prefix(':') {
            if seg.is_empty() {
                return None;
            }
            params.push((name.to_string(), (*seg).to_string()));
        } else if pat != seg {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_path_literal() {
        assert_eq!(match_path("/a/b", "/a/b"), Some(vec![]));
        assert_eq!(match_path("/a/b", "/a/c"), None);
        assert_eq!(match_path("/a/b", "/a/b/c"), None);
    }

    #[test]
    fn match_path_extracts_params_in_order() {
        let params = match_path("/u/:id/posts/:post", "/u/42/posts/7").unwrap();
        assert_eq!(
            params,
            vec![
                ("id".to_string(), "42".to_string()),
                ("post".to_string(), "7".to_string())
            ]
        );
    }

    #[test]
    fn match_path_rejects_empty_param_segment() {
        assert_eq!(match_path("/u/:id", "/u/"), None);
    }

    #[test]
    fn match_path_requires_equal_segment_counts() {
        assert_eq!(match_path("/u/:id", "/u"), None);
        assert_eq!(match_path("/u/:id", "/u/42/extra"), None);
    }

    #[test]
    fn register_replaces_by_identity() {
        let registry = HandlerRegistry::new();
        let key = RouteKey::new("get", "/h");
        registry.register_handler(
            key.clone(),
            HandlerRecord {
                content_type: Some("text/plain".into()),
                options: None,
            },
        );
        registry.register_handler(key, HandlerRecord::default());

        let record = registry.lookup_handler("GET", "/h").unwrap();
        assert_eq!(record.content_type, None);
    }

    #[test]
    fn pattern_order_is_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register_handler(RouteKey::new("GET", "/x/:a"), HandlerRecord::default());
        registry.register_handler(RouteKey::new("GET", "/:b/y"), HandlerRecord::default());

        // `/x/y` matches both patterns; the first registered wins.
        let (key, params) = registry.match_pattern("GET", "/x/y").unwrap();
        assert_eq!(key.path, "/x/:a");
        assert_eq!(params, vec![("a".to_string(), "y".to_string())]);
    }

    #[test]
    fn pattern_requires_matching_method() {
        let registry = HandlerRegistry::new();
        registry.register_handler(RouteKey::new("POST", "/u/:id"), HandlerRecord::default());
        assert!(registry.match_pattern("GET", "/u/42").is_none());
    }

    #[test]
    fn files_are_tracked_by_path() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has_file("/logo.png"));
        registry.register_file("/logo.png");
        assert!(registry.has_file("/logo.png"));
    }
}

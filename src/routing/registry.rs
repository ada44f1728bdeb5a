//! Route registry and handler resolution.
//!
//! # Responsibilities
//! - Store registered routes in registration order
//! - Resolve the single handler eligible for a method + path
//! - Report missing and ambiguous routes explicitly
//!
//! # Design Decisions
//! - Immutable once handed to a service (shared via Arc, no locks)
//! - O(n) scan over routes; typical services register a handful
//! - First registered candidate wins; a second *equivalent* route for the
//!   same method is misconfiguration and fails at resolution time

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::{BoxError, FetchError};
use crate::http::{CallRequest, Reply};
use crate::routing::pattern::{Params, PatternError, RoutePattern};

/// Future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, Result<(), BoxError>>;

/// A route handler.
///
/// Implemented for any `Fn(CallRequest, Reply) -> impl Future<Output = Result<(), E>>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: CallRequest, reply: Reply) -> HandlerFuture;
}

impl<F, Fut, E> Handler for F
where
    F: Fn(CallRequest, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn call(&self, request: CallRequest, reply: Reply) -> HandlerFuture {
        (self)(request, reply).map(|r| r.map_err(Into::into)).boxed()
    }
}

/// A registered route.
struct RouteEntry {
    method: Method,
    pattern: RoutePattern,
    handler: Arc<dyn Handler>,
}

/// The outcome of a successful resolution.
#[derive(Clone)]
pub struct RouteMatch {
    pub handler: Arc<dyn Handler>,
    pub params: Params,
    pub template: String,
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("template", &self.template)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Ordered table of routes a service can serve and dispatch to.
#[derive(Default)]
pub struct Registry {
    routes: Vec<RouteEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` requests matching `template`.
    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        template: &str,
        handler: H,
    ) -> Result<&mut Self, PatternError> {
        let pattern = RoutePattern::compile(template)?;
        tracing::debug!(method = %method, template = %template, "Route registered");
        self.routes.push(RouteEntry {
            method,
            pattern,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn get<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, PatternError> {
        self.route(Method::GET, template, handler)
    }

    pub fn post<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, PatternError> {
        self.route(Method::POST, template, handler)
    }

    pub fn put<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, PatternError> {
        self.route(Method::PUT, template, handler)
    }

    pub fn patch<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, PatternError> {
        self.route(Method::PATCH, template, handler)
    }

    pub fn delete<H: Handler>(&mut self, template: &str, handler: H) -> Result<&mut Self, PatternError> {
        self.route(Method::DELETE, template, handler)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the handler for `method` + `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch, FetchError> {
        let mut candidates = self
            .routes
            .iter()
            .filter(|entry| entry.method == *method)
            .filter_map(|entry| entry.pattern.matches(path).map(|params| (entry, params)));

        let Some((first, params)) = candidates.next() else {
            return Err(FetchError::RouteNotFound {
                method: method.clone(),
                path: path.to_string(),
            });
        };

        let conflicts: Vec<String> = candidates
            .filter(|(entry, _)| entry.pattern.is_equivalent(&first.pattern))
            .map(|(entry, _)| entry.pattern.template().to_string())
            .collect();

        if !conflicts.is_empty() {
            let mut templates = vec![first.pattern.template().to_string()];
            templates.extend(conflicts);
            tracing::error!(method = %method, path = %path, ?templates, "Conflicting routes");
            return Err(FetchError::AmbiguousRoute {
                method: method.clone(),
                path: path.to_string(),
                templates,
            });
        }

        Ok(RouteMatch {
            handler: first.handler.clone(),
            params,
            template: first.pattern.template().to_string(),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.routes
                    .iter()
                    .map(|r| format!("{} {}", r.method, r.pattern.template())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_req: CallRequest, reply: Reply) -> Result<(), FetchError> {
        reply.end()
    }

    #[test]
    fn test_resolve_by_method_and_path() {
        let mut registry = Registry::new();
        registry.post("/ok", noop).unwrap();
        registry.get("/ok", noop).unwrap();
        registry.get("/a/:x/:y", noop).unwrap();

        let matched = registry.resolve(&Method::GET, "/a/2/3").unwrap();
        assert_eq!(matched.template, "/a/:x/:y");
        assert_eq!(matched.params.get("x"), Some("2"));
        assert_eq!(matched.params.get("y"), Some("3"));

        assert_eq!(registry.resolve(&Method::GET, "/ok").unwrap().template, "/ok");
        assert_eq!(registry.resolve(&Method::POST, "/ok").unwrap().template, "/ok");
    }

    #[test]
    fn test_no_get_route() {
        let mut registry = Registry::new();
        registry.post("/only-post", noop).unwrap();

        let err = registry.resolve(&Method::GET, "/only-post").unwrap_err();
        assert!(matches!(err, FetchError::RouteNotFound { ref path, .. } if path == "/only-post"));
        assert!(registry.resolve(&Method::GET, "/nothing").is_err());
    }

    #[test]
    fn test_first_registered_wins_for_distinct_patterns() {
        let mut registry = Registry::new();
        registry.get("/users/me", noop).unwrap();
        registry.get("/users/:id", noop).unwrap();

        assert_eq!(
            registry.resolve(&Method::GET, "/users/me").unwrap().template,
            "/users/me"
        );
        let other = registry.resolve(&Method::GET, "/users/7").unwrap();
        assert_eq!(other.template, "/users/:id");
        assert_eq!(other.params.get("id"), Some("7"));
    }

    #[test]
    fn test_equivalent_duplicates_are_ambiguous() {
        let mut registry = Registry::new();
        registry.get("/items/:id", noop).unwrap();
        registry.get("/items/:key", noop).unwrap();

        match registry.resolve(&Method::GET, "/items/1") {
            Err(FetchError::AmbiguousRoute { templates, .. }) => {
                assert_eq!(templates, vec!["/items/:id", "/items/:key"]);
            }
            other => panic!("expected AmbiguousRoute, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut registry = Registry::new();
        assert!(registry.get("no-slash", noop).is_err());
        assert!(registry.is_empty());
    }
}

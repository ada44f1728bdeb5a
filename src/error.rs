//! Error types for loopback and external dispatch.

use std::sync::Arc;

use axum::http::Method;
use thiserror::Error;

use crate::cache::TransportError;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = FetchError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum FetchError {
    /// No registered route accepts this method for the path.
    #[error("{method} not allowed for {path}")]
    RouteNotFound { method: Method, path: String },

    /// More than one equivalent route claims the same method and path.
    #[error("{method} {path} is claimed by more than one route: {templates:?}")]
    AmbiguousRoute {
        method: Method,
        path: String,
        templates: Vec<String>,
    },

    #[error("malformed fetch options: {0}")]
    MalformedOptions(String),

    #[error("invalid cookie `{name}`: {reason}")]
    InvalidCookie { name: String, reason: &'static str },

    /// The invoked handler failed or panicked.
    #[error("handler for {path} failed: {source}")]
    Handler {
        path: String,
        #[source]
        source: BoxError,
    },

    /// The handler finished without finalizing its reply.
    #[error("handler for {path} finished without sending a response")]
    NoResponse { path: String },

    #[error("response already sent")]
    AlreadySent,

    #[error("body is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no execution context is active; fetch must run inside an inbound call")]
    ContextMissing,

    #[error("service has been torn down")]
    ServiceClosed,

    #[error("undefined property `{property}` on {object}")]
    UndefinedProperty {
        object: &'static str,
        property: String,
    },

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Transport(Arc<TransportError>),
}

impl FetchError {
    /// Walks `Handler` wrappers down to the innermost `FetchError`, if any.
    pub fn root(&self) -> &FetchError {
        let mut current = self;
        while let FetchError::Handler { source, .. } = current {
            match source.downcast_ref::<FetchError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_not_found_message() {
        let err = FetchError::RouteNotFound {
            method: Method::GET,
            path: "/missing".into(),
        };
        assert_eq!(err.to_string(), "GET not allowed for /missing");
    }

    #[test]
    fn test_root_unwraps_nested_handler_errors() {
        let inner = FetchError::RouteNotFound {
            method: Method::GET,
            path: "/c".into(),
        };
        let middle = FetchError::Handler {
            path: "/b".into(),
            source: Box::new(inner),
        };
        let outer = FetchError::Handler {
            path: "/a".into(),
            source: Box::new(middle),
        };

        assert!(matches!(outer.root(), FetchError::RouteNotFound { path, .. } if path == "/c"));
    }
}

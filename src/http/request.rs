//! Request objects handed to route handlers.
//!
//! # Responsibilities
//! - Represent both real inbound requests and synthesized loopback calls
//! - Expose captured path parameters, query pairs, headers and body
//! - Share the inbound cookie jar by reference with the whole call chain
//!
//! # Design Decisions
//! - Loopback requests are always GET with an empty body
//! - Repeated query keys are preserved in order; `query()` returns the first
//! - Dynamic property reads go through the capability guard

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::context::CookieJar;
use crate::error::FetchError;
use crate::loopback::guard::{Capabilities, GuardMode};
use crate::routing::Params;

/// Name of the request id header propagated by the service.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Ordered query-string pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, String)>);

impl Query {
    /// Parse a raw query string (without the leading `?`).
    pub fn parse(raw: &str) -> Self {
        Self(
            url::form_urlencoded::parse(raw.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON view: single values as strings, repeated keys as arrays.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (k, v) in &self.0 {
            match out.get_mut(k) {
                Some(Value::Array(items)) => items.push(Value::String(v.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(v.clone())]);
                }
                None => {
                    out.insert(k.clone(), Value::String(v.clone()));
                }
            }
        }
        Value::Object(out)
    }
}

/// Split a target such as `/users/1?tab=posts` into path and query.
pub fn split_target(target: &str) -> (&str, Query) {
    let target = target.split('#').next().unwrap_or(target);
    match target.split_once('?') {
        Some((path, raw)) => (path, Query::parse(raw)),
        None => (target, Query::default()),
    }
}

/// A call as seen by a route handler.
#[derive(Debug, Clone)]
pub struct CallRequest {
    method: Method,
    url: String,
    path: String,
    params: Params,
    query: Query,
    headers: HeaderMap,
    cookies: CookieJar,
    body: Bytes,
    guard: GuardMode,
}

impl CallRequest {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        url: String,
        path: String,
        params: Params,
        query: Query,
        headers: HeaderMap,
        cookies: CookieJar,
        body: Bytes,
        guard: GuardMode,
    ) -> Self {
        Self {
            method,
            url,
            path,
            params,
            query,
            headers,
            cookies,
            body,
            guard,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The full target, including the query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }

    pub fn query_pairs(&self) -> &Query {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The jar shared with the inbound request and every sibling call.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Read a property by name, subject to the capability guard.
    pub fn property(&self, name: &str) -> Result<Value, FetchError> {
        self.guard.read(self, name)
    }
}

impl Capabilities for CallRequest {
    const OBJECT: &'static str = "request";
    const DECLARED: &'static [&'static str] = &[
        "method", "url", "path", "params", "query", "headers", "cookies", "body",
    ];

    fn lookup(&self, name: &str) -> Option<Value> {
        let value = match name {
            "method" => json!(self.method.as_str()),
            "url" => json!(self.url),
            "path" => json!(self.path),
            "params" => self.params.to_json(),
            "query" => self.query.to_json(),
            "headers" => Value::Object(
                self.headers
                    .iter()
                    .filter_map(|(k, v)| {
                        v.to_str()
                            .ok()
                            .map(|v| (k.as_str().to_string(), json!(v)))
                    })
                    .collect(),
            ),
            "cookies" => json!(self.cookies.snapshot()),
            "body" => json!(String::from_utf8_lossy(&self.body)),
            _ => return None,
        };
        Some(value)
    }
}

//! Response capture and the response objects returned by `fetch`.
//!
//! # Responsibilities
//! - `Reply`: what a handler writes to (status, headers, cookies, body)
//! - Finalize exactly once, delivering a `FetchResponse` to whoever waits
//! - `FetchResponse`: status, `ok`, and text/JSON views of the stored body
//! - Convert a finished response into a real axum response
//!
//! # Design Decisions
//! - The body keeps the representation it was written in; `text()` and
//!   `json()` convert on demand
//! - Cookies set on any reply go to the shared jar and to the outer
//!   response, once per call, in call order
//! - A reply does not know whether it serves a real or a loopback call

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::context::{CookieJar, CookieOptions, OuterResponse};
use crate::error::FetchError;
use crate::loopback::guard::{Capabilities, GuardMode};

/// Body of a finished response, in the form it was produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Json(Value),
    Bytes(Bytes),
}

/// A finished response, from a loopback handler or an external transport.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl FetchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// True for any status below 400.
    pub fn ok(&self) -> bool {
        self.status.as_u16() < 400
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Body as text; JSON bodies are re-serialized.
    pub fn text(&self) -> Result<String, FetchError> {
        match &self.body {
            ResponseBody::Empty => Ok(String::new()),
            ResponseBody::Text(text) => Ok(text.clone()),
            ResponseBody::Json(value) => Ok(serde_json::to_string(value)?),
            ResponseBody::Bytes(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Body parsed as JSON; text bodies are re-parsed.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        match &self.body {
            ResponseBody::Json(value) => Ok(serde_json::from_value(value.clone())?),
            ResponseBody::Text(text) => Ok(serde_json::from_str(text)?),
            ResponseBody::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
            ResponseBody::Empty => Ok(serde_json::from_str("")?),
        }
    }

    pub fn bytes(&self) -> Result<Bytes, FetchError> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Ok(bytes.clone()),
            _ => Ok(Bytes::from(self.text()?)),
        }
    }
}

impl IntoResponse for FetchResponse {
    fn into_response(self) -> Response {
        let content_type = match &self.body {
            ResponseBody::Empty => None,
            ResponseBody::Text(_) => Some("text/html; charset=utf-8"),
            ResponseBody::Json(_) => Some("application/json"),
            ResponseBody::Bytes(_) => Some("application/octet-stream"),
        };

        let body = match self.body {
            ResponseBody::Empty => Body::empty(),
            ResponseBody::Text(text) => Body::from(text),
            ResponseBody::Json(value) => Body::from(value.to_string()),
            ResponseBody::Bytes(bytes) => Body::from(bytes),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Some(content_type) = content_type {
            if !response.headers().contains_key(header::CONTENT_TYPE) {
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        response
    }
}

/// The response object a handler writes to.
///
/// Cheap to clone; every clone finalizes the same pending result.
#[derive(Clone)]
pub struct Reply {
    inner: Arc<ReplyInner>,
}

struct ReplyInner {
    state: Mutex<ReplyState>,
    cookies: CookieJar,
    outer: OuterResponse,
    guard: GuardMode,
}

struct ReplyState {
    status: StatusCode,
    headers: HeaderMap,
    sender: Option<oneshot::Sender<FetchResponse>>,
}

impl Reply {
    /// Create a reply and the receiver its finalized response is delivered to.
    pub fn capture(
        cookies: CookieJar,
        outer: OuterResponse,
        guard: GuardMode,
    ) -> (Self, oneshot::Receiver<FetchResponse>) {
        let (sender, receiver) = oneshot::channel();
        let reply = Self {
            inner: Arc::new(ReplyInner {
                state: Mutex::new(ReplyState {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    sender: Some(sender),
                }),
                cookies,
                outer,
                guard,
            }),
        };
        (reply, receiver)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ReplyState> {
        self.inner.state.lock().expect("reply mutex poisoned")
    }

    /// Set the status used when the reply is finalized.
    pub fn status(&self, status: StatusCode) -> &Self {
        self.state().status = status;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.state().status.as_u16()
    }

    /// Set a response header.
    pub fn header(&self, name: &str, value: &str) -> Result<&Self, FetchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::MalformedOptions(format!("invalid header name {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::MalformedOptions(format!("invalid value for header {name}")))?;
        self.state().headers.insert(name, value);
        Ok(self)
    }

    /// Set a cookie for the rest of the call chain and the real client.
    ///
    /// Nothing is recorded when the cookie could not be sent as a header.
    pub fn cookie(
        &self,
        name: &str,
        value: &str,
        options: CookieOptions,
    ) -> Result<&Self, FetchError> {
        let directive = options.directive(name, value)?;
        self.inner.cookies.set(name, value);
        self.inner.outer.push_set_cookie(directive);
        Ok(self)
    }

    /// Expire a cookie.
    pub fn clear_cookie(&self, name: &str) -> Result<&Self, FetchError> {
        let directive = CookieOptions::default()
            .with_max_age(Duration::ZERO)
            .directive(name, "")?;
        self.inner.cookies.remove(name);
        self.inner.outer.push_set_cookie(directive);
        Ok(self)
    }

    pub fn send(&self, body: impl Into<String>) -> Result<(), FetchError> {
        self.finalize(ResponseBody::Text(body.into()))
    }

    pub fn send_bytes(&self, body: impl Into<Bytes>) -> Result<(), FetchError> {
        self.finalize(ResponseBody::Bytes(body.into()))
    }

    pub fn json<T: Serialize + ?Sized>(&self, body: &T) -> Result<(), FetchError> {
        let value = serde_json::to_value(body)?;
        self.finalize(ResponseBody::Json(value))
    }

    /// Finalize with an empty body.
    pub fn end(&self) -> Result<(), FetchError> {
        self.finalize(ResponseBody::Empty)
    }

    /// True once the reply has been finalized.
    pub fn is_sent(&self) -> bool {
        self.state().sender.is_none()
    }

    /// Read a property by name, subject to the capability guard.
    pub fn property(&self, name: &str) -> Result<Value, FetchError> {
        self.inner.guard.read(self, name)
    }

    fn finalize(&self, body: ResponseBody) -> Result<(), FetchError> {
        let mut state = self.state();
        let sender = state.sender.take().ok_or(FetchError::AlreadySent)?;
        let response = FetchResponse::new(state.status, std::mem::take(&mut state.headers), body);
        drop(state);

        if sender.send(response).is_err() {
            tracing::debug!("Reply finalized after its caller went away");
        }
        Ok(())
    }
}

impl Capabilities for Reply {
    const OBJECT: &'static str = "response";
    const DECLARED: &'static [&'static str] = &["statusCode", "headersSent"];

    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "statusCode" => Some(json!(self.status_code())),
            "headersSent" => Some(json!(self.is_sent())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("status", &self.status_code())
            .field("sent", &self.is_sent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> (Reply, oneshot::Receiver<FetchResponse>, CookieJar, OuterResponse) {
        let jar = CookieJar::new();
        let outer = OuterResponse::new();
        let (reply, rx) = Reply::capture(jar.clone(), outer.clone(), GuardMode::Permissive);
        (reply, rx, jar, outer)
    }

    #[tokio::test]
    async fn test_status_then_json() {
        let (reply, rx, _, _) = reply();
        reply.status(StatusCode::BAD_REQUEST).json(&json!({"ok": 0})).unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status_code(), 400);
        assert!(!response.ok());
        assert_eq!(response.json::<Value>().unwrap(), json!({"ok": 0}));
        assert_eq!(response.text().unwrap(), r#"{"ok":0}"#);
    }

    #[tokio::test]
    async fn test_send_text_parse_error() {
        let (reply, rx, _, _) = reply();
        reply.send("not json").unwrap();

        let response = rx.await.unwrap();
        assert!(response.ok());
        assert_eq!(response.text().unwrap(), "not json");
        assert!(matches!(response.json::<Value>(), Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_send_text_reparsed_as_json() {
        let (reply, rx, _, _) = reply();
        reply.send(r#"{"n":1}"#).unwrap();
        assert_eq!(rx.await.unwrap().json::<Value>().unwrap(), json!({"n": 1}));
    }

    #[test]
    fn test_finalize_twice_fails() {
        let (reply, _rx, _, _) = reply();
        reply.send("first").unwrap();
        assert!(reply.is_sent());
        assert!(matches!(reply.json(&json!({})), Err(FetchError::AlreadySent)));
        assert!(matches!(reply.end(), Err(FetchError::AlreadySent)));
    }

    #[test]
    fn test_cookie_updates_jar_and_outer() {
        let (reply, _rx, jar, outer) = reply();
        reply.cookie("k", "v", CookieOptions::default()).unwrap();
        reply.clear_cookie("old").unwrap();

        assert_eq!(jar.get("k").as_deref(), Some("v"));
        assert_eq!(outer.set_cookies(), vec!["k=v; Path=/", "old=; Max-Age=0; Path=/"]);
    }

    #[test]
    fn test_invalid_cookie_leaves_jar_untouched() {
        let (reply, _rx, jar, outer) = reply();
        let err = reply
            .cookie("sid", "a;b", CookieOptions::default())
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidCookie { ref name, .. } if name == "sid"));
        assert!(jar.get("sid").is_none());
        assert!(outer.set_cookies().is_empty());
    }

    #[tokio::test]
    async fn test_headers_and_into_response() {
        let (reply, rx, _, _) = reply();
        reply.header("x-trace", "abc").unwrap();
        assert!(reply.header("bad header", "x").is_err());
        reply.json(&json!([1, 2])).unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.headers().get("x-trace").unwrap(), "abc");

        let http = response.into_response();
        assert_eq!(http.status(), StatusCode::OK);
        assert_eq!(
            http.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_reply_properties() {
        let jar = CookieJar::new();
        let (reply, _rx) = Reply::capture(jar, OuterResponse::new(), GuardMode::Strict);
        reply.status(StatusCode::CREATED);
        assert_eq!(reply.property("statusCode").unwrap(), json!(201));
        assert_eq!(reply.property("headersSent").unwrap(), json!(false));
        assert!(matches!(
            reply.property("locals"),
            Err(FetchError::UndefinedProperty { object: "response", .. })
        ));
    }
}

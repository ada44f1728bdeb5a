//! Options accepted by `fetch`.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use url::Url;

use crate::cache::OutboundRequest;
use crate::error::FetchError;

/// Method, headers and body for a `fetch` call.
///
/// A missing method means GET; only GET calls are ever served from cache.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    method: Option<Method>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, FetchError> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Build options from a JSON object such as
    /// `{"method": "POST", "headers": {"accept": "text/plain"}, "body": "..."}`.
    ///
    /// Unknown keys are ignored.
    pub fn from_json(value: &Value) -> Result<Self, FetchError> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => {
                return Err(FetchError::MalformedOptions(
                    "options should be an object".to_string(),
                ))
            }
        };

        let mut options = Self::default();

        match object.get("method") {
            None | Some(Value::Null) => {}
            Some(Value::String(method)) => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| FetchError::MalformedOptions(format!("invalid method {method}")))?;
                options.method = Some(method);
            }
            Some(_) => {
                return Err(FetchError::MalformedOptions(
                    "method should be a string".to_string(),
                ))
            }
        }

        match object.get("headers") {
            None | Some(Value::Null) => {}
            Some(Value::Object(headers)) => {
                for (name, value) in headers {
                    let Value::String(value) = value else {
                        return Err(FetchError::MalformedOptions(format!(
                            "header {name} should be a string"
                        )));
                    };
                    let (name, value) = parse_header(name, value)?;
                    options.headers.insert(name, value);
                }
            }
            Some(_) => {
                return Err(FetchError::MalformedOptions(
                    "headers should be an object".to_string(),
                ))
            }
        }

        match object.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(body)) => options.body = Some(Bytes::from(body.clone())),
            Some(other) => options.body = Some(Bytes::from(other.to_string())),
        }

        Ok(options)
    }

    /// The explicitly requested method, if any.
    pub fn requested_method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub(crate) fn into_outbound(self, url: Url) -> OutboundRequest {
        OutboundRequest {
            method: self.method.unwrap_or(Method::GET),
            url,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl TryFrom<Value> for FetchOptions {
    type Error = FetchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), FetchError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FetchError::MalformedOptions(format!("invalid header name {name}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| FetchError::MalformedOptions(format!("invalid value for header {name}")))?;
    Ok((header_name, header_value))
}

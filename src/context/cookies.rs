//! Cookie state shared across a call chain.
//!
//! # Responsibilities
//! - Hold the inbound request's cookies in a jar every nested call shares
//! - Record Set-Cookie directives destined for the real outer response
//! - Render cookie attributes into Set-Cookie header values

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use dashmap::DashMap;

use crate::error::FetchError;

/// Cookie jar shared by reference between the inbound request and every
/// loopback call issued while it is being processed.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    inner: Arc<DashMap<String, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a jar from every `Cookie` header in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let jar = Self::new();
        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else {
                tracing::debug!("Skipping non-ASCII Cookie header");
                continue;
            };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    let name = name.trim();
                    if !name.is_empty() {
                        jar.set(name, value.trim().trim_matches('"'));
                    }
                }
            }
        }
        jar
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.get(name).map(|r| r.value().clone())
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.inner.remove(name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sorted copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// True if both handles point at the same jar.
    pub fn same_jar(&self, other: &CookieJar) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes attached to a Set-Cookie directive.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<Duration>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

impl CookieOptions {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Render a Set-Cookie value, rejecting names, values or attributes the
    /// client could not read back as the same cookie.
    pub fn directive(&self, name: &str, value: &str) -> Result<String, FetchError> {
        let invalid = |reason| FetchError::InvalidCookie {
            name: name.to_string(),
            reason,
        };
        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(invalid("name must be a non-empty token"));
        }
        if !value.chars().all(is_cookie_octet) {
            return Err(invalid("value contains whitespace, control or separator characters"));
        }

        let attributes = [self.path.as_deref(), self.domain.as_deref()];
        if attributes
            .iter()
            .flatten()
            .any(|attr| attr.contains(|c: char| c == ';' || c.is_ascii_control()))
        {
            return Err(invalid("path and domain may not contain ';' or control characters"));
        }

        let directive = self.render(name, value);
        HeaderValue::from_str(&directive)
            .map_err(|_| invalid("directive is not a valid header value"))?;
        Ok(directive)
    }

    /// Render `name=value` plus attributes as a Set-Cookie header value.
    pub fn render(&self, name: &str, value: &str) -> String {
        let mut out = format!("{}={}", name, value);
        if let Some(max_age) = self.max_age {
            let _ = write!(out, "; Max-Age={}", max_age.as_secs());
        }
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={}", domain);
        }
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={}", path);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        match self.same_site {
            Some(SameSite::Strict) => out.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => out.push_str("; SameSite=Lax"),
            Some(SameSite::None) => out.push_str("; SameSite=None"),
            None => {}
        }
        out
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

fn is_cookie_octet(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '"' | ',' | ';' | '\\')
}

/// The real response of the inbound call, as far as loopback calls see it.
///
/// Directives are kept in the order they were recorded and are written to
/// the real response once the inbound handler has finished.
#[derive(Debug, Clone, Default)]
pub struct OuterResponse {
    set_cookies: Arc<Mutex<Vec<String>>>,
}

impl OuterResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_set_cookie(&self, directive: String) {
        self.set_cookies
            .lock()
            .expect("outer response mutex poisoned")
            .push(directive);
    }

    /// Copy of the directives recorded so far.
    pub fn set_cookies(&self) -> Vec<String> {
        self.set_cookies
            .lock()
            .expect("outer response mutex poisoned")
            .clone()
    }

    /// Remove and return every recorded directive.
    pub fn take_set_cookies(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .set_cookies
                .lock()
                .expect("outer response mutex poisoned"),
        )
    }
}

//! Execution context subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → http::server context middleware builds ExecutionContext
//!     → establish(ctx, next.run(req))          (task-local scope)
//!         → handler → fetch("/b")              (current() sees ctx)
//!             → handler B → fetch("/c")        (still ctx, no new scope)
//!     → scope ends with the inbound call
//! ```
//!
//! # Design Decisions
//! - Carried by a tokio task-local, never by a global
//! - Loopback calls run inside the caller's scope instead of opening one
//! - `spawn` re-establishes the scope in the new task explicitly
//! - Concurrent inbound calls own independent scopes

pub mod cookies;

use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri};
use tokio::task::JoinHandle;

use crate::error::FetchError;
use crate::loopback::Dispatcher;
use crate::routing::Registry;

pub use cookies::{CookieJar, CookieOptions, OuterResponse, SameSite};

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

/// The inbound request at the root of a call chain.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
}

impl InboundRequest {
    /// Build from request parts, parsing the `Cookie` headers into a fresh jar.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        let cookies = CookieJar::from_headers(&headers);
        Self {
            method,
            uri,
            headers,
            cookies,
        }
    }

    /// A bare GET request, convenient for hosts without real inbound traffic.
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri, HeaderMap::new())
    }
}

/// Values visible to an inbound call and every loopback call it triggers.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: String,
    inbound: InboundRequest,
    outer: OuterResponse,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
}

impl ExecutionContext {
    pub(crate) fn new(
        id: String,
        inbound: InboundRequest,
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                inbound,
                outer: OuterResponse::new(),
                registry,
                dispatcher,
            }),
        }
    }

    /// Request id of the inbound call.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn inbound(&self) -> &InboundRequest {
        &self.inner.inbound
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.inner.inbound.cookies
    }

    pub fn outer(&self) -> &OuterResponse {
        &self.inner.outer
    }

    /// Routes loopback calls are resolved against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// True if both handles refer to the same scope.
    pub fn same_scope(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("method", &self.inner.inbound.method)
            .field("uri", &self.inner.inbound.uri)
            .finish_non_exhaustive()
    }
}

/// Run `future` with `ctx` as the current context.
pub fn establish<F>(ctx: ExecutionContext, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(ctx, future)
}

/// The context of the enclosing inbound call.
pub fn current() -> Result<ExecutionContext, FetchError> {
    CURRENT
        .try_with(ExecutionContext::clone)
        .map_err(|_| FetchError::ContextMissing)
}

/// Spawn a task that inherits the current context, if there is one.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Ok(ctx) => tokio::spawn(establish(ctx, future)),
        Err(_) => tokio::spawn(future),
    }
}

//! Loopback dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! handler code: fetch("/users/1?tab=posts")
//!     → context::current() (registry, cookies, outer response)
//!     → absolute URL?  → cache::ExternalCache → Transport
//!     → relative path  → invoker.rs
//!         → registry.resolve(GET, "/users/1")
//!         → CallRequest { params, query, shared cookie jar }
//!         → Reply::capture (finalize once)
//!         → handler(request, reply)
//!     → FetchResponse { status, ok, text(), json() }
//! ```
//!
//! # Design Decisions
//! - The dispatcher is found through the current context, so independent
//!   services in one process never cross-dispatch
//! - Loopback calls reuse the caller's context, however deep the nesting
//! - Teardown detaches the dispatcher; later calls fail with `ServiceClosed`

pub mod guard;
pub mod invoker;
pub mod options;

use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::cache::ExternalCache;
use crate::context::{self, ExecutionContext};
use crate::error::FetchError;
use crate::http::FetchResponse;
use crate::observability::metrics;

pub use guard::{Capabilities, GuardMode, Guarded};
pub use options::FetchOptions;

/// Fetch `target` from inside an inbound call.
///
/// Relative targets are served by the service's own handlers, absolute
/// `http(s)` URLs by the external cache and transport.
pub async fn fetch(target: &str) -> Result<FetchResponse, FetchError> {
    fetch_with(target, FetchOptions::default()).await
}

/// [`fetch`] with explicit options.
pub async fn fetch_with(target: &str, options: FetchOptions) -> Result<FetchResponse, FetchError> {
    let ctx = context::current()?;
    ctx.dispatcher().dispatch(&ctx, target, options).await
}

/// True for targets that must leave the process.
pub fn is_absolute(target: &str) -> bool {
    Url::parse(target)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Per-service dispatch state shared by every context the service creates.
pub struct Dispatcher {
    cache: ExternalCache,
    guard: GuardMode,
    closed: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new(cache: ExternalCache, guard: GuardMode) -> Self {
        Self {
            cache,
            guard,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &ExternalCache {
        &self.cache
    }

    pub fn guard(&self) -> GuardMode {
        self.guard
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach: later dispatches fail and cached state is dropped.
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cache.clear();
            tracing::info!("Dispatcher detached");
        }
    }

    pub(crate) async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        target: &str,
        options: FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        if self.is_closed() {
            return Err(FetchError::ServiceClosed);
        }

        let (kind, result) = if is_absolute(target) {
            ("external", self.cache.call(target, options).await)
        } else {
            ("loopback", invoker::invoke(ctx, target, options, self.guard).await)
        };

        match &result {
            Ok(response) => {
                metrics::record_dispatch(kind, "ok");
                tracing::debug!(
                    request_id = %ctx.id(),
                    target = %target,
                    status = response.status_code(),
                    "Dispatch complete"
                );
            }
            Err(e) => {
                metrics::record_dispatch(kind, "error");
                tracing::debug!(request_id = %ctx.id(), target = %target, error = %e, "Dispatch failed");
            }
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn for_tests(guard: GuardMode) -> Self {
        use crate::cache::{CacheRules, OutboundRequest, Transport, TransportError};
        use std::sync::Arc;

        struct Offline;

        #[async_trait::async_trait]
        impl Transport for Offline {
            async fn send(&self, request: OutboundRequest) -> Result<FetchResponse, TransportError> {
                Err(TransportError::Other(format!("offline: {}", request.url)))
            }
        }

        Self::new(ExternalCache::new(CacheRules::default(), Arc::new(Offline)), guard)
    }
}

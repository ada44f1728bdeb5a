//! HTTP service host.
//!
//! # Responsibilities
//! - Create the axum Router with a fallback into the route registry
//! - Wire up middleware (request ID, tracing, timeout, execution context)
//! - Run inbound handlers and convert their replies into real responses
//! - Append Set-Cookie directives recorded anywhere in the call chain
//! - Bind server to listener; detach the dispatcher on shutdown

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{CacheRules, ExternalCache, ReqwestTransport, Transport};
use crate::config::{validate_config, ConfigError, ServiceConfig};
use crate::context::{self, ExecutionContext, InboundRequest};
use crate::error::FetchError;
use crate::http::request::{Query, X_REQUEST_ID};
use crate::http::{CallRequest, Reply};
use crate::loopback::{invoker, Dispatcher, GuardMode};
use crate::routing::Registry;

/// State injected into the middleware and the inbound handler.
#[derive(Clone)]
struct ServiceState {
    routes: Arc<Registry>,
    dispatch_registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

impl ServiceState {
    fn context(&self, id: String, inbound: InboundRequest) -> ExecutionContext {
        ExecutionContext::new(
            id,
            inbound,
            self.dispatch_registry.clone(),
            self.dispatcher.clone(),
        )
    }
}

/// A running set of routes whose handlers can `fetch` each other.
///
/// Clones share the registry, dispatcher and cache.
#[derive(Clone)]
pub struct Service {
    state: ServiceState,
    config: ServiceConfig,
}

impl Service {
    pub fn builder(routes: Registry) -> ServiceBuilder {
        ServiceBuilder::new(routes)
    }

    /// Service with the default configuration.
    pub fn new(routes: Registry) -> Result<Self, ConfigError> {
        Self::builder(routes).build()
    }

    /// Build the axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(serve_inbound)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                establish_context,
            ))
            .with_state(self.state.clone())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.timeouts.request_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Context for hosts that do not go through [`Service::router`].
    ///
    /// Run work inside it with [`context::establish`].
    pub fn context(&self, inbound: InboundRequest) -> ExecutionContext {
        self.state
            .context(uuid::Uuid::new_v4().to_string(), inbound)
    }

    /// Detach the dispatcher. Later `fetch` calls from this service's
    /// contexts fail with [`FetchError::ServiceClosed`].
    pub fn teardown(&self) {
        self.state.dispatcher.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.dispatcher.is_closed()
    }

    pub fn cache(&self) -> &ExternalCache {
        self.state.dispatcher.cache()
    }

    pub fn guard(&self) -> GuardMode {
        self.state.dispatcher.guard()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run the service on `listener` until `shutdown` resolves, then tear down.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.state.routes.len(),
            guard = ?self.guard(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.teardown();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("routes", &self.state.routes)
            .field("guard", &self.guard())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub struct ServiceBuilder {
    routes: Registry,
    config: ServiceConfig,
    dispatch_registry: Option<Registry>,
    transport: Option<Arc<dyn Transport>>,
    guard: Option<GuardMode>,
}

impl ServiceBuilder {
    fn new(routes: Registry) -> Self {
        Self {
            routes,
            config: ServiceConfig::default(),
            dispatch_registry: None,
            transport: None,
            guard: None,
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve loopback calls against `registry` instead of the served routes.
    pub fn dispatch_registry(mut self, registry: Registry) -> Self {
        self.dispatch_registry = Some(registry);
        self
    }

    /// Replace the reqwest transport used for external calls.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the guard mode from `dispatch.strict_guard`.
    pub fn guard(mut self, guard: GuardMode) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn build(self) -> Result<Service, ConfigError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let rules = CacheRules::from_config(&config.cache.rules)?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(Duration::from_secs(
                config.timeouts.outbound_secs,
            ))?),
        };
        let guard = self
            .guard
            .unwrap_or_else(|| GuardMode::from_strict(config.dispatch.strict_guard));

        let routes = Arc::new(self.routes);
        let dispatch_registry = match self.dispatch_registry {
            Some(registry) => Arc::new(registry),
            None => routes.clone(),
        };

        let state = ServiceState {
            routes,
            dispatch_registry,
            dispatcher: Arc::new(Dispatcher::new(ExternalCache::new(rules, transport), guard)),
            max_body_bytes: config.dispatch.max_body_bytes,
        };

        Ok(Service { state, config })
    }
}

/// Establish the execution context for one inbound call, then flush the
/// Set-Cookie directives it recorded onto the real response.
async fn establish_context(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    if context::current().is_ok() {
        return next.run(request).await;
    }

    let id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let inbound = InboundRequest::new(
        request.method().clone(),
        request.uri().clone(),
        request.headers().clone(),
    );
    let ctx = state.context(id, inbound);
    let outer = ctx.outer().clone();

    let mut response = context::establish(ctx, next.run(request)).await;

    for directive in outer.take_set_cookies() {
        match HeaderValue::from_str(&directive) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => {
                tracing::warn!(directive = %directive, error = %e, "Dropping invalid Set-Cookie");
            }
        }
    }
    response
}

/// Inbound handler: resolve the route and run it inside the current context.
async fn serve_inbound(State(state): State<ServiceState>, request: Request) -> Response {
    let ctx = match context::current() {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Inbound request outside an execution context");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let method = parts.method.clone();

    tracing::debug!(request_id = %ctx.id(), method = %method, path = %path, "Inbound request");

    let matched = match state.routes.resolve(&method, &path) {
        Ok(matched) => matched,
        Err(FetchError::RouteNotFound { .. }) => {
            tracing::warn!(request_id = %ctx.id(), method = %method, path = %path, "No route matched");
            return (StatusCode::NOT_FOUND, format!("Cannot {method} {path}")).into_response();
        }
        Err(e) => {
            tracing::error!(request_id = %ctx.id(), path = %path, error = %e, "Route resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(request_id = %ctx.id(), path = %path, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    // Inbound objects are parsed off the wire, never guarded.
    let guard = GuardMode::Permissive;

    let request = CallRequest::new(
        method,
        url,
        path.clone(),
        matched.params,
        Query::parse(parts.uri.query().unwrap_or("")),
        parts.headers,
        ctx.cookies().clone(),
        body,
        guard,
    );
    let (reply, receiver) = Reply::capture(ctx.cookies().clone(), ctx.outer().clone(), guard);

    match invoker::run_handler(matched.handler, request, reply, receiver, &path).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(request_id = %ctx.id(), path = %path, error = %e, "Handler failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

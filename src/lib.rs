//! In-process loopback dispatch for axum services.
//!
//! A handler can call another route of the same service as if it were a
//! network call:
//!
//! ```no_run
//! use loopback_fetch::{fetch, CallRequest, Registry, Reply, Service};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut routes = Registry::new();
//! routes
//!     .get("/users/:id", |req: CallRequest, res: Reply| async move {
//!         res.json(&serde_json::json!({ "id": req.param("id") }))
//!     })?
//!     .get("/profile", |_req: CallRequest, res: Reply| async move {
//!         let user = fetch("/users/1").await?;
//!         res.send(user.text()?)
//!     })?;
//!
//! let service = Service::new(routes)?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! service.serve(listener, std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Absolute `http(s)` targets leave the process through a cache with
//! per-URL TTL rules and single-flight coalescing.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod loopback;
pub mod observability;
pub mod routing;

pub use config::ServiceConfig;
pub use context::{CookieJar, CookieOptions, ExecutionContext, InboundRequest};
pub use error::{BoxError, FetchError};
pub use http::{CallRequest, FetchResponse, Reply, ResponseBody, Service, ServiceBuilder};
pub use loopback::{fetch, fetch_with, FetchOptions, GuardMode};
pub use routing::Registry;

//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     Registry::get("/users/:id?", handler)
//!     → pattern.rs (compile template into segments)
//!     → stored in registration order
//!
//! Resolution (per inbound or loopback call):
//!     (method, path)
//!     → registry.rs (filter by method, match patterns)
//!     → Return: RouteMatch { handler, params } or RouteNotFound
//! ```
//!
//! # Design Decisions
//! - Routes compiled at registration, immutable at runtime
//! - No regex in the path matcher
//! - Deterministic: same input always resolves to the same route

pub mod pattern;
pub mod registry;

pub use pattern::{Params, PatternError, RoutePattern};
pub use registry::{Handler, HandlerFuture, Registry, RouteMatch};

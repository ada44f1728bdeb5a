//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, request ID, trace, timeout, context middleware)
//!     → registry resolves the inbound route
//!     → request.rs (CallRequest with params, query, headers, shared cookies)
//!     → handler writes to response.rs Reply
//!     → FetchResponse → axum Response (+ Set-Cookie flush)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{CallRequest, Query, X_REQUEST_ID};
pub use response::{FetchResponse, Reply, ResponseBody};
pub use server::{Service, ServiceBuilder};

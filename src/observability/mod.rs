//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, request_id fields)
//!     → metrics.rs (dispatch and cache counters)
//!
//! Consumers:
//!     → Log output (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every loopback call of an inbound request
//! - Metrics are cheap (atomic increments); without a recorder they are no-ops

pub mod logging;
pub mod metrics;

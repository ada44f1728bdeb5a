//! External call caching subsystem.
//!
//! # Data Flow
//! ```text
//! fetch("https://...")
//!     → rules.rs (GET + first matching pattern → TTL, else bypass)
//!     → store.rs
//!         → live entry?      → clone, no transport call
//!         → call in flight?  → await the same shared future
//!         → otherwise        → spawn transport call, register as pending
//!     → transport.rs (reqwest)
//!     → on success: store clone with expiry, resolve every waiter
//! ```
//!
//! # Design Decisions
//! - Key is the normalized URL; the method never enters the key
//! - Non-GET calls always reach the transport
//! - Failures are never cached
//! - Expired entries are dropped on read and by a sweep spawned after each miss

pub mod rules;
pub mod store;
pub mod transport;

pub use rules::{CacheRule, CacheRules};
pub use store::ExternalCache;
pub use transport::{OutboundRequest, ReqwestTransport, Transport, TransportError};

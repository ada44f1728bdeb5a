//! TTL cache with single-flight coalescing in front of the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::time::Instant;
use url::Url;

use crate::cache::rules::CacheRules;
use crate::cache::transport::{OutboundRequest, Transport, TransportError};
use crate::error::FetchError;
use crate::http::FetchResponse;
use crate::loopback::FetchOptions;
use crate::observability::metrics;

type InFlight = Shared<BoxFuture<'static, Result<FetchResponse, Arc<TransportError>>>>;

type PendingTable = HashMap<String, Flight>;

/// A registered transport call. `id` tells apart flights started for the
/// same key before and after a `clear`.
struct Flight {
    id: u64,
    shared: InFlight,
}

/// Owned by the spawned transport task. Dropping it, on completion or on
/// unwind, releases the pending entry if it still belongs to this flight.
struct FlightSlot {
    pending: Arc<Mutex<PendingTable>>,
    key: String,
    id: u64,
}

impl Drop for FlightSlot {
    fn drop(&mut self) {
        if let Ok(mut table) = self.pending.lock() {
            release(&mut table, &self.key, self.id);
        }
    }
}

/// Removes `key` from the table when it is still registered to flight `id`.
fn release(table: &mut PendingTable, key: &str, id: u64) -> bool {
    if table.get(key).is_some_and(|flight| flight.id == id) {
        table.remove(key);
        true
    } else {
        false
    }
}

struct CacheEntry {
    response: FetchResponse,
    expires_at: Instant,
}

/// Cache for external calls.
///
/// Entries and in-flight calls are keyed by the normalized URL. Every
/// response handed out, and every response stored, is its own copy.
pub struct ExternalCache {
    rules: CacheRules,
    transport: Arc<dyn Transport>,
    entries: Arc<DashMap<String, CacheEntry>>,
    pending: Arc<Mutex<PendingTable>>,
    next_flight: AtomicU64,
}

impl ExternalCache {
    pub fn new(rules: CacheRules, transport: Arc<dyn Transport>) -> Self {
        Self {
            rules,
            transport,
            entries: Arc::new(DashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &CacheRules {
        &self.rules
    }

    /// Perform an external call, from cache when the rules allow it.
    pub async fn call(&self, url: &str, options: FetchOptions) -> Result<FetchResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let request = options.into_outbound(parsed);

        let Some(ttl) = self.rules.ttl_for(&request.method, request.url.as_str()) else {
            metrics::record_cache("bypass");
            tracing::debug!(method = %request.method, url = %request.url, "Cache bypassed");
            return self
                .transport
                .send(request)
                .await
                .map_err(|e| FetchError::Transport(Arc::new(e)));
        };

        let key = request.url.as_str().to_string();

        // Lookup and registration happen under one lock with no await, so
        // concurrent callers either see the entry, the flight, or start it.
        let flight = {
            let mut pending = self.lock_pending();

            if let Some(hit) = self.lookup(&key) {
                metrics::record_cache("hit");
                tracing::debug!(url = %key, "Cache hit");
                return Ok(hit);
            }

            match pending.get(&key) {
                Some(flight) => {
                    metrics::record_cache("coalesced");
                    tracing::debug!(url = %key, "Joining in-flight call");
                    flight.shared.clone()
                }
                None => {
                    metrics::record_cache("miss");
                    tracing::debug!(url = %key, ttl_ms = ttl.as_millis() as u64, "Cache miss");
                    self.schedule_sweep();
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let shared = self.start(key.clone(), id, request, ttl);
                    pending.insert(
                        key,
                        Flight {
                            id,
                            shared: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };

        flight.await.map_err(FetchError::Transport)
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_pending().len()
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Drop all entries and forget in-flight calls. Calls still running
    /// complete for their callers but are not stored.
    pub fn clear(&self) {
        let mut pending = self.lock_pending();
        pending.clear();
        self.entries.clear();
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().expect("pending table mutex poisoned")
    }

    fn lookup(&self, key: &str) -> Option<FetchResponse> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.response.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Spawn the transport call; it runs to completion even if every
    /// caller stops waiting.
    fn start(&self, key: String, id: u64, request: OutboundRequest, ttl: Duration) -> InFlight {
        let transport = self.transport.clone();
        let entries = self.entries.clone();
        let slot = FlightSlot {
            pending: self.pending.clone(),
            key,
            id,
        };

        let task = tokio::spawn(async move {
            let outcome = transport.send(request).await.map_err(Arc::new);

            let mut table = slot.pending.lock().expect("pending table mutex poisoned");
            let current = release(&mut table, &slot.key, slot.id);
            match &outcome {
                Ok(response) if current => {
                    entries.insert(
                        slot.key.clone(),
                        CacheEntry {
                            response: response.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                    tracing::debug!(url = %slot.key, status = response.status_code(), "External response cached");
                }
                Ok(_) => {
                    tracing::debug!(url = %slot.key, "Cache cleared during call, response not stored");
                }
                Err(e) => {
                    tracing::warn!(url = %slot.key, error = %e, "External call failed, not cached");
                }
            }
            drop(table);
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(Arc::new(TransportError::Aborted(e.to_string()))))
        }
        .boxed()
        .shared()
    }

    fn schedule_sweep(&self) {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let swept = purge(&entries, Instant::now());
            if swept > 0 {
                tracing::debug!(swept, "Expired cache entries swept");
            }
        });
    }
}

fn purge(entries: &DashMap<String, CacheEntry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(entries.len())
}

//! Coalescing of concurrent network fetches.
//!
//! The first caller for a key spawns the physical fetch; later callers for the
//! same key await the same shared result. A finished fetch leaves the table
//! before its result is handed out, so a retry always starts a new one. Each
//! caller is tracked by id; the physical fetch is aborted only when the last
//! caller detaches before it finishes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::domain::entities::CacheKey;
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::HttpResponse;

type SharedFetch = Shared<BoxFuture<'static, LoadResult<HttpResponse>>>;

struct InFlight {
    fetch_id: Uuid,
    shared: SharedFetch,
    callers: HashSet<Uuid>,
    claimed: Arc<AtomicBool>,
    abort: AbortHandle,
}

type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// A response delivered to one waiter of a physical fetch.
#[derive(Debug)]
pub struct SharedResponse {
    /// The response, identical for every waiter.
    pub response: HttpResponse,
    claimed: Arc<AtomicBool>,
}

impl SharedResponse {
    /// Returns true for exactly one waiter of the physical fetch.
    ///
    /// Used to persist a coalesced response once rather than once per waiter.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }
}

fn release_if_current(
    in_flight: &InFlightMap,
    key: &CacheKey,
    fetch_id: Uuid,
) -> Option<InFlight> {
    let mut in_flight = in_flight.lock();
    if in_flight.get(key).is_some_and(|entry| entry.fetch_id == fetch_id) {
        in_flight.remove(key)
    } else {
        None
    }
}

/// Deduplicates concurrent fetches for the same key.
#[derive(Default)]
pub struct RequestCoordinator {
    in_flight: InFlightMap,
    physical_fetches: AtomicU64,
}

impl RequestCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches through `loader`, sharing the physical fetch with any other
    /// caller currently fetching `key`.
    ///
    /// `loader` runs only if no fetch for `key` is in flight. Dropping the
    /// returned future detaches this caller without affecting the others.
    ///
    /// # Errors
    /// Returns the loader's error, or `LoadError::Cancelled` if the shared
    /// fetch was aborted.
    pub async fn fetch<F, Fut>(&self, key: &CacheKey, loader: F) -> LoadResult<SharedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult<HttpResponse>> + Send + 'static,
    {
        let caller_id = Uuid::new_v4();
        let (shared, fetch_id, claimed) = {
            let mut in_flight = self.in_flight.lock();
            if let Some(entry) = in_flight.get_mut(key) {
                entry.callers.insert(caller_id);
                trace!(key = %key, waiters = entry.callers.len(), "Joined in-flight fetch");
                (entry.shared.clone(), entry.fetch_id, Arc::clone(&entry.claimed))
            } else {
                let fetch_id = Uuid::new_v4();
                let handle = tokio::spawn(loader());
                let abort = handle.abort_handle();
                let table = Arc::clone(&self.in_flight);
                let done_key = key.clone();
                let shared = async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) if e.is_cancelled() => Err(LoadError::Cancelled),
                        Err(e) => Err(LoadError::transport(format!("Fetch task panicked: {e}"))),
                    };
                    if release_if_current(&table, &done_key, fetch_id).is_some() {
                        trace!(key = %done_key, "Fetch finished, entry released");
                    }
                    result
                }
                .boxed()
                .shared();
                let claimed = Arc::new(AtomicBool::new(false));
                in_flight.insert(
                    key.clone(),
                    InFlight {
                        fetch_id,
                        shared: shared.clone(),
                        callers: HashSet::from([caller_id]),
                        claimed: Arc::clone(&claimed),
                        abort,
                    },
                );
                self.physical_fetches.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Started physical fetch");
                (shared, fetch_id, claimed)
            }
        };

        let _guard = CallerGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            fetch_id,
            caller_id,
        };
        shared
            .await
            .map(|response| SharedResponse { response, claimed })
    }

    /// Number of physical fetches started so far.
    pub fn physical_fetch_count(&self) -> u64 {
        self.physical_fetches.load(Ordering::Relaxed)
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Number of callers awaiting the fetch for `key`.
    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.in_flight
            .lock()
            .get(key)
            .map_or(0, |entry| entry.callers.len())
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &self.in_flight_count())
            .field("physical_fetches", &self.physical_fetch_count())
            .finish()
    }
}

/// Detaches one caller when dropped. Only matters while the fetch is still
/// running; a finished fetch has already left the table.
struct CallerGuard {
    in_flight: InFlightMap,
    key: CacheKey,
    fetch_id: Uuid,
    caller_id: Uuid,
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        let Some(entry) = in_flight.get_mut(&self.key) else {
            return;
        };
        if entry.fetch_id != self.fetch_id {
            return;
        }
        entry.callers.remove(&self.caller_id);
        if entry.callers.is_empty()
            && let Some(entry) = in_flight.remove(&self.key)
        {
            entry.abort.abort();
            trace!(key = %self.key, "Last caller detached, fetch aborted");
        }
    }
}

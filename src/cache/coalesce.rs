//! Single-flight request coalescing.
//!
//! The registry maps a cache key to a shared, memoized future. The first
//! caller for a key registers the computation; later callers attach to the
//! same [`Shared`] future and observe the identical result or error.
//!
//! The registry entry is removed inside the poll that completes the shared
//! computation, so by the time any caller sees the result the key is free
//! again. Errors are fanned out as `Arc<Error>` because every attached caller
//! receives the same one.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};

/// Result type carried by a shared computation.
pub type SharedResult<T> = std::result::Result<T, Arc<Error>>;

type SharedFuture<T> = Shared<BoxFuture<'static, SharedResult<T>>>;
type Registry<T> = Mutex<HashMap<String, Registered<T>>>;

/// Identity of one registered computation.
///
/// A key can be registered again after a cancel while the old computation is
/// still running; the id tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlightId(u64);

struct Registered<T> {
    id: FlightId,
    future: SharedFuture<T>,
}

/// Handle to a (possibly shared) in-flight computation.
pub struct Flight<T> {
    id: FlightId,
    joined: bool,
    future: SharedFuture<T>,
}

impl<T> fmt::Debug for Flight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flight")
            .field("id", &self.id)
            .field("joined", &self.joined)
            .finish()
    }
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> FlightId {
        self.id
    }

    /// `true` if this caller attached to a computation someone else started.
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Wait for the shared computation to settle.
    pub async fn wait(self) -> Result<T> {
        self.future.await.map_err(Error::Shared)
    }
}

/// Removes the registry entry when the computation settles, panics or is
/// dropped mid-flight.
struct SettleGuard<T> {
    registry: Weak<Registry<T>>,
    key: String,
    id: FlightId,
}

impl<T> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // Drop the removed entry only after the lock is released
        let removed = {
            let mut in_flight = registry.lock();
            match in_flight.get(&self.key) {
                Some(r) if r.id == self.id => in_flight.remove(&self.key),
                _ => None,
            }
        };
        if removed.is_some() {
            trace!("Flight {:?} for {} settled", self.id, self.key);
        }
    }
}

/// Registry of in-flight computations keyed by cache key.
pub struct RequestCoalescer<T> {
    in_flight: Arc<Registry<T>>,
    next_id: AtomicU64,
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the computation running for `key`, or start one with `start`.
    ///
    /// `start` is only invoked when nothing is in flight for the key; it
    /// receives the id the new computation is registered under. The returned
    /// flight is lazy: the computation advances while some caller awaits it.
    pub fn run<F, Fut>(&self, key: &str, start: F) -> Flight<T>
    where
        F: FnOnce(FlightId) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(flight) = self.attach(key) {
            return flight;
        }

        let id = FlightId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let computation = start(id);
        let guard = SettleGuard {
            registry: Arc::downgrade(&self.in_flight),
            key: key.to_string(),
            id,
        };
        let future = async move {
            let _guard = guard;
            computation.await.map_err(Arc::new)
        }
        .boxed()
        .shared();

        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            // Lost a registration race; our unpolled computation is dropped
            return Flight {
                id: existing.id,
                joined: true,
                future: existing.future.clone(),
            };
        }
        in_flight.insert(
            key.to_string(),
            Registered {
                id,
                future: future.clone(),
            },
        );
        trace!("Flight {:?} registered for {}", id, key);

        Flight {
            id,
            joined: false,
            future,
        }
    }

    fn attach(&self, key: &str) -> Option<Flight<T>> {
        self.in_flight.lock().get(key).map(|r| Flight {
            id: r.id,
            joined: true,
            future: r.future.clone(),
        })
    }

    /// `true` if `id` is still the registered computation for `key`.
    pub fn is_current(&self, key: &str, id: FlightId) -> bool {
        self.in_flight
            .lock()
            .get(key)
            .map(|r| r.id == id)
            .unwrap_or(false)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Forget the computation registered for `key`.
    ///
    /// Callers already attached still receive its result; the next caller
    /// starts a fresh computation.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.in_flight.lock().remove(key);
        removed.is_some()
    }

    /// Forget every registered computation.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Registered<T>> = self.in_flight.lock().drain().map(|(_, r)| r).collect();
        drained.len()
    }

    /// Number of computations currently registered.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

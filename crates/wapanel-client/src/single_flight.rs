//! Coalescing async memoizer.
//!
//! Concurrent callers of [`SingleFlight::run`] share one spawned operation
//! instead of each starting their own. A forced call starts a new flight that
//! later callers join; the flight it replaced keeps running for whoever is
//! already waiting on it.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

struct Flight<T> {
    id: u64,
    shared: Shared<BoxFuture<'static, Option<T>>>,
}

pub struct SingleFlight<T> {
    slot: Mutex<Option<Flight<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending flight, or start one with `make` when none is pending
    /// or `force` is set.
    ///
    /// Returns `None` only if the operation panicked.
    pub async fn run<F, Fut>(&self, force: bool, make: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, shared) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) if !force && flight.shared.peek().is_none() => {
                    (flight.id, flight.shared.clone())
                }
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let handle = tokio::spawn(make());
                    let shared = async move { handle.await.ok() }.boxed().shared();
                    *slot = Some(Flight {
                        id,
                        shared: shared.clone(),
                    });
                    (id, shared)
                }
            }
        };

        let result = shared.await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
        result
    }

    /// Whether a flight is currently pending.
    pub fn in_flight(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .is_some_and(|flight| flight.shared.peek().is_none())
    }
}

//! Deduplication of concurrent identical async operations.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::trace;

type Flight<T> = Shared<BoxFuture<'static, T>>;

/// Runs at most one instance of an operation at a time.
///
/// Callers that arrive while an operation is pending join it and receive a
/// clone of its output. Once the output is ready the slot is emptied, so the
/// next caller starts a fresh run.
///
/// The operation is driven by whichever waiters are polling it; a waiter
/// that gives up does not cancel the run for the others.
pub struct SingleFlight<T: Clone> {
    slot: Arc<Mutex<Slot<T>>>,
}

struct Slot<T: Clone> {
    generation: u64,
    pending: Option<Flight<T>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                pending: None,
            })),
        }
    }

    /// Join the pending run, or start one with `make`.
    ///
    /// `make` is only called when no run is pending.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = lock(&self.slot);
            match &slot.pending {
                Some(pending) => {
                    trace!(generation = slot.generation, "Joining pending operation");
                    pending.clone()
                }
                None => {
                    slot.generation += 1;
                    let generation = slot.generation;
                    trace!(generation, "Starting operation");

                    let owner = Arc::downgrade(&self.slot);
                    let operation = make();
                    let flight = async move {
                        let output = operation.await;
                        release(&owner, generation);
                        output
                    }
                    .boxed()
                    .shared();

                    slot.pending = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// True while a run is pending.
    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = lock(&self.slot);
        f.debug_struct("SingleFlight")
            .field("generation", &slot.generation)
            .field("in_flight", &slot.pending.is_some())
            .finish()
    }
}

fn release<T: Clone>(owner: &Weak<Mutex<Slot<T>>>, generation: u64) {
    if let Some(slot) = owner.upgrade() {
        let mut slot = lock(&slot);
        if slot.generation == generation {
            slot.pending = None;
        }
    }
}

fn lock<T: Clone>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Coalescing of concurrent duplicate operations
//!
//! Callers that arrive while an operation is running attach to its shared
//! handle instead of starting their own. The operation runs on its own
//! task, so it finishes even if every waiter goes away, and it vacates the
//! slot itself once done; the next caller after that starts a new flight.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to a running flight. Resolves to `None` if the task panicked.
pub type Flight<T> = Shared<BoxFuture<'static, Option<T>>>;

struct Slot<T: Clone> {
    generation: u64,
    flight: Option<Flight<T>>,
}

/// Outcome of [`SingleFlight::join_or`]
pub enum Joined<T: Clone> {
    /// No flight was needed; the `ready` check produced a value
    Ready(T),
    /// Attached to a flight; `started` is true for the caller that launched it
    Flight { flight: Flight<T>, started: bool },
}

impl<T: Clone + Send + Sync + 'static> Joined<T> {
    pub async fn outcome(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Flight { flight, .. } => flight.await,
        }
    }
}

pub struct SingleFlight<T: Clone> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                flight: None,
            })),
        }
    }
}

fn lock<T: Clone>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    // The slot holds no invariant a panicking holder could break halfway.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the slot when the flight task ends, including by panic
struct Vacate<T: Clone> {
    slot: Arc<Mutex<Slot<T>>>,
    generation: u64,
}

impl<T: Clone> Drop for Vacate<T> {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.generation == self.generation {
            slot.flight = None;
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a flight is currently running
    pub fn in_flight(&self) -> bool {
        lock(&self.slot).flight.is_some()
    }

    /// Join the running flight or start one with `start`
    pub async fn run<F, Fut>(&self, start: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.join_or(|| None, start).outcome().await
    }

    /// Join the running flight; otherwise consult `ready`, and only if it
    /// yields nothing start a new flight with `start`.
    ///
    /// `ready` runs under the slot lock, so it observes every effect a
    /// finished flight made before vacating the slot.
    pub fn join_or<R, F, Fut>(&self, ready: R, start: F) -> Joined<T>
    where
        R: FnOnce() -> Option<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(flight) = &slot.flight {
            return Joined::Flight {
                flight: flight.clone(),
                started: false,
            };
        }
        if let Some(value) = ready() {
            return Joined::Ready(value);
        }

        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let vacate = Vacate {
            slot: Arc::clone(&self.slot),
            generation,
        };
        let operation = start();
        let task = tokio::spawn(async move {
            let _vacate = vacate;
            operation.await
        });

        let flight = async move { task.await.ok() }.boxed().shared();
        slot.flight = Some(flight.clone());
        Joined::Flight {
            flight,
            started: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_op(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        value: &'static str,
    ) -> impl Future<Output = String> + Send + 'static {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            value.to_string()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_flight() {
        let flights = Arc::new(SingleFlight::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run(|| counting_op(&calls, Duration::from_millis(50), "B"))
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("B"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flights.in_flight());
    }

    #[tokio::test]
    async fn test_next_call_after_completion_starts_new_flight() {
        let flights = SingleFlight::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = flights.run(|| counting_op(&calls, Duration::ZERO, "B")).await;
        let second = flights.run(|| counting_op(&calls, Duration::ZERO, "C")).await;

        assert_eq!(first.as_deref(), Some("B"));
        assert_eq!(second.as_deref(), Some("C"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_value_skips_flight() {
        let flights = SingleFlight::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let joined = flights.join_or(
            || Some("current".to_string()),
            || counting_op(&calls, Duration::ZERO, "B"),
        );
        assert!(matches!(joined, Joined::Ready(_)));
        assert_eq!(joined.outcome().await.as_deref(), Some("current"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_running_flight_wins_over_ready_value() {
        let flights = SingleFlight::<String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = flights.join_or(|| None, || counting_op(&calls, Duration::from_millis(50), "B"));
        assert!(matches!(leader, Joined::Flight { started: true, .. }));

        let follower = flights.join_or(
            || Some("stale".to_string()),
            || counting_op(&calls, Duration::ZERO, "C"),
        );
        assert!(matches!(follower, Joined::Flight { started: false, .. }));

        assert_eq!(follower.outcome().await.as_deref(), Some("B"));
        assert_eq!(leader.outcome().await.as_deref(), Some("B"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flight_completes_when_waiters_give_up() {
        let flights = SingleFlight::<String>::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let waiter = flights.run(move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            done.fetch_add(1, Ordering::SeqCst);
            "B".to_string()
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(5), waiter)
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!flights.in_flight());
    }

    #[tokio::test]
    async fn test_panicking_flight_resolves_to_none() {
        let flights = SingleFlight::<String>::new();
        let exploded = flights
            .run(|| async {
                let fail = true;
                assert!(!fail, "refresh exploded");
                String::new()
            })
            .await;
        assert!(exploded.is_none());
        assert!(!flights.in_flight());

        let recovered = flights.run(|| async { "B".to_string() }).await;
        assert_eq!(recovered.as_deref(), Some("B"));
    }
}

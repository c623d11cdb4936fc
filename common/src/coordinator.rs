//! Write serialization and conflict retry.
//!
//! The object network offers no cross-client coordination beyond rejecting
//! a put whose target revision moved underneath the writer. This module
//! provides the two client-side mechanisms built on that signal:
//!
//! - [`WriteCoordinator::with_lock`] guarantees at most one in-flight write
//!   per logical key within this process, FIFO per key.
//! - [`WriteCoordinator::with_retry`] re-runs an operation whose failure the
//!   caller-supplied classifier identifies as a write conflict, with
//!   exponential backoff.
//!
//! Retries are an inner loop within one locked execution, never separate
//! queue entries. The sleep used between retries is injectable so tests can
//! assert the backoff schedule without real timers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Retry count used by write paths against the object store.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay of the exponential backoff schedule (200ms, 400ms, 800ms).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Sleep abstraction so retry schedules can be tested with a fake clock.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Default sleeper backed by the tokio timer.
struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a conflict-classified error. Carries the
    /// last underlying error, not a synthetic wrapper.
    Exhausted(E),
    /// A non-conflict error, propagated immediately without retry.
    Inner(E),
}

impl<E> RetryError<E> {
    /// The underlying error, regardless of how the retry loop ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted(err) | RetryError::Inner(err) => err,
        }
    }
}

/// Per-key async lock plus conflict-aware retry.
///
/// A key's state machine is `IDLE -> RUNNING -> IDLE`. Queued waiters for
/// the same key run in arrival order (tokio mutexes hand the lock to
/// waiters FIFO); distinct keys proceed fully concurrently. A failing
/// operation releases the lock like a successful one, so one error never
/// blocks the operations queued behind it.
pub struct WriteCoordinator {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    sleeper: Arc<dyn Sleeper>,
    backoff_base: Duration,
}

impl WriteCoordinator {
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(TokioSleeper))
    }

    /// Creates a coordinator with a custom sleeper, for deterministic tests.
    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            sleeper,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Runs `op` while holding the lock for `key`.
    ///
    /// The result (success or failure) is returned unchanged; the lock is
    /// released either way. The per-key entry is removed from the lock map
    /// once no other caller is waiting on it, so drained keys do not
    /// accumulate.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            op().await
        };

        {
            let mut locks = self.locks.lock().await;
            if let Some(entry) = locks.get(key) {
                // One reference held by the map, one by this frame. Anything
                // above two means another caller is queued on this key.
                if Arc::strong_count(entry) == 2 {
                    locks.remove(key);
                }
            }
        }

        result
    }

    /// Runs `op`, retrying failures the classifier marks as write conflicts.
    ///
    /// Delays follow `base * 2^attempt` (200ms, 400ms, 800ms with the
    /// defaults); total attempts never exceed `max_retries + 1`. Errors the
    /// classifier rejects propagate immediately as [`RetryError::Inner`];
    /// exhausted conflicts surface as [`RetryError::Exhausted`] wrapping the
    /// last underlying error.
    pub async fn with_retry<T, E, F, Fut, C>(
        &self,
        mut op: F,
        max_retries: u32,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if classify(&err) => {
                    if attempt >= max_retries {
                        return Err(RetryError::Exhausted(err));
                    }
                    let delay = self.backoff_base * 2u32.pow(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "write conflict, backing off");
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(RetryError::Inner(err)),
            }
        }
    }
}

impl Default for WriteCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Records requested delays instead of sleeping.
    struct RecordingSleeper {
        delays: StdMutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delays: StdMutex::new(Vec::new()),
            })
        }

        fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn should_run_operation_and_return_result() {
        // given
        let coordinator = WriteCoordinator::new();

        // when
        let result = coordinator.with_lock("docs", || async { 42 }).await;

        // then
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn should_never_run_two_bodies_for_same_key_concurrently() {
        // given
        let coordinator = Arc::new(WriteCoordinator::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        // when - many concurrent callers on the same key
        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            handles.push(tokio::spawn(async move {
                coordinator
                    .with_lock("docs", || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // then
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_run_different_keys_concurrently() {
        // given
        let coordinator = Arc::new(WriteCoordinator::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        // when - "a" blocks until "b" completes; deadlock if keys shared a lock
        let blocked = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .with_lock("a", || async move {
                        rx.await.unwrap();
                    })
                    .await;
            })
        };
        coordinator
            .with_lock("b", || async move {
                tx.send(()).unwrap();
            })
            .await;

        // then
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn should_release_lock_after_failing_operation() {
        // given
        let coordinator = WriteCoordinator::new();

        // when - a failing body, then another body on the same key
        let failed: Result<(), &str> = coordinator
            .with_lock("docs", || async { Err("boom") })
            .await;
        let succeeded = coordinator.with_lock("docs", || async { Ok::<_, &str>(1) }).await;

        // then - no poisoning
        assert!(failed.is_err());
        assert_eq!(succeeded.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_garbage_collect_drained_lock_entries() {
        // given
        let coordinator = WriteCoordinator::new();

        // when
        coordinator.with_lock("docs", || async {}).await;
        coordinator.with_lock("other", || async {}).await;

        // then
        assert!(coordinator.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn should_return_success_without_retry() {
        // given
        let sleeper = RecordingSleeper::new();
        let coordinator = WriteCoordinator::with_sleeper(sleeper.clone());

        // when
        let result = coordinator
            .with_retry(|| async { Ok::<_, String>(7) }, 3, |_| true)
            .await;

        // then
        assert_eq!(result.unwrap(), 7);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn should_retry_conflicts_with_doubling_delays() {
        // given - fails with a conflict twice, then succeeds
        let sleeper = RecordingSleeper::new();
        let coordinator = WriteCoordinator::with_sleeper(sleeper.clone());
        let attempts = AtomicU32::new(0);

        // when
        let result = coordinator
            .with_retry(
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err("conflict")
                        } else {
                            Ok("done")
                        }
                    }
                },
                3,
                |err| *err == "conflict",
            )
            .await;

        // then - resolved on the 3rd attempt after 200 + 400 = 600ms of backoff
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(200), Duration::from_millis(400)]
        );
    }

    #[tokio::test]
    async fn should_surface_last_error_after_exhausting_retries() {
        // given
        let sleeper = RecordingSleeper::new();
        let coordinator = WriteCoordinator::with_sleeper(sleeper.clone());
        let attempts = AtomicU32::new(0);

        // when
        let result: Result<(), _> = coordinator
            .with_retry(
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    async move { Err(format!("conflict {}", attempt)) }
                },
                3,
                |_| true,
            )
            .await;

        // then - 4 total attempts, delays 200/400/800, last error preserved
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        match result.unwrap_err() {
            RetryError::Exhausted(err) => assert_eq!(err, "conflict 3"),
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn should_propagate_non_conflict_error_without_retry() {
        // given
        let sleeper = RecordingSleeper::new();
        let coordinator = WriteCoordinator::with_sleeper(sleeper.clone());
        let attempts = AtomicU32::new(0);

        // when
        let result: Result<(), _> = coordinator
            .with_retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
                3,
                |err| *err == "conflict",
            )
            .await;

        // then
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
        assert!(matches!(result.unwrap_err(), RetryError::Inner("fatal")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn should_preserve_fifo_order_per_key() {
        // given
        let coordinator = Arc::new(WriteCoordinator::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        // when - issue lock requests one at a time so arrival order is fixed
        let mut handles = Vec::new();
        for i in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                coordinator
                    .with_lock("docs", || async move {
                        order.lock().unwrap().push(i);
                        tokio::task::yield_now().await;
                    })
                    .await;
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // then
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}

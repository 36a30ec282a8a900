//! OfflineQueue - single-slot retry with backoff.
//!
//! Holds at most one retryable operation. The operation is re-invoked on a
//! backoff schedule until it succeeds or the queue is cancelled; the last
//! delay of the schedule repeats indefinitely.
//!
//! Timers are spawned tokio tasks. Every enqueue and cancel bumps an epoch
//! counter, and a timer (or an in-flight attempt) whose epoch no longer
//! matches becomes a no-op, so nothing fires after `cancel()` even when the
//! timer had already elapsed.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use shared_types::QueueSnapshot;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, DEFAULT_BACKOFF_MS};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type RetryFuture<E> = BoxFuture<'static, Result<(), E>>;

/// A unit of work that can be invoked repeatedly with identical effect
pub type RetryOperation<E> = Arc<dyn Fn() -> RetryFuture<E> + Send + Sync>;

/// Non-empty, non-decreasing list of retry delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Result<Self, ConfigError> {
        if delays.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        if let Some(index) = delays.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(ConfigError::DecreasingBackoff {
                index: index + 1,
                previous: index,
            });
        }
        Ok(Self { delays })
    }

    pub fn from_millis(delays_ms: &[u64]) -> Result<Self, ConfigError> {
        Self::new(delays_ms.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay before the attempt that follows `retry_count` failures
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let last = self.delays.len() - 1;
        self.delays[(retry_count as usize).min(last)]
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

struct QueueInner<E> {
    pending: Option<RetryOperation<E>>,
    retry_count: u32,
    next_retry_at: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
    epoch: u64,
    /// Epoch of the attempt currently running, if any
    in_flight: Option<u64>,
}

impl<E> Default for QueueInner<E> {
    fn default() -> Self {
        Self {
            pending: None,
            retry_count: 0,
            next_retry_at: None,
            timer: None,
            epoch: 0,
            in_flight: None,
        }
    }
}

/// Cloneable handle; clones share the same slot, timer and subscribers.
///
/// Must be used from within a Tokio runtime.
pub struct OfflineQueue<E> {
    inner: Arc<Mutex<QueueInner<E>>>,
    backoff: BackoffSchedule,
    events: broadcast::Sender<QueueSnapshot>,
}

impl<E> Clone for OfflineQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            backoff: self.backoff.clone(),
            events: self.events.clone(),
        }
    }
}

impl<E> OfflineQueue<E>
where
    E: Display + Send + 'static,
{
    pub fn new(backoff: BackoffSchedule) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            backoff,
            events,
        }
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Full-state notifications, one per mutation
    pub fn subscribe(&self) -> broadcast::Receiver<QueueSnapshot> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        Self::snapshot_of(&self.lock())
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Replace the pending operation and arm the first backoff step.
    pub fn enqueue<F, Fut>(&self, op: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.enqueue_boxed(Arc::new(move || op().boxed()));
    }

    pub fn enqueue_boxed(&self, op: RetryOperation<E>) {
        let snapshot = {
            let mut inner = self.lock();
            inner.epoch = inner.epoch.wrapping_add(1);
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.pending = Some(op);
            inner.retry_count = 0;
            inner.in_flight = None;
            let delay = self.backoff.delay_for(0);
            self.arm(&mut inner, delay);
            Self::snapshot_of(&inner)
        };

        tracing::debug!(
            delay_ms = self.backoff.delay_for(0).as_millis() as u64,
            "Queued retryable operation"
        );
        self.notify(snapshot);
    }

    /// Run the pending operation now.
    ///
    /// Resolves immediately when nothing is pending or an attempt is already
    /// running. A failed attempt re-arms the timer and returns the error.
    pub async fn flush(&self) -> Result<(), E> {
        self.attempt(None).await
    }

    /// Drop the pending operation and any armed timer.
    ///
    /// Subscribers are notified only when something was actually dropped.
    pub fn cancel(&self) {
        let snapshot = {
            let mut inner = self.lock();
            inner.epoch = inner.epoch.wrapping_add(1);
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.in_flight = None;
            if inner.pending.take().is_none() {
                return;
            }
            inner.retry_count = 0;
            inner.next_retry_at = None;
            tracing::debug!("Cancelled queued operation");
            Self::snapshot_of(&inner)
        };
        self.notify(snapshot);
    }

    async fn attempt(&self, fired_epoch: Option<u64>) -> Result<(), E> {
        let (op, epoch, snapshot) = {
            let mut inner = self.lock();
            if let Some(expected) = fired_epoch {
                if inner.epoch != expected {
                    return Ok(());
                }
                // The handle belongs to the task running this attempt.
                inner.timer = None;
            }
            let Some(op) = inner.pending.clone() else {
                return Ok(());
            };
            if inner.in_flight == Some(inner.epoch) {
                return Ok(());
            }
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.in_flight = Some(inner.epoch);
            inner.next_retry_at = None;
            (op, inner.epoch, Self::snapshot_of(&inner))
        };
        self.notify(snapshot);

        let result = op().await;

        let snapshot = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                // cancelled or replaced while running
                return result;
            }
            inner.in_flight = None;
            match &result {
                Ok(()) => {
                    inner.pending = None;
                    inner.retry_count = 0;
                    inner.next_retry_at = None;
                    tracing::debug!("Queued operation succeeded");
                }
                Err(e) => {
                    inner.retry_count = inner.retry_count.saturating_add(1);
                    let delay = self.backoff.delay_for(inner.retry_count);
                    tracing::warn!(
                        error = %e,
                        retry_count = inner.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Queued operation failed, retrying later"
                    );
                    self.arm(&mut inner, delay);
                }
            }
            Self::snapshot_of(&inner)
        };
        self.notify(snapshot);
        result
    }

    fn arm(&self, inner: &mut QueueInner<E>, delay: Duration) {
        let epoch = inner.epoch;
        let offset = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        inner.next_retry_at = Some(Utc::now() + offset);

        let queue = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.attempt(Some(epoch)).await;
        }));
    }

    fn notify(&self, snapshot: QueueSnapshot) {
        // No receivers is fine.
        let _ = self.events.send(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(inner: &QueueInner<E>) -> QueueSnapshot {
        QueueSnapshot {
            has_pending: inner.pending.is_some(),
            retry_count: inner.retry_count,
            next_retry_at: inner.next_retry_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn schedule(ms: &[u64]) -> BackoffSchedule {
        BackoffSchedule::from_millis(ms).unwrap()
    }

    /// Operation whose n-th invocation returns `script[n]` (then succeeds).
    fn scripted(script: Vec<Result<(), String>>) -> (Arc<AtomicUsize>, RetryOperation<String>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let script = Arc::new(script);
        let op: RetryOperation<String> = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let outcome = script.get(n).cloned().unwrap_or(Ok(()));
            async move { outcome }.boxed()
        });
        (calls, op)
    }

    fn always_failing() -> (Arc<AtomicUsize>, RetryOperation<String>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let op: RetryOperation<String> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("offline".to_string()) }.boxed()
        });
        (calls, op)
    }

    async fn elapse(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_backoff_rejects_empty_and_decreasing() {
        assert_eq!(BackoffSchedule::new(vec![]), Err(ConfigError::EmptyBackoff));
        assert_eq!(
            BackoffSchedule::from_millis(&[10, 30, 20]),
            Err(ConfigError::DecreasingBackoff {
                index: 2,
                previous: 1
            })
        );
        assert!(BackoffSchedule::from_millis(&[10, 10, 20]).is_ok());
    }

    #[test]
    fn test_backoff_last_delay_repeats() {
        let backoff = schedule(&[10, 20, 40]);
        let delays: Vec<u64> = (0..5)
            .map(|count| backoff.delay_for(count).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 40, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_success_clears_state() {
        let queue = OfflineQueue::new(schedule(&[10, 20]));
        let (calls, op) = scripted(vec![Ok(())]);

        queue.enqueue_boxed(op);
        queue.flush().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.snapshot(), QueueSnapshot::default());

        // the armed timer was disarmed by the flush
        elapse(100).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_retries_until_success() {
        let queue = OfflineQueue::new(schedule(&[10, 20]));
        let (calls, op) = scripted(vec![Err("down".to_string()), Ok(())]);

        queue.enqueue_boxed(op);

        elapse(11).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = queue.snapshot();
        assert!(snapshot.has_pending);
        assert_eq!(snapshot.retry_count, 1);
        assert!(snapshot.next_retry_at.is_some());

        elapse(21).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(queue.snapshot().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_delays_follow_backoff() {
        let queue = OfflineQueue::new(schedule(&[10, 20, 40]));
        let (calls, op) = always_failing();
        queue.enqueue_boxed(op);

        // attempts land at t=10, 30, 70, 110, 150
        for (step_ms, expected_calls) in [(11, 1), (20, 2), (40, 3), (40, 4), (40, 5)] {
            elapse(step_ms).await;
            assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
            assert_eq!(queue.snapshot().retry_count as usize, expected_calls);
        }

        queue.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_replaces_pending_operation() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let (calls_a, op_a) = scripted(vec![Ok(())]);
        let (calls_b, op_b) = scripted(vec![Ok(())]);

        queue.enqueue_boxed(op_a);
        elapse(5).await;
        queue.enqueue_boxed(op_b);
        elapse(50).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert!(queue.snapshot().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_resets_retry_count() {
        let queue = OfflineQueue::new(schedule(&[10, 20]));
        let (_calls, op) = always_failing();
        queue.enqueue_boxed(op);
        elapse(11).await;
        assert_eq!(queue.snapshot().retry_count, 1);

        let (_calls, op) = always_failing();
        queue.enqueue_boxed(op);
        assert_eq!(queue.snapshot().retry_count, 0);
        assert!(queue.snapshot().has_pending);

        queue.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_terminal() {
        let queue = OfflineQueue::new(schedule(&[10, 20]));
        let (calls, op) = always_failing();

        queue.enqueue_boxed(op);
        elapse(11).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        queue.cancel();
        elapse(1_000).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.snapshot(), QueueSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_attempt() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let (calls, op) = scripted(vec![Ok(())]);

        queue.enqueue_boxed(op);
        queue.cancel();
        queue.cancel();
        elapse(100).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queue.snapshot().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_when_idle_is_noop() {
        let queue: OfflineQueue<String> = OfflineQueue::new(schedule(&[10]));
        let mut events = queue.subscribe();

        queue.flush().await.unwrap();

        assert!(queue.snapshot().is_idle());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle_stays_silent() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let mut events = queue.subscribe();

        queue.cancel();
        assert!(events.try_recv().is_err());

        let (_calls, op) = scripted(vec![Ok(())]);
        queue.enqueue_boxed(op);
        assert!(events.recv().await.unwrap().has_pending);
        queue.flush().await.unwrap();
        let running = events.recv().await.unwrap();
        assert!(running.has_pending);
        assert!(events.recv().await.unwrap().is_idle());

        // already idle after the successful flush
        queue.cancel();
        assert!(events.try_recv().is_err());
        assert!(queue.snapshot().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_arms_first_delay() {
        let queue = OfflineQueue::new(schedule(&[3000, 6000]));
        let (_calls, op) = scripted(vec![Ok(())]);

        let before = Utc::now();
        queue.enqueue_boxed(op);
        let snapshot = queue.snapshot();

        assert!(snapshot.has_pending);
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(queue.backoff().delay_for(0), Duration::from_millis(3000));
        let next = snapshot.next_retry_at.expect("retry should be scheduled");
        let offset = (next - before).num_milliseconds();
        assert!((2_900..=4_000).contains(&offset), "offset was {offset}ms");

        queue.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_mutation_notifies() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let mut events = queue.subscribe();
        let (_calls, op) = always_failing();

        queue.enqueue_boxed(op);
        let queued = events.recv().await.unwrap();
        assert!(queued.has_pending);
        assert_eq!(queued.retry_count, 0);

        assert!(queue.flush().await.is_err());
        let running = events.recv().await.unwrap();
        assert!(running.has_pending);
        assert!(running.next_retry_at.is_none());
        let failed = events.recv().await.unwrap();
        assert_eq!(failed.retry_count, 1);
        assert!(failed.next_retry_at.is_some());

        queue.cancel();
        let cancelled = events.recv().await.unwrap();
        assert!(cancelled.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_in_flight() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let op: RetryOperation<String> = {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok(())
                }
                .boxed()
            })
        };
        queue.enqueue_boxed(op);

        let background = queue.clone();
        let first = tokio::spawn(async move { background.flush().await });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        queue.flush().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(queue.snapshot().is_idle());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_discards_outcome() {
        let queue = OfflineQueue::new(schedule(&[10]));
        let gate = Arc::new(Notify::new());

        let op: RetryOperation<String> = {
            let gate = Arc::clone(&gate);
            Arc::new(move || {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Err("late failure".to_string())
                }
                .boxed()
            })
        };
        queue.enqueue_boxed(op);

        let background = queue.clone();
        let first = tokio::spawn(async move { background.flush().await });
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        queue.cancel();
        gate.notify_one();
        assert!(first.await.unwrap().is_err());

        // the failure arrived after cancel and must not re-arm anything
        assert!(queue.snapshot().is_idle());
        elapse(100).await;
        assert!(queue.snapshot().is_idle());
    }
}

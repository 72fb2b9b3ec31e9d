use crate::dispatcher::SaveDispatcher;
use crate::gauge;
use crate::metrics_defs::QUEUE_DEPTH;
use crate::rate_limiter::RateLimiter;
use crate::types::{FieldKey, Score};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueuedSave {
    pub key: FieldKey,
    pub score: Score,
    pub enqueued_at: Instant,
}

#[derive(Default)]
struct QueueState {
    // Insertion ordered, so the first entry is the head of the queue.
    items: IndexMap<FieldKey, QueuedSave>,
    worker: Option<JoinHandle<()>>,
}

/// FIFO worklist for saves that were refused by the rate limiter.
///
/// Only the head is ever checked against the limiter, so a field that stays
/// rate limited at the head holds back every field behind it. Ordering is
/// kept simple on purpose; fairness across fields is not attempted.
#[derive(Clone)]
pub struct SaveQueue {
    state: Arc<Mutex<QueueState>>,
    limiter: Arc<RateLimiter>,
    dispatcher: SaveDispatcher,
    poll_interval: Duration,
}

impl SaveQueue {
    pub fn new(
        limiter: Arc<RateLimiter>,
        dispatcher: SaveDispatcher,
        poll_interval: Duration,
    ) -> Self {
        SaveQueue {
            state: Arc::new(Mutex::new(QueueState::default())),
            limiter,
            dispatcher,
            poll_interval,
        }
    }

    /// Adds a save to the tail, or replaces the score of an already queued
    /// save for the same field without moving it.
    pub fn enqueue(&self, key: FieldKey, score: Score) {
        let mut state = self.state.lock();

        match state.items.get_mut(&key) {
            Some(queued) => {
                tracing::debug!(key = %key, score = %score, "updated queued save");
                queued.score = score;
            }
            None => {
                tracing::warn!(key = %key, score = %score, "rate limited, queuing save");
                state.items.insert(
                    key,
                    QueuedSave {
                        key,
                        score,
                        enqueued_at: Instant::now(),
                    },
                );
            }
        }
        gauge!(QUEUE_DEPTH).set(state.items.len() as f64);

        if state.worker.is_none() {
            let queue = self.clone();
            state.worker = Some(tokio::spawn(async move { queue.process_loop().await }));
        }
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.state.lock().items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty and no worker running.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.items.is_empty() && state.worker.is_none()
    }

    /// Drops the queued save for `key`, if any. The worker stops on its own
    /// once nothing is left.
    pub fn remove(&self, key: &FieldKey) -> Option<QueuedSave> {
        let mut state = self.state.lock();
        let removed = state.items.shift_remove(key);
        if removed.is_some() {
            tracing::debug!(key = %key, "dropped queued save");
            gauge!(QUEUE_DEPTH).set(state.items.len() as f64);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<QueuedSave> {
        self.state.lock().items.values().copied().collect()
    }

    /// Stops the worker and drops everything still queued.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        let dropped = state.items.len();
        state.items.clear();
        gauge!(QUEUE_DEPTH).set(0.0);

        if dropped > 0 {
            tracing::warn!(dropped, "save queue shut down with pending saves");
        }
    }

    async fn process_loop(self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                let Some((key, _)) = state.items.first() else {
                    state.worker = None;
                    return;
                };
                let key = *key;

                if self.limiter.try_admit(&key) {
                    let popped = state.items.shift_remove(&key);
                    gauge!(QUEUE_DEPTH).set(state.items.len() as f64);
                    popped
                } else {
                    None
                }
            };

            match next {
                Some(queued) => {
                    tracing::debug!(
                        key = %queued.key,
                        waited_ms = queued.enqueued_at.elapsed().as_millis() as u64,
                        "dispatching queued save"
                    );
                    // The queue does not wait for the save to finish.
                    drop(self.dispatcher.dispatch(queued.key, queued.score));
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, SyncConfig};
    use crate::saver::RetryingSaver;
    use crate::status::StatusBoard;
    use crate::testutils::{RecordingView, ScriptedBackend, score};

    fn queue(backend: Arc<ScriptedBackend>, limiter: Arc<RateLimiter>) -> SaveQueue {
        let view = Arc::new(RecordingView::default());
        let status = Arc::new(StatusBoard::new(view.clone()));
        let saver = RetryingSaver::new(1, &SyncConfig::default(), backend, status, view);
        let dispatcher = SaveDispatcher::new(Arc::new(saver));
        SaveQueue::new(limiter, dispatcher, Duration::from_millis(500))
    }

    fn limiter(capacity: u32) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(&RateLimitConfig {
            window_ms: 2000,
            capacity,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_in_enqueue_order() {
        let backend = Arc::new(ScriptedBackend::default());
        let queue = queue(backend.clone(), limiter(5));
        let (a, b, c) = (FieldKey::new(1, 1), FieldKey::new(2, 1), FieldKey::new(3, 1));

        queue.enqueue(a, score(1));
        queue.enqueue(b, score(2));
        queue.enqueue(c, score(3));
        assert_eq!(queue.len(), 3);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.is_idle());
        assert_eq!(backend.saved_scores(), vec![(a, 1), (b, 2), (c, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_queued_score_in_place() {
        let backend = Arc::new(ScriptedBackend::default());
        let limiter = limiter(1);
        let a = FieldKey::new(1, 1);
        let b = FieldKey::new(2, 1);
        // Exhaust `a` so it stays at the head until its window expires.
        assert!(limiter.try_admit(&a));
        let queue = queue(backend.clone(), limiter);

        queue.enqueue(a, score(1));
        queue.enqueue(b, score(2));
        queue.enqueue(a, score(4));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!((snapshot[0].key, snapshot[0].score), (a, score(4)));
        assert_eq!(snapshot[1].key, b);

        // Head-of-line: `b` is free to go but waits behind `a`.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(backend.save_calls().is_empty());

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(backend.saved_scores(), vec![(a, 4), (b, 2)]);
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_draining() {
        let backend = Arc::new(ScriptedBackend::default());
        let queue = queue(backend.clone(), limiter(5));

        queue.enqueue(FieldKey::new(1, 1), score(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.is_idle());

        queue.enqueue(FieldKey::new(1, 2), score(2));
        assert!(!queue.is_idle());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.is_idle());
        assert_eq!(backend.save_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_keeps_remaining_order() {
        let backend = Arc::new(ScriptedBackend::default());
        let limiter = limiter(1);
        let (a, b, c) = (FieldKey::new(1, 1), FieldKey::new(2, 1), FieldKey::new(3, 1));
        assert!(limiter.try_admit(&a));
        let queue = queue(backend.clone(), limiter);

        queue.enqueue(a, score(1));
        queue.enqueue(b, score(2));
        queue.enqueue(c, score(3));

        assert_eq!(queue.remove(&a).map(|q| q.score), Some(score(1)));
        assert_eq!(queue.remove(&a), None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.saved_scores(), vec![(b, 2), (c, 3)]);
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let backend = Arc::new(ScriptedBackend::default());
        let limiter = limiter(1);
        let key = FieldKey::new(1, 1);
        assert!(limiter.try_admit(&key));
        let queue = queue(backend.clone(), limiter);

        queue.enqueue(key, score(3));
        queue.shutdown();
        assert!(queue.is_idle());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.save_calls().is_empty());
    }
}

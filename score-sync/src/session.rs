use crate::backend::ScoreBackend;
use crate::config::{InvalidConfig, SyncConfig};
use crate::counter;
use crate::debounce::{DebounceCoalescer, SettleHandler};
use crate::dispatcher::SaveDispatcher;
use crate::metrics_defs::VALIDATION_REJECTED;
use crate::queue::SaveQueue;
use crate::rate_limiter::RateLimiter;
use crate::saver::RetryingSaver;
use crate::status::StatusBoard;
use crate::submission::{SubmissionGate, SubmitOutcome};
use crate::types::{EvaluationId, FieldKey, FieldStatus, Notice, SubmitControl};
use crate::validator::{is_blank, validate};
use crate::view::MatrixView;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Evaluation ID not found")]
    MissingEvaluationId,
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(#[from] InvalidConfig),
}

/// What happens to a settled value: validation, then either an immediate
/// save or a place in the queue.
struct SavePipeline {
    limiter: Arc<RateLimiter>,
    queue: SaveQueue,
    dispatcher: SaveDispatcher,
    status: Arc<StatusBoard>,
    view: Arc<dyn MatrixView>,
}

impl SettleHandler for SavePipeline {
    fn settled(&self, key: FieldKey, raw: String) {
        if is_blank(&raw) {
            self.drop_waiting_saves(&key);
            self.status.set(&key, FieldStatus::Idle);
            return;
        }

        let score = match validate(&raw) {
            Ok(score) => score,
            Err(error) => {
                tracing::debug!(key = %key, raw = %raw, "invalid score: {error}");
                counter!(VALIDATION_REJECTED, "reason" => error.reason()).increment(1);
                self.drop_waiting_saves(&key);
                self.status.set(&key, FieldStatus::Invalid);
                self.view.notice(Notice::Inline {
                    key,
                    message: error.to_string(),
                    visible_for: None,
                });
                return;
            }
        };

        self.status.set(&key, FieldStatus::Pending);

        // A field already waiting in the queue keeps its place; jumping past
        // it would let the older queued score land after this one.
        if self.queue.contains(&key) {
            self.queue.enqueue(key, score);
            return;
        }

        if self.limiter.try_admit(&key) {
            drop(self.dispatcher.dispatch(key, score));
        } else {
            self.queue.enqueue(key, score);
        }
    }
}

impl SavePipeline {
    /// A cleared or invalid value retires whatever older score is still
    /// waiting for this field. A save already on the wire is left to finish.
    fn drop_waiting_saves(&self, key: &FieldKey) {
        let queued = self.queue.remove(key).is_some();
        let parked = self.dispatcher.cancel_parked(key);
        if queued || parked {
            tracing::debug!(key = %key, queued, parked, "discarded waiting save");
        }
    }
}

/// Sync state for one mounted evaluation matrix.
///
/// Everything lives on the instance: two sessions never share timers, rate
/// windows or queues. Dropping the session tears it down.
pub struct EvaluationSession {
    evaluation_id: EvaluationId,
    debounce: Arc<DebounceCoalescer>,
    pipeline: Arc<SavePipeline>,
    gate: SubmissionGate,
}

impl EvaluationSession {
    pub fn mount(
        evaluation_id: EvaluationId,
        config: &SyncConfig,
        backend: Arc<dyn ScoreBackend>,
        view: Arc<dyn MatrixView>,
    ) -> Result<Self, SessionError> {
        if evaluation_id == 0 {
            return Err(SessionError::MissingEvaluationId);
        }
        config.validate()?;

        let status = Arc::new(StatusBoard::new(view.clone()));
        let saver = RetryingSaver::new(
            evaluation_id,
            config,
            backend.clone(),
            status.clone(),
            view.clone(),
        );
        let dispatcher = SaveDispatcher::new(Arc::new(saver));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let queue = SaveQueue::new(limiter.clone(), dispatcher.clone(), config.queue_poll());

        let pipeline = Arc::new(SavePipeline {
            limiter,
            queue: queue.clone(),
            dispatcher: dispatcher.clone(),
            status: status.clone(),
            view: view.clone(),
        });
        let debounce = Arc::new(DebounceCoalescer::new(
            config.debounce(),
            pipeline.clone(),
        ));

        let gate = SubmissionGate::new(
            evaluation_id,
            config.submit.clone(),
            backend,
            view,
            status,
            debounce.clone(),
            queue,
            dispatcher,
        );

        tracing::info!(evaluation_id, "evaluation session mounted");

        Ok(EvaluationSession {
            evaluation_id,
            debounce,
            pipeline,
            gate,
        })
    }

    pub fn evaluation_id(&self) -> EvaluationId {
        self.evaluation_id
    }

    /// Feeds one edit of a score field into the pipeline.
    pub fn on_change(&self, key: FieldKey, raw: impl Into<String>) {
        self.debounce.on_change(key, raw);
    }

    pub async fn submit(&self) -> SubmitOutcome {
        self.gate.submit().await
    }

    pub fn status(&self, key: &FieldKey) -> FieldStatus {
        self.pipeline.status.status(key)
    }

    pub fn submit_control(&self) -> SubmitControl {
        self.gate.control()
    }

    pub fn is_settled(&self) -> bool {
        self.gate.is_settled()
    }

    pub fn queued(&self) -> usize {
        self.pipeline.queue.len()
    }

    pub fn saving(&self) -> usize {
        self.pipeline.dispatcher.in_flight()
    }

    /// Cancels timers, the queue worker and any scheduled submit re-check.
    /// Saves already sent to the backend run to completion.
    pub fn shutdown(&self) {
        self.debounce.shutdown();
        self.pipeline.queue.shutdown();
        self.gate.shutdown();
    }
}

impl Drop for EvaluationSession {
    fn drop(&mut self) {
        self.shutdown();
        tracing::debug!(evaluation_id = self.evaluation_id, "evaluation session dropped");
    }
}

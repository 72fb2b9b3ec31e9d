use crate::backend::{BackendError, ScoreBackend};
use crate::config::{RetryConfig, SyncConfig};
use crate::metrics_defs::{SAVE_ATTEMPT, SAVE_DURATION, SAVE_OUTCOME};
use crate::status::StatusBoard;
use crate::types::{EvaluationId, FieldKey, FieldStatus, Notice, Score};
use crate::view::MatrixView;
use crate::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::Instrument;

const SAVE_FAILED_MESSAGE: &str = "Failed to save. Please try again.";

/// Final result of one save run, retries included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { attempts: u32 },
    Failed { attempts: u32, error: BackendError },
    /// A newer score for the same field replaced this one before it was sent.
    Superseded,
}

struct SaveAttempt {
    number: u32,
    key: FieldKey,
    score: Score,
}

/// Sends one score to the backend, retrying failed calls with exponential
/// backoff. Retries never go back through the rate limiter.
pub struct RetryingSaver {
    evaluation_id: EvaluationId,
    backend: Arc<dyn ScoreBackend>,
    status: Arc<StatusBoard>,
    view: Arc<dyn MatrixView>,
    retry: RetryConfig,
    success_display: Duration,
    error_notice: Duration,
}

impl RetryingSaver {
    pub fn new(
        evaluation_id: EvaluationId,
        config: &SyncConfig,
        backend: Arc<dyn ScoreBackend>,
        status: Arc<StatusBoard>,
        view: Arc<dyn MatrixView>,
    ) -> Self {
        RetryingSaver {
            evaluation_id,
            backend,
            status,
            view,
            retry: config.retry.clone(),
            success_display: config.success_display(),
            error_notice: config.error_notice(),
        }
    }

    pub async fn save(&self, key: FieldKey, score: Score) -> SaveOutcome {
        let span = tracing::info_span!("save", key = %key, score = %score);
        let attempt = SaveAttempt {
            number: 0,
            key,
            score,
        };
        self.run(attempt).instrument(span).await
    }

    async fn run(&self, mut attempt: SaveAttempt) -> SaveOutcome {
        let started = Instant::now();
        let saving = self.status.set(&attempt.key, FieldStatus::Saving);

        let outcome = loop {
            attempt.number += 1;

            let result = self
                .backend
                .save_score(self.evaluation_id, attempt.key, attempt.score)
                .await;

            match result {
                Ok(()) => {
                    counter!(SAVE_ATTEMPT, "result" => "ok").increment(1);
                    tracing::info!(attempt = attempt.number, "score saved");
                    let shown = self.status.flash_success_if_current(
                        &attempt.key,
                        saving,
                        self.success_display,
                    );
                    if !shown {
                        tracing::debug!("field changed while saving, leaving its status");
                    }
                    break SaveOutcome::Saved {
                        attempts: attempt.number,
                    };
                }
                Err(error) => {
                    counter!(SAVE_ATTEMPT, "result" => "error").increment(1);

                    if attempt.number < self.retry.max_attempts {
                        let delay = self.retry.backoff(attempt.number);
                        tracing::warn!(
                            attempt = attempt.number,
                            delay_ms = delay.as_millis() as u64,
                            "save failed, retrying: {error}"
                        );
                        sleep(delay).await;
                        continue;
                    }

                    tracing::error!(
                        attempts = attempt.number,
                        "failed to save score after {} attempts: {error}",
                        attempt.number
                    );
                    if self.status.set_if_current(&attempt.key, saving, FieldStatus::Error) {
                        self.view.notice(Notice::Inline {
                            key: attempt.key,
                            message: SAVE_FAILED_MESSAGE.to_string(),
                            visible_for: Some(self.error_notice),
                        });
                    }
                    break SaveOutcome::Failed {
                        attempts: attempt.number,
                        error,
                    };
                }
            }
        };

        let label = match outcome {
            SaveOutcome::Saved { .. } => "saved",
            SaveOutcome::Failed { .. } => "failed",
            SaveOutcome::Superseded => "superseded",
        };
        counter!(SAVE_OUTCOME, "outcome" => label).increment(1);
        histogram!(SAVE_DURATION).record(started.elapsed().as_secs_f64());

        outcome
    }
}

use crate::backend::{BackendError, ScoreBackend};
use crate::config::SubmitConfig;
use crate::counter;
use crate::debounce::DebounceCoalescer;
use crate::dispatcher::SaveDispatcher;
use crate::metrics_defs::SUBMIT_OUTCOME;
use crate::queue::SaveQueue;
use crate::status::StatusBoard;
use crate::types::{EvaluationId, FieldKey, FieldStatus, Notice, SubmitControl};
use crate::validator::{ValidationError, is_blank, validate};
use crate::view::MatrixView;
use parking_lot::Mutex;
use std::fmt::Write;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const WAIT_FOR_SAVES: &str = "Please wait for all scores to be saved before submitting...";
const GAVE_UP_WAITING: &str =
    "Scores are still being saved. Please submit again once saving has finished.";
const CONFIRM_SUBMIT: &str = "Are you sure you want to submit this evaluation? \
                              You will not be able to modify it afterwards.";
const SUBMITTED: &str = "Evaluation submitted successfully!";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Error submitting evaluation: {0}")]
    Backend(#[from] BackendError),
    #[error("Error submitting evaluation: no response within {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldProblem {
    pub key: FieldKey,
    pub error: ValidationError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The evaluation was submitted and the view reloaded.
    Submitted,
    /// Saves are still pending. Another check runs after `recheck_in`.
    Busy { recheck_in: Duration },
    /// Saves are still pending and no automatic re-check is left.
    GaveUp,
    /// Some rendered fields hold invalid scores, in encounter order.
    Invalid(Vec<FieldProblem>),
    /// The user did not confirm.
    Declined,
    Failed(SubmitError),
    /// A submission is already in flight or done.
    Ignored,
    /// The session was torn down before anything was sent.
    Cancelled,
}

impl SubmitOutcome {
    fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Submitted => "submitted",
            SubmitOutcome::Busy { .. } => "busy",
            SubmitOutcome::GaveUp => "gave_up",
            SubmitOutcome::Invalid(_) => "invalid",
            SubmitOutcome::Declined => "declined",
            SubmitOutcome::Failed(_) => "failed",
            SubmitOutcome::Ignored => "ignored",
            SubmitOutcome::Cancelled => "cancelled",
        }
    }
}

type BoxedOutcome = Pin<Box<dyn Future<Output = SubmitOutcome> + Send>>;

struct GateInner {
    evaluation_id: EvaluationId,
    config: SubmitConfig,
    backend: Arc<dyn ScoreBackend>,
    view: Arc<dyn MatrixView>,
    status: Arc<StatusBoard>,
    debounce: Arc<DebounceCoalescer>,
    queue: SaveQueue,
    dispatcher: SaveDispatcher,
    control: Mutex<SubmitControl>,
    recheck: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Holds the terminal submit back until every save has drained and every
/// rendered field validates.
#[derive(Clone)]
pub struct SubmissionGate {
    inner: Arc<GateInner>,
}

impl SubmissionGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        evaluation_id: EvaluationId,
        config: SubmitConfig,
        backend: Arc<dyn ScoreBackend>,
        view: Arc<dyn MatrixView>,
        status: Arc<StatusBoard>,
        debounce: Arc<DebounceCoalescer>,
        queue: SaveQueue,
        dispatcher: SaveDispatcher,
    ) -> Self {
        SubmissionGate {
            inner: Arc::new(GateInner {
                evaluation_id,
                config,
                backend,
                view,
                status,
                debounce,
                queue,
                dispatcher,
                control: Mutex::new(SubmitControl::Ready),
                recheck: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// User-triggered submit. Replaces any scheduled re-check and starts a
    /// fresh re-check budget.
    pub async fn submit(&self) -> SubmitOutcome {
        self.cancel_recheck();
        self.clone().attempt(0).await
    }

    pub fn control(&self) -> SubmitControl {
        self.inner.control.lock().clone()
    }

    /// No unsettled edit, no queued save and no running save.
    pub fn is_settled(&self) -> bool {
        let inner = &self.inner;
        inner.debounce.is_idle() && inner.queue.is_idle() && inner.dispatcher.is_idle()
    }

    #[cfg(test)]
    pub(crate) fn recheck_pending(&self) -> bool {
        self.inner.recheck.lock().is_some()
    }

    /// Cancels any scheduled re-check. An attempt that is already past its
    /// re-check, for example waiting on the confirmation, stops before it
    /// reaches the backend.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_recheck();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn cancel_recheck(&self) {
        if let Some(handle) = self.inner.recheck.lock().take() {
            handle.abort();
        }
    }

    // Boxed so the re-check task can hold a submit attempt of its own.
    fn attempt(self, rechecks: u32) -> BoxedOutcome {
        Box::pin(async move {
            let outcome = self.run(rechecks).await;
            counter!(SUBMIT_OUTCOME, "outcome" => outcome.label()).increment(1);
            outcome
        })
    }

    async fn run(&self, rechecks: u32) -> SubmitOutcome {
        let inner = &self.inner;

        if self.is_closed() {
            return SubmitOutcome::Cancelled;
        }

        if !inner.control.lock().accepts_submit() {
            tracing::debug!("submit ignored, submission already in flight or done");
            return SubmitOutcome::Ignored;
        }

        if !self.is_settled() {
            return self.abort_busy(rechecks);
        }

        let problems = self.validate_rendered();
        if let Some(first) = problems.first() {
            tracing::info!(invalid = problems.len(), "submit blocked by invalid scores");
            inner.view.notice(Notice::Alert {
                message: invalid_scores_message(&problems),
            });
            inner.view.focus(&first.key);
            return SubmitOutcome::Invalid(problems);
        }

        if !inner.view.confirm(CONFIRM_SUBMIT).await {
            tracing::debug!("submit declined");
            return SubmitOutcome::Declined;
        }

        if self.is_closed() {
            tracing::debug!("session closed while confirming, submit dropped");
            return SubmitOutcome::Cancelled;
        }

        {
            let mut control = inner.control.lock();
            if !control.accepts_submit() {
                return SubmitOutcome::Ignored;
            }
            *control = SubmitControl::InFlight;
        }
        inner.view.submit_control(&SubmitControl::InFlight);

        tracing::info!(evaluation_id = inner.evaluation_id, "submitting evaluation");
        let timeout = inner.config.timeout();
        let result = tokio::time::timeout(
            timeout,
            inner.backend.submit_evaluation(inner.evaluation_id),
        )
        .await;

        let error = match result {
            Ok(Ok(())) => {
                self.set_control(SubmitControl::Reloaded);
                inner.view.notice(Notice::Alert {
                    message: SUBMITTED.to_string(),
                });
                inner.view.reload();
                tracing::info!(evaluation_id = inner.evaluation_id, "evaluation submitted");
                return SubmitOutcome::Submitted;
            }
            Ok(Err(e)) => SubmitError::Backend(e),
            Err(_) => SubmitError::Timeout(timeout),
        };

        tracing::error!(evaluation_id = inner.evaluation_id, "submit failed: {error}");
        let message = error.to_string();
        inner.view.notice(Notice::Alert {
            message: message.clone(),
        });
        self.set_control(SubmitControl::ReadyWithError(message));
        SubmitOutcome::Failed(error)
    }

    fn abort_busy(&self, rechecks: u32) -> SubmitOutcome {
        let inner = &self.inner;

        if rechecks >= inner.config.max_rechecks {
            tracing::warn!(rechecks, "saves still pending, giving up on automatic submit");
            inner.view.notice(Notice::Alert {
                message: GAVE_UP_WAITING.to_string(),
            });
            return SubmitOutcome::GaveUp;
        }

        inner.view.notice(Notice::Alert {
            message: WAIT_FOR_SAVES.to_string(),
        });

        let delay = inner.config.recheck_delay();
        let gate = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own handle first so a busy result can schedule the next one.
            gate.inner.recheck.lock().take();
            let outcome = gate.clone().attempt(rechecks + 1).await;
            tracing::debug!(?outcome, "submit re-check finished");
        });

        if let Some(previous) = inner.recheck.lock().replace(handle) {
            previous.abort();
        }

        tracing::info!(
            queued = inner.queue.len(),
            saving = inner.dispatcher.in_flight(),
            unsettled = inner.debounce.pending(),
            "submit postponed, saves pending"
        );
        SubmitOutcome::Busy { recheck_in: delay }
    }

    fn validate_rendered(&self) -> Vec<FieldProblem> {
        let inner = &self.inner;
        let mut problems = Vec::new();

        for (key, raw) in inner.view.rendered_values() {
            if is_blank(&raw) {
                continue;
            }
            match validate(&raw) {
                Ok(_) => {
                    if inner.status.status(&key) == FieldStatus::Invalid {
                        inner.status.set(&key, FieldStatus::Idle);
                    }
                }
                Err(error) => {
                    inner.status.set(&key, FieldStatus::Invalid);
                    problems.push(FieldProblem { key, error });
                }
            }
        }

        problems
    }

    fn set_control(&self, state: SubmitControl) {
        *self.inner.control.lock() = state.clone();
        self.inner.view.submit_control(&state);
    }
}

fn invalid_scores_message(problems: &[FieldProblem]) -> String {
    let mut message = String::from("Please fix the following errors before submitting:\n\n");
    for (i, problem) in problems.iter().enumerate() {
        let _ = writeln!(message, "{}. {}: {}", i + 1, problem.key, problem.error);
    }
    message.push_str("\nAll scores must be whole numbers between 1 and 5.");
    message
}

use crate::backend::{BackendError, ScoreBackend};
use crate::types::{EvaluationId, FieldKey, FieldStatus, Notice, Score, SubmitControl};
use crate::view::MatrixView;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub struct SaveCall {
    pub key: FieldKey,
    pub score: u8,
    pub at: Instant,
}

/// Backend double that answers from a script and records every call.
/// Once a script runs dry every call succeeds.
#[derive(Default)]
pub struct ScriptedBackend {
    save_script: Mutex<VecDeque<Result<(), BackendError>>>,
    save_calls: Mutex<Vec<SaveCall>>,
    save_delay: Mutex<Option<Duration>>,
    submit_script: Mutex<VecDeque<Result<(), BackendError>>>,
    submit_delay: Mutex<Option<Duration>>,
    submit_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn fail_saves(&self, times: usize) {
        let mut script = self.save_script.lock();
        for _ in 0..times {
            script.push_back(Err(BackendError::Status(503)));
        }
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = Some(delay);
    }

    pub fn script_submit(&self, result: Result<(), BackendError>) {
        self.submit_script.lock().push_back(result);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = Some(delay);
    }

    pub fn save_calls(&self) -> Vec<SaveCall> {
        self.save_calls.lock().clone()
    }

    pub fn saved_scores(&self) -> Vec<(FieldKey, u8)> {
        self.save_calls
            .lock()
            .iter()
            .map(|c| (c.key, c.score))
            .collect()
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreBackend for ScriptedBackend {
    async fn save_score(
        &self,
        _evaluation_id: EvaluationId,
        key: FieldKey,
        score: Score,
    ) -> Result<(), BackendError> {
        self.save_calls.lock().push(SaveCall {
            key,
            score: score.get(),
            at: Instant::now(),
        });

        let delay = *self.save_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.save_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn submit_evaluation(&self, _evaluation_id: EvaluationId) -> Result<(), BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.submit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.submit_script.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// View double that records everything the pipeline shows.
pub struct RecordingView {
    values: Mutex<IndexMap<FieldKey, String>>,
    statuses: Mutex<Vec<(FieldKey, FieldStatus)>>,
    notices: Mutex<Vec<Notice>>,
    focused: Mutex<Vec<FieldKey>>,
    submit_states: Mutex<Vec<SubmitControl>>,
    confirm_answer: AtomicBool,
    confirm_delay: Mutex<Option<Duration>>,
    confirmations: AtomicUsize,
    reloads: AtomicUsize,
}

impl Default for RecordingView {
    fn default() -> Self {
        RecordingView {
            values: Mutex::new(IndexMap::new()),
            statuses: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            focused: Mutex::new(Vec::new()),
            submit_states: Mutex::new(Vec::new()),
            confirm_answer: AtomicBool::new(true),
            confirm_delay: Mutex::new(None),
            confirmations: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
        }
    }
}

impl RecordingView {
    pub fn set_value(&self, key: FieldKey, raw: &str) {
        self.values.lock().insert(key, raw.to_string());
    }

    /// Makes the user take `delay` to answer each confirmation.
    pub fn set_confirm_delay(&self, delay: Duration) {
        *self.confirm_delay.lock() = Some(delay);
    }

    pub fn answer_confirm(&self, answer: bool) {
        self.confirm_answer.store(answer, Ordering::SeqCst);
    }

    pub fn statuses_for(&self, key: &FieldKey) -> Vec<FieldStatus> {
        self.statuses
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notice::Alert { message } => Some(message.clone()),
                Notice::Inline { .. } => None,
            })
            .collect()
    }

    pub fn focused(&self) -> Vec<FieldKey> {
        self.focused.lock().clone()
    }

    pub fn submit_states(&self) -> Vec<SubmitControl> {
        self.submit_states.lock().clone()
    }

    pub fn confirmations(&self) -> usize {
        self.confirmations.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatrixView for RecordingView {
    fn rendered_values(&self) -> Vec<(FieldKey, String)> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    fn field_status(&self, key: &FieldKey, status: FieldStatus) {
        self.statuses.lock().push((*key, status));
    }

    fn notice(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }

    fn focus(&self, key: &FieldKey) {
        self.focused.lock().push(*key);
    }

    async fn confirm(&self, _prompt: &str) -> bool {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.confirm_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.confirm_answer.load(Ordering::SeqCst)
    }

    fn submit_control(&self, state: &SubmitControl) {
        self.submit_states.lock().push(state.clone());
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn score(value: u8) -> Score {
    Score::new_unchecked(value)
}

use crate::types::{FieldKey, FieldStatus};
use crate::view::MatrixView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Default)]
struct Tracked {
    status: FieldStatus,
    // Bumped on every transition so delayed reverts can tell whether they
    // are still looking at the transition that scheduled them.
    epoch: u64,
}

/// Owner of the per-field display status.
pub struct StatusBoard {
    view: Arc<dyn MatrixView>,
    fields: Mutex<HashMap<FieldKey, Tracked>>,
}

impl StatusBoard {
    pub fn new(view: Arc<dyn MatrixView>) -> Self {
        StatusBoard {
            view,
            fields: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self, key: &FieldKey) -> FieldStatus {
        self.fields
            .lock()
            .get(key)
            .map(|t| t.status)
            .unwrap_or_default()
    }

    /// Moves the field to `status`. Returns the transition's epoch, which
    /// later guarded updates compare against.
    pub fn set(&self, key: &FieldKey, status: FieldStatus) -> u64 {
        self.transition(key, status)
    }

    /// Like [`StatusBoard::set`], but only while the field is still at
    /// `epoch`. A save that finishes after the user moved on must not paint
    /// over the newer state.
    pub fn set_if_current(&self, key: &FieldKey, epoch: u64, status: FieldStatus) -> bool {
        self.transition_if(key, Some(epoch), status).is_some()
    }

    /// Shows `success`, then goes back to `idle` after `hold` unless the field
    /// moved on in the meantime. Skipped entirely when the field already left
    /// `epoch`.
    pub fn flash_success_if_current(
        self: &Arc<Self>,
        key: &FieldKey,
        epoch: u64,
        hold: Duration,
    ) -> bool {
        let Some(epoch) = self.transition_if(key, Some(epoch), FieldStatus::Success) else {
            return false;
        };
        self.schedule_revert(key, epoch, hold);
        true
    }

    fn schedule_revert(self: &Arc<Self>, key: &FieldKey, epoch: u64, hold: Duration) {
        let board = Arc::clone(self);
        let key = *key;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            board.transition_if(&key, Some(epoch), FieldStatus::Idle);
        });
    }

    fn transition(&self, key: &FieldKey, status: FieldStatus) -> u64 {
        self.transition_if(key, None, status).unwrap_or_default()
    }

    fn transition_if(
        &self,
        key: &FieldKey,
        expected: Option<u64>,
        status: FieldStatus,
    ) -> Option<u64> {
        let epoch = {
            let mut fields = self.fields.lock();
            let tracked = fields.entry(*key).or_default();
            if expected.is_some_and(|epoch| epoch != tracked.epoch) {
                return None;
            }
            tracked.status = status;
            tracked.epoch += 1;
            tracked.epoch
        };

        tracing::trace!(key = %key, status = %status, "field status");
        self.view.field_status(key, status);
        Some(epoch)
    }
}

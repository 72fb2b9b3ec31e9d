use crate::counter;
use crate::metrics_defs::DEBOUNCE_FIRED;
use crate::types::FieldKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receives a field's value once edits to it have settled.
pub trait SettleHandler: Send + Sync {
    fn settled(&self, key: FieldKey, raw: String);
}

struct PendingChange {
    raw: String,
    observed_at: Instant,
    // Identifies the timer that was scheduled for this change.
    seq: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    pending: HashMap<FieldKey, PendingChange>,
    next_seq: u64,
}

/// Collapses bursts of edits per field into a single late-firing value.
///
/// Every edit replaces the stored change for its field and restarts that
/// field's timer, so only the last value of a burst reaches the handler.
pub struct DebounceCoalescer {
    quiet: Duration,
    state: Arc<Mutex<DebounceState>>,
    handler: Arc<dyn SettleHandler>,
}

impl DebounceCoalescer {
    pub fn new(quiet: Duration, handler: Arc<dyn SettleHandler>) -> Self {
        DebounceCoalescer {
            quiet,
            state: Arc::new(Mutex::new(DebounceState::default())),
            handler,
        }
    }

    pub fn on_change(&self, key: FieldKey, raw: impl Into<String>) {
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;

        if let Some(previous) = state.pending.remove(&key) {
            previous.timer.abort();
        }

        let timer = tokio::spawn(fire_after(
            self.quiet,
            self.state.clone(),
            self.handler.clone(),
            key,
            seq,
        ));

        state.pending.insert(
            key,
            PendingChange {
                raw: raw.into(),
                observed_at: Instant::now(),
                seq,
                timer,
            },
        );
    }

    /// True when no field has an unsettled change.
    pub fn is_idle(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Cancels every timer. Unsettled changes are dropped.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for (_, change) in state.pending.drain() {
            change.timer.abort();
        }
    }
}

async fn fire_after(
    quiet: Duration,
    state: Arc<Mutex<DebounceState>>,
    handler: Arc<dyn SettleHandler>,
    key: FieldKey,
    seq: u64,
) {
    tokio::time::sleep(quiet).await;

    let change = {
        let mut state = state.lock();
        // Act on what is stored now, not on what was stored when this timer
        // was scheduled. `abort` cannot stop a timer that already woke on
        // another worker thread, so a newer edit can still race it here.
        let current = state.pending.get(&key).is_some_and(|c| c.seq == seq);
        if current {
            state.pending.remove(&key)
        } else {
            None
        }
    };

    let Some(change) = change else {
        tracing::trace!(key = %key, "stale debounce timer");
        return;
    };

    tracing::debug!(
        key = %key,
        settled_after_ms = change.observed_at.elapsed().as_millis() as u64,
        "change settled"
    );
    counter!(DEBOUNCE_FIRED).increment(1);
    handler.settled(key, change.raw);
}

use crate::saver::{RetryingSaver, SaveOutcome};
use crate::types::{FieldKey, Score};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Handle to a dispatched save. Dropping it does not cancel the save.
#[derive(Debug)]
pub struct SaveHandle {
    key: FieldKey,
    rx: oneshot::Receiver<SaveOutcome>,
}

impl SaveHandle {
    pub fn key(&self) -> FieldKey {
        self.key
    }

    /// Waits for the save to finish. `None` if the save task went away
    /// without reporting.
    pub async fn outcome(self) -> Option<SaveOutcome> {
        self.rx.await.ok()
    }
}

struct Deferred {
    score: Score,
    tx: oneshot::Sender<SaveOutcome>,
}

// One entry per field with a running save. The slot holds the save to run
// once the current one resolves.
type InFlight = HashMap<FieldKey, Option<Deferred>>;

/// Launches saves as tasks, keeping at most one running save per field.
///
/// A save for a field that already has one running is parked until the running
/// one resolves. Only the newest parked score is kept; a replaced one resolves
/// as [`SaveOutcome::Superseded`] without reaching the backend.
#[derive(Clone)]
pub struct SaveDispatcher {
    saver: Arc<RetryingSaver>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl SaveDispatcher {
    pub fn new(saver: Arc<RetryingSaver>) -> Self {
        SaveDispatcher {
            saver,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dispatch(&self, key: FieldKey, score: Score) -> SaveHandle {
        let (tx, rx) = oneshot::channel();

        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(&key) {
            Some(slot) => {
                tracing::debug!(key = %key, score = %score, "save parked behind running save");
                if let Some(replaced) = slot.replace(Deferred { score, tx }) {
                    let _ = replaced.tx.send(SaveOutcome::Superseded);
                }
            }
            None => {
                in_flight.insert(key, None);
                let saver = self.saver.clone();
                let registry = self.in_flight.clone();
                tokio::spawn(drive(saver, registry, key, Deferred { score, tx }));
            }
        }

        SaveHandle { key, rx }
    }

    /// Resolves the save parked for `key` as superseded without running it.
    /// A save that is already running is left alone.
    pub fn cancel_parked(&self, key: &FieldKey) -> bool {
        let parked = self
            .in_flight
            .lock()
            .get_mut(key)
            .and_then(Option::take);

        match parked {
            Some(deferred) => {
                tracing::debug!(key = %key, score = %deferred.score, "parked save cancelled");
                let _ = deferred.tx.send(SaveOutcome::Superseded);
                true
            }
            None => false,
        }
    }

    /// Number of fields with a running save.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

async fn drive(
    saver: Arc<RetryingSaver>,
    registry: Arc<Mutex<InFlight>>,
    key: FieldKey,
    first: Deferred,
) {
    let mut next = Some(first);

    while let Some(Deferred { score, tx }) = next {
        let outcome = saver.save(key, score).await;
        let _ = tx.send(outcome);

        let mut in_flight = registry.lock();
        let deferred = in_flight.get_mut(&key).and_then(Option::take);
        next = match deferred {
            Some(deferred) => Some(deferred),
            None => {
                in_flight.remove(&key);
                None
            }
        };
    }
}

use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub type EvaluationId = u64;

/// Identifies one scoreable cell of the evaluation matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub question_id: u64,
    pub vendor_id: u64,
}

impl FieldKey {
    pub fn new(question_id: u64, vendor_id: u64) -> Self {
        FieldKey {
            question_id,
            vendor_id,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.question_id, self.vendor_id)
    }
}

/// A score that passed validation. Only the validator can construct one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub(crate) fn new_unchecked(value: u8) -> Self {
        debug_assert!((Self::MIN..=Self::MAX).contains(&value));
        Score(value)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display state of a single field. Exactly one holds per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FieldStatus {
    #[default]
    Idle,
    Invalid,
    Pending,
    Saving,
    Success,
    Error,
}

impl FieldStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Idle => "idle",
            FieldStatus::Invalid => "invalid",
            FieldStatus::Pending => "pending",
            FieldStatus::Saving => "saving",
            FieldStatus::Success => "success",
            FieldStatus::Error => "error",
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible message surfaced by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Shown next to a field. `visible_for` is `None` when the message stays
    /// until the field is edited again.
    Inline {
        key: FieldKey,
        message: String,
        visible_for: Option<Duration>,
    },
    /// Blocking alert for the whole matrix.
    Alert { message: String },
}

/// State of the submit control.
///
/// `Ready -> InFlight -> (Reloaded | ReadyWithError)`; `ReadyWithError` accepts
/// a new submit just like `Ready`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SubmitControl {
    #[default]
    Ready,
    InFlight,
    Reloaded,
    ReadyWithError(String),
}

impl SubmitControl {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitControl::InFlight => "Submitting...",
            SubmitControl::Reloaded => "Submitted",
            SubmitControl::Ready | SubmitControl::ReadyWithError(_) => "Submit Evaluation",
        }
    }

    pub fn accepts_submit(&self) -> bool {
        matches!(self, SubmitControl::Ready | SubmitControl::ReadyWithError(_))
    }
}

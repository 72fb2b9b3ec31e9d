use crate::types::{EvaluationId, FieldKey, Score};
use async_trait::async_trait;

/// Failure of a single remote call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("server error: {0}")]
    Server(String),
    #[error("{0}")]
    Rejected(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// The remote evaluation service.
///
/// `save_score` is assumed idempotent for a given key and score, so callers may
/// retry it. `submit_evaluation` is not, and must be called at most once per
/// user confirmation.
#[async_trait]
pub trait ScoreBackend: Send + Sync {
    async fn save_score(
        &self,
        evaluation_id: EvaluationId,
        key: FieldKey,
        score: Score,
    ) -> Result<(), BackendError>;

    async fn submit_evaluation(&self, evaluation_id: EvaluationId) -> Result<(), BackendError>;
}

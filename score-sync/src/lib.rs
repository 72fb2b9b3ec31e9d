//! Client-side sync for a score matrix.
//!
//! Edits to score fields are debounced per field, validated, rate limited,
//! queued when over the limit and saved with retries. A submission gate holds
//! the final submit back until every field has settled.
//!
//! [`EvaluationSession`] wires the pieces together for one evaluation; the
//! individual stages are public so they can be driven on their own.

pub mod backend;
pub mod client;
pub mod config;
pub mod debounce;
pub mod dispatcher;
pub mod metrics_defs;
pub mod queue;
pub mod rate_limiter;
pub mod saver;
pub mod session;
pub mod status;
pub mod submission;
pub mod types;
pub mod validator;
pub mod view;

#[cfg(test)]
mod testutils;

pub use backend::{BackendError, ScoreBackend};
pub use client::JsonRpcClient;
pub use config::{BackendConfig, InvalidConfig, SyncConfig};
pub use session::{EvaluationSession, SessionError};
pub use submission::{SubmitError, SubmitOutcome};
pub use types::{EvaluationId, FieldKey, FieldStatus, Notice, Score, SubmitControl};
pub use view::MatrixView;

use crate::types::{FieldKey, FieldStatus, Notice, SubmitControl};
use async_trait::async_trait;

/// The host UI bound to one evaluation matrix.
///
/// The pipeline never renders anything itself. Everything a user can observe
/// goes through this trait, so a browser widget, a terminal front-end and the
/// test doubles all plug in the same way.
#[async_trait]
pub trait MatrixView: Send + Sync {
    /// Current raw value of every rendered score field, in encounter order.
    fn rendered_values(&self) -> Vec<(FieldKey, String)>;

    fn field_status(&self, key: &FieldKey, status: FieldStatus);

    fn notice(&self, notice: Notice);

    fn focus(&self, key: &FieldKey);

    /// Blocking yes/no question; `false` aborts the action that asked.
    async fn confirm(&self, prompt: &str) -> bool;

    fn submit_control(&self, state: &SubmitControl);

    /// Refresh the whole view after a successful submission.
    fn reload(&self);
}

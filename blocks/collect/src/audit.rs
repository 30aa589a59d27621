use collect_shared::AuditEvent;

use crate::context::CollectService;
use crate::error::CollectResult;

pub const TARGET_TASK: &str = "collect_task";
pub const TARGET_SUBMISSION: &str = "collect_submission";

impl CollectService {
    /// Record the outcome of one operation. Sink failures are logged and
    /// never replace the operation's own result.
    pub(crate) async fn audit<T, F>(
        &self,
        actor_id: &str,
        verb: &str,
        target_type: &str,
        target_id: &str,
        result: &CollectResult<T>,
        diff: F,
    ) where
        F: FnOnce(&T) -> serde_json::Value,
    {
        let action = format!("{}.{}", self.module, verb);
        let event = match result {
            Ok(value) => AuditEvent::success(actor_id, &action, target_type, target_id, diff(value)),
            Err(err) => AuditEvent::failure(actor_id, &action, target_type, target_id, err.code()),
        };
        if let Err(e) = self.deps.audit.record(&event).await {
            tracing::warn!("Dropping audit record {} on {}: {}", action, target_id, e);
        }
    }
}

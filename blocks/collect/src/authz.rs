//! Permission and ownership checks shared by every console operation.

use collect_atoms::tasks::CollectionTask;

use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};

pub const PERM_CREATE: &str = "create";
pub const PERM_UPDATE: &str = "update";
pub const PERM_PUBLISH: &str = "publish";
pub const PERM_CLOSE: &str = "close";
pub const PERM_ARCHIVE: &str = "archive";
pub const PERM_DELETE: &str = "delete";
pub const PERM_PROCESS: &str = "process";
pub const PERM_EXPORT: &str = "export";
/// Lifts the creator-only restriction on every task of the module.
pub const PERM_MANAGE_ALL: &str = "manage_all";

impl CollectService {
    pub(crate) fn perm_code(&self, action: &str) -> String {
        format!("{}:{}", self.module, action)
    }

    pub(crate) async fn has_perm(&self, actor_id: &str, action: &str) -> CollectResult<bool> {
        Ok(self.deps.perms.has_perm(actor_id, &self.perm_code(action)).await?)
    }

    pub(crate) async fn require_perm(&self, actor_id: &str, action: &str) -> CollectResult<()> {
        if self.has_perm(actor_id, action).await? {
            Ok(())
        } else {
            Err(CollectError::Forbidden(format!(
                "Missing permission {}",
                self.perm_code(action)
            )))
        }
    }

    /// Creator or manage-all holder.
    pub(crate) async fn can_manage(&self, actor_id: &str, task: &CollectionTask) -> CollectResult<bool> {
        if task.created_by == actor_id {
            return Ok(true);
        }
        self.has_perm(actor_id, PERM_MANAGE_ALL).await
    }

    pub(crate) async fn ensure_owner(&self, actor_id: &str, task: &CollectionTask) -> CollectResult<()> {
        if self.can_manage(actor_id, task).await? {
            Ok(())
        } else {
            Err(CollectError::Forbidden(
                "Only the task creator or a manager may do this".to_string(),
            ))
        }
    }

    /// Live (not soft-deleted) task of this module.
    pub(crate) async fn load_live_task(&self, task_id: &str) -> CollectResult<CollectionTask> {
        match self.deps.tasks.get_task(task_id).await? {
            Some(task) if !task.is_deleted() && task.module == self.module => Ok(task),
            _ => Err(CollectError::task_not_found()),
        }
    }

    /// Permission, then existence, then ownership.
    pub(crate) async fn load_owned_task(
        &self,
        actor_id: &str,
        action: &str,
        task_id: &str,
    ) -> CollectResult<CollectionTask> {
        self.require_perm(actor_id, action).await?;
        let task = self.load_live_task(task_id).await?;
        self.ensure_owner(actor_id, &task).await?;
        Ok(task)
    }
}

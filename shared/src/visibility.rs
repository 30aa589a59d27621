use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use collect_atoms::attrs::get_s;
use collect_atoms::tasks::ScopeType;
use collect_atoms::users::{Department, UserDirectory, UserProfile};
use collect_atoms::{dynamo, keys, StoreResult};

use crate::notices::NoticeDirectory;

/// Student-side visibility. Console operations never consult this.
#[async_trait]
pub trait VisibilityResolver: Send + Sync {
    /// Ids of tasks whose scopes match one of the user's memberships.
    /// Tasks with `visible_all` or a source binding are decided elsewhere.
    async fn resolve_visible_task_ids(&self, user_id: &str) -> StoreResult<HashSet<String>>;

    async fn can_view_notice(&self, user_id: &str, notice_id: &str) -> StoreResult<bool>;
}

/// Every `(scope_type, ref_id)` a user belongs to. Department membership also
/// counts for each ancestor department.
pub fn memberships(profile: &UserProfile, departments: &[Department]) -> HashSet<(ScopeType, String)> {
    let parents: HashMap<&str, &str> = departments
        .iter()
        .filter_map(|d| d.parent_id.as_deref().map(|p| (d.department_id.as_str(), p)))
        .collect();

    let mut out = HashSet::new();
    for role in &profile.role_ids {
        out.insert((ScopeType::Role, role.clone()));
    }
    for position in &profile.position_ids {
        out.insert((ScopeType::Position, position.clone()));
    }
    for dept in &profile.department_ids {
        let mut current = dept.as_str();
        while out.insert((ScopeType::Department, current.to_string())) {
            match parents.get(current) {
                Some(&parent) => current = parent,
                None => break,
            }
        }
    }
    out
}

pub struct DynamoVisibilityResolver {
    client: DynamoClient,
    table_name: String,
    users: Arc<dyn UserDirectory>,
    notices: Arc<dyn NoticeDirectory>,
}

impl DynamoVisibilityResolver {
    pub fn new(
        client: DynamoClient,
        table_name: impl Into<String>,
        users: Arc<dyn UserDirectory>,
        notices: Arc<dyn NoticeDirectory>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            users,
            notices,
        }
    }

    async fn user_memberships(&self, user_id: &str) -> StoreResult<HashSet<(ScopeType, String)>> {
        let Some(profile) = self.users.get_profile(user_id).await? else {
            return Ok(HashSet::new());
        };
        let departments = self.users.list_departments().await?;
        Ok(memberships(&profile, &departments))
    }
}

#[async_trait]
impl VisibilityResolver for DynamoVisibilityResolver {
    async fn resolve_visible_task_ids(&self, user_id: &str) -> StoreResult<HashSet<String>> {
        let mut ids = HashSet::new();
        for (scope_type, ref_id) in self.user_memberships(user_id).await? {
            let rows = dynamo::query_prefix(
                &self.client,
                &self.table_name,
                &keys::scope_partition(scope_type.as_str(), &ref_id),
                "TASK#",
            )
            .await?;
            ids.extend(rows.iter().filter_map(|row| get_s(row, "task_id")));
        }
        Ok(ids)
    }

    async fn can_view_notice(&self, user_id: &str, notice_id: &str) -> StoreResult<bool> {
        let notice = match self.notices.get_notice(notice_id).await? {
            Some(n) if n.deleted_at.is_none() => n,
            _ => return Ok(false),
        };
        if notice.visible_all {
            return Ok(true);
        }
        let member_keys: HashSet<String> = self
            .user_memberships(user_id)
            .await?
            .into_iter()
            .map(|(kind, ref_id)| format!("{}#{}", kind.as_str(), ref_id))
            .collect();
        Ok(notice.scope_keys.iter().any(|k| member_keys.contains(k)))
    }
}

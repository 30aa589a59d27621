use async_trait::async_trait;
use std::collections::HashMap;

use super::model::{Department, UserProfile};
use crate::error::StoreResult;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;

    /// Profiles keyed by user id. Unknown users are simply absent.
    async fn get_profiles(&self, user_ids: &[String]) -> StoreResult<HashMap<String, UserProfile>>;

    async fn list_departments(&self) -> StoreResult<Vec<Department>>;
}

use async_trait::async_trait;
use aws_sdk_dynamodb::types::KeysAndAttributes;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

use super::model::{Department, UserProfile};
use super::store::UserDirectory;
use crate::attrs::{self, get_s, get_s_or_default, get_ss, require_s, Item};
use crate::dynamo;
use crate::error::{StoreError, StoreResult};
use crate::keys;

/// BatchGetItem accepts at most this many keys per request.
const BATCH_GET_LIMIT: usize = 100;

#[derive(Clone)]
pub struct DynamoUserDirectory {
    client: DynamoClient,
    table_name: String,
}

impl DynamoUserDirectory {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for DynamoUserDirectory {
    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        let row = dynamo::get_row(
            &self.client,
            &self.table_name,
            &keys::user_partition(user_id),
            keys::PROFILE_SK,
        )
        .await?;
        row.map(|item| item_to_profile(&item)).transpose()
    }

    async fn get_profiles(&self, user_ids: &[String]) -> StoreResult<HashMap<String, UserProfile>> {
        let mut profiles = HashMap::new();
        let mut unique: Vec<&String> = user_ids.iter().collect();
        unique.sort();
        unique.dedup();

        for chunk in unique.chunks(BATCH_GET_LIMIT) {
            let request_keys: Vec<Item> = chunk
                .iter()
                .map(|id| attrs::key(keys::user_partition(id), keys::PROFILE_SK))
                .collect();
            let mut pending = Some(
                KeysAndAttributes::builder()
                    .set_keys(Some(request_keys))
                    .build()
                    .map_err(|e| StoreError::backend("build KeysAndAttributes", e))?,
            );

            let mut attempts = 0;
            while let Some(request) = pending.take() {
                attempts += 1;
                let result = self
                    .client
                    .batch_get_item()
                    .request_items(&self.table_name, request)
                    .send()
                    .await
                    .map_err(|e| StoreError::backend("DynamoDB batch_get_item", e.into_service_error()))?;

                if let Some(rows) = result.responses().and_then(|r| r.get(&self.table_name)) {
                    for row in rows {
                        let profile = item_to_profile(row)?;
                        profiles.insert(profile.user_id.clone(), profile);
                    }
                }

                pending = result
                    .unprocessed_keys()
                    .and_then(|m| m.get(&self.table_name))
                    .cloned();
                if pending.is_some() {
                    if attempts >= 5 {
                        return Err(StoreError::Backend(
                            "batch_get_item left unprocessed keys after retries".to_string(),
                        ));
                    }
                    sleep(Duration::from_millis(100 * attempts)).await;
                }
            }
        }
        Ok(profiles)
    }

    async fn list_departments(&self) -> StoreResult<Vec<Department>> {
        let rows = dynamo::query_prefix(&self.client, &self.table_name, keys::DEPT_PK, "DEPT#").await?;
        rows.iter().map(item_to_department).collect()
    }
}

fn item_to_profile(item: &Item) -> StoreResult<UserProfile> {
    let pk = require_s(item, "PK")?;
    let user_id = pk
        .strip_prefix("USER#")
        .ok_or_else(|| StoreError::Decode(format!("unexpected user key {}", pk)))?
        .to_string();
    Ok(UserProfile {
        user_id,
        student_no: get_s_or_default(item, "student_no"),
        user_name: get_s_or_default(item, "user_name"),
        department_ids: get_ss(item, "department_ids"),
        role_ids: get_ss(item, "role_ids"),
        position_ids: get_ss(item, "position_ids"),
    })
}

fn item_to_department(item: &Item) -> StoreResult<Department> {
    let sk = require_s(item, "SK")?;
    let department_id = sk
        .strip_prefix("DEPT#")
        .ok_or_else(|| StoreError::Decode(format!("unexpected department key {}", sk)))?
        .to_string();
    Ok(Department {
        department_id,
        name: get_s_or_default(item, "name"),
        parent_id: get_s(item, "parent_id"),
    })
}

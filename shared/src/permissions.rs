use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;

use collect_atoms::{dynamo, keys, StoreResult};

/// Answers `hasPerm(user, "<module>:<action>")`.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn has_perm(&self, user_id: &str, code: &str) -> StoreResult<bool>;
}

/// Grants are rows `USER#<id> / PERM#<code>`.
pub struct DynamoPermissionOracle {
    client: DynamoClient,
    table_name: String,
}

impl DynamoPermissionOracle {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl PermissionOracle for DynamoPermissionOracle {
    async fn has_perm(&self, user_id: &str, code: &str) -> StoreResult<bool> {
        let row = dynamo::get_row(
            &self.client,
            &self.table_name,
            &keys::user_partition(user_id),
            &keys::perm_sk(code),
        )
        .await?;
        Ok(row.is_some())
    }
}

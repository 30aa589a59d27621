use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};

use collect_atoms::attrs::{get_bool, get_s, get_ss, get_time, Item};
use collect_atoms::{dynamo, keys, StoreResult};

/// The slice of a notice the collection workflow cares about: whether it is
/// live and who may see it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub notice_id: String,
    pub title: String,
    pub visible_all: bool,
    /// `"<scope_type>#<ref_id>"` entries, e.g. `department#d1`.
    pub scope_keys: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait NoticeDirectory: Send + Sync {
    async fn get_notice(&self, notice_id: &str) -> StoreResult<Option<Notice>>;

    /// True for an existing notice that has not been soft-deleted.
    async fn notice_exists(&self, notice_id: &str) -> StoreResult<bool> {
        Ok(self
            .get_notice(notice_id)
            .await?
            .map(|n| n.deleted_at.is_none())
            .unwrap_or(false))
    }
}

pub struct DynamoNoticeDirectory {
    client: DynamoClient,
    table_name: String,
}

impl DynamoNoticeDirectory {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl NoticeDirectory for DynamoNoticeDirectory {
    async fn get_notice(&self, notice_id: &str) -> StoreResult<Option<Notice>> {
        let row = dynamo::get_row(
            &self.client,
            &self.table_name,
            keys::NOTICE_PK,
            &keys::notice_sk(notice_id),
        )
        .await?;
        Ok(row.map(|item| item_to_notice(notice_id, &item)))
    }
}

fn item_to_notice(notice_id: &str, item: &Item) -> Notice {
    Notice {
        notice_id: notice_id.to_string(),
        title: get_s(item, "title").unwrap_or_default(),
        visible_all: get_bool(item, "visible_all"),
        scope_keys: get_ss(item, "scope_keys"),
        deleted_at: get_time(item, "deleted_at"),
    }
}

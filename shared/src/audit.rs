use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use collect_atoms::attrs::{self, s, Item};
use collect_atoms::{dynamo, keys, StoreResult};

/// One record per state-changing call. Failures carry `reason` (an error
/// code) instead of `diff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub success: bool,
    pub diff: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn success(
        actor_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        diff: serde_json::Value,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            success: true,
            diff: Some(diff),
            reason: None,
            at: Utc::now(),
        }
    }

    pub fn failure(
        actor_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        reason: &str,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            success: false,
            diff: None,
            reason: Some(reason.to_string()),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()>;
}

/// Rows `AUDIT#<type>#<id> / AT#<rfc3339>#<uuid>`, so one target's history
/// reads back in time order.
pub struct DynamoAuditSink {
    client: DynamoClient,
    table_name: String,
}

impl DynamoAuditSink {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl AuditSink for DynamoAuditSink {
    async fn record(&self, event: &AuditEvent) -> StoreResult<()> {
        dynamo::put_row(&self.client, &self.table_name, event_to_item(event)).await
    }
}

fn event_to_item(event: &AuditEvent) -> Item {
    let sk = format!(
        "AT#{}#{}",
        event.at.to_rfc3339_opts(SecondsFormat::Millis, true),
        uuid::Uuid::new_v4()
    );
    let mut item = attrs::key(keys::audit_partition(&event.target_type, &event.target_id), sk);
    item.insert("actor_id".to_string(), s(&event.actor_id));
    item.insert("action".to_string(), s(&event.action));
    item.insert("success".to_string(), aws_sdk_dynamodb::types::AttributeValue::Bool(event.success));
    item.insert("at".to_string(), attrs::time(&event.at));
    attrs::put_opt(
        &mut item,
        "diff",
        event.diff.as_ref().map(|d| s(d.to_string())),
    );
    attrs::put_opt(&mut item, "reason", event.reason.as_ref().map(s));
    item
}

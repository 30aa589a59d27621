//! Query and transaction plumbing over the single DynamoDB table.

use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{Delete, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client as DynamoClient;

use crate::attrs::{key, s, Item};
use crate::error::{StoreError, StoreResult};

/// DynamoDB rejects transactions with more than this many actions.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Query every row of `pk` whose SK starts with `sk_prefix`, following pagination.
pub async fn query_prefix(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk_prefix: &str,
) -> StoreResult<Vec<Item>> {
    let mut rows = Vec::new();
    let mut start_key: Option<Item> = None;
    loop {
        let result = client
            .query()
            .table_name(table_name)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", s(pk))
            .expression_attribute_values(":sk_prefix", s(sk_prefix))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB query", e.into_service_error()))?;

        rows.extend(result.items().iter().cloned());

        match result.last_evaluated_key() {
            Some(last) if !last.is_empty() => start_key = Some(last.clone()),
            _ => break,
        }
    }
    Ok(rows)
}

pub async fn get_row(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk: &str,
) -> StoreResult<Option<Item>> {
    let result = client
        .get_item()
        .table_name(table_name)
        .set_key(Some(key(pk, sk)))
        .send()
        .await
        .map_err(|e| StoreError::backend("DynamoDB get_item", e.into_service_error()))?;
    Ok(result.item().cloned())
}

pub async fn put_row(client: &DynamoClient, table_name: &str, item: Item) -> StoreResult<()> {
    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(item))
        .send()
        .await
        .map_err(|e| StoreError::backend("DynamoDB put_item", e.into_service_error()))?;
    Ok(())
}

pub fn put_action(table_name: &str, item: Item) -> StoreResult<TransactWriteItem> {
    let put = Put::builder()
        .table_name(table_name)
        .set_item(Some(item))
        .build()
        .map_err(|e| StoreError::backend("build Put", e))?;
    Ok(TransactWriteItem::builder().put(put).build())
}

/// Put that fails the whole transaction when the row already exists.
pub fn put_new_action(table_name: &str, item: Item) -> StoreResult<TransactWriteItem> {
    let put = Put::builder()
        .table_name(table_name)
        .set_item(Some(item))
        .condition_expression("attribute_not_exists(PK)")
        .build()
        .map_err(|e| StoreError::backend("build Put", e))?;
    Ok(TransactWriteItem::builder().put(put).build())
}

pub fn delete_action(table_name: &str, pk: &str, sk: &str) -> StoreResult<TransactWriteItem> {
    let delete = Delete::builder()
        .table_name(table_name)
        .set_key(Some(key(pk, sk)))
        .build()
        .map_err(|e| StoreError::backend("build Delete", e))?;
    Ok(TransactWriteItem::builder().delete(delete).build())
}

pub fn update_action(
    table_name: &str,
    pk: &str,
    sk: &str,
    update_expression: &str,
    names: &[(&str, &str)],
    values: Item,
) -> StoreResult<TransactWriteItem> {
    let mut builder = Update::builder()
        .table_name(table_name)
        .set_key(Some(key(pk, sk)))
        .update_expression(update_expression)
        .condition_expression("attribute_exists(PK)");
    for (k, v) in names {
        builder = builder.expression_attribute_names(*k, *v);
    }
    if !values.is_empty() {
        builder = builder.set_expression_attribute_values(Some(values));
    }
    let update = builder
        .build()
        .map_err(|e| StoreError::backend("build Update", e))?;
    Ok(TransactWriteItem::builder().update(update).build())
}

/// Fails when `count` actions cannot commit as one transaction.
pub fn ensure_atomic(count: usize) -> StoreResult<()> {
    if count > MAX_TRANSACT_ITEMS {
        return Err(StoreError::TooLarge(format!(
            "{} writes exceed the limit of {} per transaction",
            count, MAX_TRANSACT_ITEMS
        )));
    }
    Ok(())
}

/// Runs `actions` as a single all-or-nothing transaction. Never chunks.
pub async fn transact_atomic(client: &DynamoClient, actions: Vec<TransactWriteItem>) -> StoreResult<()> {
    ensure_atomic(actions.len())?;
    transact(client, actions).await
}

/// Runs `actions` as DynamoDB transactions of at most 100 actions each, in order.
///
/// Callers put the authoritative row last so a failure in an early chunk
/// never publishes a half-written state.
pub async fn transact(client: &DynamoClient, actions: Vec<TransactWriteItem>) -> StoreResult<()> {
    for chunk in actions.chunks(MAX_TRANSACT_ITEMS) {
        if let Err(err) = client
            .transact_write_items()
            .set_transact_items(Some(chunk.to_vec()))
            .send()
            .await
        {
            let service_err = err.into_service_error();
            if let TransactWriteItemsError::TransactionCanceledException(cancel) = &service_err {
                let lost_condition = cancel
                    .cancellation_reasons()
                    .iter()
                    .any(|r| r.code() == Some("ConditionalCheckFailed"));
                if lost_condition {
                    return Err(StoreError::Conflict(
                        "a conditional write was rejected".to_string(),
                    ));
                }
            }
            tracing::error!("DynamoDB transact_write_items failed: {:?}", service_err);
            return Err(StoreError::backend("DynamoDB transact_write_items", service_err));
        }
    }
    Ok(())
}

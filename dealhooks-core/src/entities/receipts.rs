//! Receipt records and their database operations.
//!
//! A receipt is the durable trace of one inbound notification, keyed by
//! `(source, reference)`. The gateway creates it, the worker moves its
//! status, nothing deletes it here (retention is an external concern).

use crate::entities::ReceiptStatus;
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Receipt {
    pub id: Uuid,
    pub source: CompactString,
    pub event: CompactString,
    pub reference: CompactString,
    /// Header snapshot of the inbound request.
    pub headers: serde_json::Value,
    /// Body snapshot of the inbound request.
    pub body: serde_json::Value,
    /// Query-parameter snapshot of the inbound request.
    pub params: serde_json::Value,
    pub status: ReceiptStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: time::OffsetDateTime,
}

/// Data for inserting (or refreshing) a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptInsert {
    pub source: CompactString,
    pub event: CompactString,
    pub reference: CompactString,
    pub headers: serde_json::Value,
    pub body: serde_json::Value,
    pub params: serde_json::Value,
}

/// Result of an upsert: the row as stored, plus whether it was newly created.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpsertedReceipt {
    #[sqlx(flatten)]
    pub receipt: Receipt,
    pub created: bool,
}

#[derive(Debug, Clone)]
/// Insert a receipt for `(source, reference)`, or refresh the payload
/// snapshot of the existing row.
///
/// The conflict arm deliberately leaves `status` alone: a late duplicate
/// delivery must not regress a `processed` or `failed` receipt.
pub struct UpsertReceipt {
    pub insert: ReceiptInsert,
}

impl Processor<UpsertReceipt> for DatabaseProcessor {
    type Output = UpsertedReceipt;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertReceipt")]
    async fn process(&self, cmd: UpsertReceipt) -> Result<UpsertedReceipt, sqlx::Error> {
        let UpsertReceipt { insert } = cmd;
        sqlx::query_as::<_, UpsertedReceipt>(
            r#"
            INSERT INTO receipts (id, source, event, reference, headers, body, params, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            ON CONFLICT (source, reference) DO UPDATE
            SET event = EXCLUDED.event,
                headers = EXCLUDED.headers,
                body = EXCLUDED.body,
                params = EXCLUDED.params,
                updated_at = now()
            RETURNING id, source, event, reference, headers, body, params,
                      status, created_at, updated_at,
                      (xmax = 0) AS created
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(insert.source.as_str())
        .bind(insert.event.as_str())
        .bind(insert.reference.as_str())
        .bind(insert.headers)
        .bind(insert.body)
        .bind(insert.params)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Atomic identity-keyed status transition.
///
/// Returns the number of rows updated (0 if the receipt vanished, which
/// callers treat as a soft miss rather than an error).
pub struct SetReceiptStatus {
    pub source: CompactString,
    pub reference: CompactString,
    pub status: ReceiptStatus,
}

impl Processor<SetReceiptStatus> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SetReceiptStatus")]
    async fn process(&self, cmd: SetReceiptStatus) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE receipts
            SET status = $3, updated_at = now()
            WHERE source = $1 AND reference = $2
            "#,
        )
        .bind(cmd.source.as_str())
        .bind(cmd.reference.as_str())
        .bind(cmd.status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Fetch one receipt by its identity pair.
pub struct GetReceiptByKey {
    pub source: CompactString,
    pub reference: CompactString,
}

impl Processor<GetReceiptByKey> for DatabaseProcessor {
    type Output = Option<Receipt>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetReceiptByKey")]
    async fn process(&self, query: GetReceiptByKey) -> Result<Option<Receipt>, sqlx::Error> {
        sqlx::query_as::<_, Receipt>(
            r#"
            SELECT id, source, event, reference, headers, body, params,
                   status, created_at, updated_at
            FROM receipts
            WHERE source = $1 AND reference = $2
            "#,
        )
        .bind(query.source.as_str())
        .bind(query.reference.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}

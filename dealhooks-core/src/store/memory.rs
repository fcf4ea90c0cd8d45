//! In-memory receipt store for tests and local development.

use crate::entities::ReceiptStatus;
use crate::entities::receipts::{Receipt, ReceiptInsert, UpsertedReceipt};
use crate::store::{ReceiptStore, StoreError};
use async_trait::async_trait;
use compact_str::CompactString;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Map-backed [`ReceiptStore`] with the same upsert semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct MemoryReceiptStore {
    inner: RwLock<HashMap<(CompactString, CompactString), Receipt>>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored receipts.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ReceiptStore for MemoryReceiptStore {
    async fn upsert(&self, insert: ReceiptInsert) -> Result<UpsertedReceipt, StoreError> {
        let mut map = self.inner.write().await;
        let key = (insert.source.clone(), insert.reference.clone());
        let now = time::OffsetDateTime::now_utc();

        if let Some(existing) = map.get_mut(&key) {
            existing.event = insert.event;
            existing.headers = insert.headers;
            existing.body = insert.body;
            existing.params = insert.params;
            existing.updated_at = now;
            return Ok(UpsertedReceipt {
                receipt: existing.clone(),
                created: false,
            });
        }

        let receipt = Receipt {
            id: Uuid::now_v7(),
            source: insert.source,
            event: insert.event,
            reference: insert.reference,
            headers: insert.headers,
            body: insert.body,
            params: insert.params,
            status: ReceiptStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        map.insert(key, receipt.clone());
        Ok(UpsertedReceipt {
            receipt,
            created: true,
        })
    }

    async fn set_status(
        &self,
        source: &str,
        reference: &str,
        status: ReceiptStatus,
    ) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        match map.get_mut(&(source.into(), reference.into())) {
            Some(receipt) => {
                receipt.status = status;
                receipt.updated_at = time::OffsetDateTime::now_utc();
            }
            None => {
                tracing::warn!(source, reference, %status, "status update matched no receipt");
            }
        }
        Ok(())
    }

    async fn get(&self, source: &str, reference: &str) -> Result<Option<Receipt>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(source.into(), reference.into()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(reference: &str) -> ReceiptInsert {
        ReceiptInsert {
            source: "crm".into(),
            event: "created".into(),
            reference: reference.into(),
            headers: json!({}),
            body: json!({"deal": {"reference": reference}}),
            params: json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_upsert_keeps_one_row() {
        let store = MemoryReceiptStore::new();

        let first = store.upsert(insert("D-1")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.receipt.status, ReceiptStatus::Pending);

        let second = store.upsert(insert("D-1")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.receipt.id, first.receipt.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_upsert_does_not_regress_status() {
        let store = MemoryReceiptStore::new();
        store.upsert(insert("D-1")).await.unwrap();
        store
            .set_status("crm", "D-1", ReceiptStatus::Processed)
            .await
            .unwrap();

        let refreshed = store.upsert(insert("D-1")).await.unwrap();
        assert!(!refreshed.created);
        assert_eq!(refreshed.receipt.status, ReceiptStatus::Processed);
    }

    #[tokio::test]
    async fn set_status_transitions() {
        let store = MemoryReceiptStore::new();
        store.upsert(insert("D-2")).await.unwrap();

        store
            .set_status("crm", "D-2", ReceiptStatus::Failed)
            .await
            .unwrap();
        let receipt = store.get("crm", "D-2").await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Failed);
    }
}

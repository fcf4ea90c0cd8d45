//! Postgres-backed receipt store.

use crate::entities::ReceiptStatus;
use crate::entities::receipts::{
    GetReceiptByKey, Receipt, ReceiptInsert, SetReceiptStatus, UpsertReceipt, UpsertedReceipt,
};
use crate::framework::DatabaseProcessor;
use crate::store::{ReceiptStore, StoreError};
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;

/// [`ReceiptStore`] implementation over a Postgres pool.
pub struct PgReceiptStore {
    db: DatabaseProcessor,
}

impl PgReceiptStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }
}

#[async_trait]
impl ReceiptStore for PgReceiptStore {
    async fn upsert(&self, insert: ReceiptInsert) -> Result<UpsertedReceipt, StoreError> {
        Ok(self.db.process(UpsertReceipt { insert }).await?)
    }

    async fn set_status(
        &self,
        source: &str,
        reference: &str,
        status: ReceiptStatus,
    ) -> Result<(), StoreError> {
        let updated = self
            .db
            .process(SetReceiptStatus {
                source: source.into(),
                reference: reference.into(),
                status,
            })
            .await?;
        if updated == 0 {
            tracing::warn!(source, reference, %status, "status update matched no receipt");
        }
        Ok(())
    }

    async fn get(&self, source: &str, reference: &str) -> Result<Option<Receipt>, StoreError> {
        Ok(self
            .db
            .process(GetReceiptByKey {
                source: source.into(),
                reference: reference.into(),
            })
            .await?)
    }
}

//! Receipt persistence behind an injectable seam.
//!
//! The pipeline only ever talks to [`ReceiptStore`]; the process entry
//! point decides whether that is Postgres or the in-memory map used by
//! tests and local development.

pub mod memory;
pub mod postgres;

pub use memory::MemoryReceiptStore;
pub use postgres::PgReceiptStore;

use crate::entities::ReceiptStatus;
use crate::entities::receipts::{Receipt, ReceiptInsert, UpsertedReceipt};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a receipt store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable, idempotent storage of receipts keyed by `(source, reference)`.
#[async_trait]
pub trait ReceiptStore: Send + Sync + 'static {
    /// Insert the receipt on first sighting of `(source, reference)`, or
    /// refresh the payload snapshot of the existing row. Never regresses
    /// the status of an existing receipt.
    async fn upsert(&self, insert: ReceiptInsert) -> Result<UpsertedReceipt, StoreError>;

    /// Atomically move the receipt identified by `(source, reference)`
    /// to `status`.
    async fn set_status(
        &self,
        source: &str,
        reference: &str,
        status: ReceiptStatus,
    ) -> Result<(), StoreError>;

    /// Fetch one receipt by its identity pair.
    async fn get(&self, source: &str, reference: &str) -> Result<Option<Receipt>, StoreError>;
}

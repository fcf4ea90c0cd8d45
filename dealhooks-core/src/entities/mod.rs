pub mod receipts;

use serde::{Deserialize, Serialize};

/// Processing status of a receipt.
///
/// Created `Pending` by the gateway, moved to `Processed` or `Failed` by
/// the worker that executed the job derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "receipt_status")]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Processed,
    Failed,
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptStatus::Pending => write!(f, "pending"),
            ReceiptStatus::Processed => write!(f, "processed"),
            ReceiptStatus::Failed => write!(f, "failed"),
        }
    }
}

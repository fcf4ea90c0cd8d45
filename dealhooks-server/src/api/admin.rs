//! Admin API handlers.
//!
//! Inspection endpoints for operators, authenticated with the
//! `X-Admin-Authorization` header (see [`crate::api::extractors::AdminAuth`]).
//!
//! # Endpoints
//!
//! - `GET /receipts/{source}/{reference}` – look up one receipt
//! - `GET /queue`                         – dispatch queue snapshot,
//!   including retained completed and dead-lettered jobs

use axum::{Json, Router, extract::Path, http::StatusCode, response::IntoResponse, routing::get};
use dealhooks_core::entities::receipts::Receipt;
use dealhooks_core::queue::JobRecord;
use dealhooks_core::store::StoreError;
use serde::Serialize;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

/// Build the Admin API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/receipts/{source}/{reference}", get(get_receipt))
        .route("/queue", get(queue_snapshot))
}

/// `GET /receipts/{source}/{reference}` — look up one receipt.
async fn get_receipt(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
    Path((source, reference)): Path<(String, String)>,
) -> Result<Json<Receipt>, AdminApiError> {
    let receipt = state
        .store
        .get(&source, &reference)
        .await
        .map_err(AdminApiError::Store)?
        .ok_or(AdminApiError::NotFound)?;
    Ok(Json(receipt))
}

/// Snapshot of the dispatch queue for inspection.
#[derive(Serialize)]
struct QueueSnapshot {
    /// Jobs that still have work ahead of them.
    depth: usize,
    jobs: Vec<JobRecord>,
}

/// `GET /queue` — dispatch queue snapshot.
///
/// Dead-lettered jobs stay visible here until history eviction; this is
/// the inspection surface for exhausted work.
async fn queue_snapshot(
    state: axum::extract::State<AppState>,
    _auth: AdminAuth,
) -> impl IntoResponse {
    Json(QueueSnapshot {
        depth: state.queue.depth(),
        jobs: state.queue.snapshot(),
    })
}

/// Errors that can occur in Admin API handlers.
#[derive(Debug)]
enum AdminApiError {
    Store(StoreError),
    NotFound,
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AdminApiError::Store(e) => {
                tracing::error!(error = %e, "Admin API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            AdminApiError::NotFound => {
                (StatusCode::NOT_FOUND, "receipt not found").into_response()
            }
        }
    }
}

//! Custom Axum extractors for request authentication.
//!
//! Provides `AdminAuth`, which verifies the `X-Admin-Authorization`
//! header against the argon2 hash of the admin secret. Webhook-source
//! authentication is a soft-fail path and lives in the gateway handler
//! instead (a failed check must yield a 2xx, not a rejection).

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Header carrying the plaintext admin secret.
pub const ADMIN_AUTH_HEADER: &str = "x-admin-authorization";

/// An Axum extractor that authenticates admin endpoints.
pub struct AdminAuth;

/// Errors returned by the [`AdminAuth`] extractor.
#[derive(Debug)]
pub enum AdminAuthError {
    MissingHeader,
    InvalidSecret,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminAuthError::MissingHeader => (
                StatusCode::UNAUTHORIZED,
                "missing X-Admin-Authorization header",
            ),
            AdminAuthError::InvalidSecret => {
                (StatusCode::UNAUTHORIZED, "admin authentication failed")
            }
        };
        (status, message).into_response()
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(ADMIN_AUTH_HEADER)
            .ok_or(AdminAuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AdminAuthError::InvalidSecret)?;

        let config = state.config.read().await;
        if config.admin.verify(secret) {
            Ok(AdminAuth)
        } else {
            Err(AdminAuthError::InvalidSecret)
        }
    }
}

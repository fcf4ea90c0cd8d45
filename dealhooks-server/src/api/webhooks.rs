//! Gateway: the synchronous webhook ingestion endpoint.
//!
//! `POST /hooks/{source}` authenticates the sender, runs the source's
//! provider, upserts the receipt, and enqueues work. The caller-visible
//! contract is deliberately coarse:
//!
//! - `200` — notification durably recorded (processing outcome not
//!   reflected)
//! - `202` — accepted but intentionally not processed (failed shared
//!   secret or source-specific validation); no retry signal for
//!   unauthenticated callers, no retry cascade for misconfigured ones
//! - `400` — event/reference missing or body unparseable; nothing
//!   persisted
//! - `404` — unknown source

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use compact_str::CompactString;
use dealhooks_core::entities::ReceiptStatus;
use dealhooks_core::entities::receipts::ReceiptInsert;
use dealhooks_core::providers::InboundEnvelope;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error};

use crate::state::AppState;

/// Header carrying the source's shared secret.
pub const TOKEN_HEADER: &str = "x-webhook-token";

/// Build the gateway router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{source}", post(receive))
}

/// Acknowledgment body for 200/202 responses.
#[derive(Serialize)]
struct Ack {
    status: &'static str,
}

fn recorded() -> Response {
    (StatusCode::OK, Json(Ack { status: "recorded" })).into_response()
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Json(Ack { status: "accepted" })).into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

fn envelope_headers(headers: &HeaderMap) -> BTreeMap<CompactString, CompactString> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (CompactString::from(name.as_str()), CompactString::from(v)))
        })
        .collect()
}

/// `POST /hooks/{source}` — receive one webhook delivery.
async fn receive(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = state.registry.get(&source) else {
        return (StatusCode::NOT_FOUND, "unknown source").into_response();
    };

    // Shared-secret check. Failure is a soft path: 2xx, nothing persisted,
    // nothing logged as an error.
    let authorized = {
        let config = state.config.read().await;
        match (config.source_secret(&source), headers.get(TOKEN_HEADER)) {
            (Some(secret), Some(value)) => value
                .to_str()
                .map(|token| constant_time_eq(token.as_bytes(), secret.as_bytes()))
                .unwrap_or(false),
            _ => false,
        }
    };
    if !authorized {
        debug!(source, "webhook delivery with bad or missing credential");
        return accepted();
    }

    let Ok(body_json) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed JSON body").into_response();
    };

    let envelope = InboundEnvelope {
        headers: envelope_headers(&headers),
        params,
        body: body_json,
    };

    if !provider.validate(&envelope) {
        debug!(source, "delivery failed source validation");
        return accepted();
    }

    // Event and reference are the identity keys downstream; their absence
    // is a hard client error and nothing is persisted.
    let event = match provider.extract_event(&envelope) {
        Ok(event) => event,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let reference = match provider.extract_reference(&envelope) {
        Ok(reference) => reference,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let upserted = match state
        .store
        .upsert(ReceiptInsert {
            source: CompactString::from(source.as_str()),
            event,
            reference: reference.clone(),
            headers: envelope.headers_json(),
            body: envelope.body.clone(),
            params: envelope.params_json(),
        })
        .await
    {
        Ok(upserted) => upserted,
        Err(e) => {
            error!(source, reference = %reference, error = %e, "failed to persist receipt");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };
    if !upserted.created {
        debug!(
            source,
            reference = %reference,
            status = %upserted.receipt.status,
            "duplicate delivery for existing receipt"
        );
    }

    // `handle` is the only side-effecting provider hook. Errors are
    // contained here: the receipt exists, so the sender still gets a 200.
    if let Err(e) = provider.handle(&upserted.receipt, &state.queue).await {
        error!(source, reference = %reference, error = %e, "provider handle failed");
        if let Err(store_err) = state
            .store
            .set_status(&source, &reference, ReceiptStatus::Failed)
            .await
        {
            error!(source, reference = %reference, error = %store_err, "failed to mark receipt");
        }
    }

    recorded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime::{AdminConfig, RuntimeConfig, SourceConfig};
    use crate::server::build_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use dealhooks_core::processors::dispatchers::{DispatchError, Dispatcher, DispatcherSet};
    use dealhooks_core::processors::event_processor::EventProcessor;
    use dealhooks_core::providers::{CrmDealProvider, ProviderRegistry};
    use dealhooks_core::queue::{DispatchQueue, JobPayload, RetryPolicy, WorkerPool};
    use dealhooks_core::store::{MemoryReceiptStore, ReceiptStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::watch;
    use tower::ServiceExt;

    const SECRET: &str = "hook-secret";

    struct Recording {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn dispatch(&self, _job: &JobPayload) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DispatchError::Rejected {
                    status: 500,
                    body: "down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn test_state() -> (AppState, Arc<MemoryReceiptStore>, Arc<DispatchQueue>) {
        let store = Arc::new(MemoryReceiptStore::new());
        let queue = Arc::new(DispatchQueue::new(RetryPolicy::default()));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CrmDealProvider::new()));

        let config = RuntimeConfig {
            admin: AdminConfig::new("$argon2id$not-a-real-hash".to_string()),
            sources: [(
                "crm".to_string(),
                SourceConfig {
                    secret: SECRET.to_string(),
                },
            )]
            .into(),
        };

        let state = AppState::new(
            store.clone(),
            queue.clone(),
            Arc::new(registry),
            config,
        );
        (state, store, queue)
    }

    fn delivery(source: &str, token: Option<&str>, event: Option<&str>, body: &serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/hooks/{source}"))
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("x-webhook-token", token);
        }
        if let Some(event) = event {
            builder = builder.header("x-webhook-event", event);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn deal_body(reference: &str, status: &str) -> serde_json::Value {
        json!({
            "deal": {
                "reference": reference,
                "status": status,
                "value": 125000,
                "contact": {"name": "Ada", "email": "ada@example.com"}
            }
        })
    }

    #[tokio::test]
    async fn valid_delivery_is_recorded() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery(
                "crm",
                Some(SECRET),
                Some("created"),
                &deal_body("D-1", "Qualified"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt = store.get("crm", "D-1").await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        assert_eq!(receipt.event, "created");
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_keeps_one_receipt_and_one_job() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(delivery(
                    "crm",
                    Some(SECRET),
                    Some("created"),
                    &deal_body("D-1", "Qualified"),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(store.len().await, 1);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn distinct_status_transitions_make_independent_jobs() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        app.clone()
            .oneshot(delivery(
                "crm",
                Some(SECRET),
                Some("created"),
                &deal_body("D-1", "Qualified"),
            ))
            .await
            .unwrap();
        app.oneshot(delivery(
            "crm",
            Some(SECRET),
            Some("updated"),
            &deal_body("D-1", "Committed"),
        ))
        .await
        .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn bad_credential_is_accepted_but_inert() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery(
                "crm",
                Some("wrong-secret"),
                Some("created"),
                &deal_body("D-1", "Qualified"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(store.is_empty().await);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_accepted_but_inert() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery("crm", None, Some("created"), &deal_body("D-1", "Qualified")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(store.is_empty().await);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn missing_reference_is_a_client_error() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery(
                "crm",
                Some(SECRET),
                Some("created"),
                &json!({"deal": {"status": "Qualified"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty().await);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn missing_event_header_is_a_client_error() {
        let (state, store, _queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery("crm", Some(SECRET), None, &deal_body("D-1", "Qualified")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let (state, store, _queue) = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/hooks/crm")
            .header("x-webhook-token", SECRET)
            .header("x-webhook-event", "created")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_source_is_rejected_at_the_registry() {
        let (state, store, _queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery(
                "billing",
                Some(SECRET),
                Some("created"),
                &deal_body("D-1", "Qualified"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn non_deal_body_is_accepted_but_inert() {
        let (state, store, queue) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(delivery(
                "crm",
                Some(SECRET),
                Some("created"),
                &json!({"contact": {"id": 7}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(store.is_empty().await);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn committed_deal_flows_through_to_both_dispatchers() {
        let (state, store, queue) = test_state();

        let conversion = Arc::new(Recording {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let notification = Arc::new(Recording {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let processor = Arc::new(EventProcessor::new(
            store.clone() as Arc<dyn ReceiptStore>,
            DispatcherSet {
                conversion: conversion.clone(),
                notification: notification.clone(),
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::spawn(queue.clone(), processor, 2, shutdown_rx);

        let app = build_router(state);
        let response = app
            .oneshot(delivery(
                "crm",
                Some(SECRET),
                Some("updated"),
                &deal_body("D-1", "Committed"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        while queue.depth() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // One failing dispatcher does not block the other, and the job
        // still ends processed.
        assert_eq!(conversion.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notification.calls.load(Ordering::SeqCst), 1);
        let receipt = store.get("crm", "D-1").await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Processed);

        let _ = shutdown_tx.send(true);
        pool.join().await;
    }
}

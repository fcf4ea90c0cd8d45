//! Provider for the CRM deal feed.
//!
//! The CRM posts one JSON notification per deal change:
//!
//! ```json
//! {
//!   "deal": {
//!     "reference": "D-1",
//!     "status": "Qualified",
//!     "value": 125000,
//!     "contact": { "name": "Ada", "email": "ada@example.com" }
//!   }
//! }
//! ```
//!
//! The event tag (`created`, `updated`, ...) travels in the
//! `X-Webhook-Event` header; the business-state snapshot is the deal
//! status at the moment the notification is enqueued.

use crate::entities::receipts::Receipt;
use crate::providers::{ExtractError, HandleError, InboundEnvelope, Provider};
use crate::queue::{DispatchQueue, EnqueueOutcome, JobKey, JobPayload};
use async_trait::async_trait;
use compact_str::CompactString;
use tracing::debug;

/// Header carrying the event tag.
pub const EVENT_HEADER: &str = "x-webhook-event";

/// Snapshot value used when the body carries no deal status.
const NO_STATUS: &str = "none";

pub struct CrmDealProvider;

impl CrmDealProvider {
    pub fn new() -> Self {
        Self
    }

    /// Deal status as carried in the body, if any.
    fn deal_status(body: &serde_json::Value) -> Option<&str> {
        body.get("deal")?.get("status")?.as_str()
    }

    /// Business-state snapshot for the job key. Computed once at enqueue
    /// time; the worker never re-derives it.
    fn snapshot(body: &serde_json::Value) -> CompactString {
        Self::deal_status(body).unwrap_or(NO_STATUS).into()
    }
}

impl Default for CrmDealProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for CrmDealProvider {
    fn source(&self) -> &'static str {
        "crm"
    }

    fn validate(&self, envelope: &InboundEnvelope) -> bool {
        envelope
            .body
            .get("deal")
            .is_some_and(serde_json::Value::is_object)
    }

    fn extract_event(&self, envelope: &InboundEnvelope) -> Result<CompactString, ExtractError> {
        envelope
            .header(EVENT_HEADER)
            .filter(|v| !v.is_empty())
            .map(CompactString::from)
            .ok_or(ExtractError::MissingEvent)
    }

    fn extract_reference(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<CompactString, ExtractError> {
        envelope
            .body
            .get("deal")
            .and_then(|deal| deal.get("reference"))
            .and_then(serde_json::Value::as_str)
            .filter(|v| !v.is_empty())
            .map(CompactString::from)
            .ok_or(ExtractError::MissingReference)
    }

    async fn handle(
        &self,
        receipt: &Receipt,
        queue: &DispatchQueue,
    ) -> Result<EnqueueOutcome, HandleError> {
        let snapshot = Self::snapshot(&receipt.body);
        let key = JobKey::new(
            receipt.event.clone(),
            receipt.reference.clone(),
            snapshot.clone(),
        );
        let payload = JobPayload {
            source: receipt.source.clone(),
            event: receipt.event.clone(),
            reference: receipt.reference.clone(),
            snapshot,
            body: receipt.body.clone(),
        };

        let outcome = queue.enqueue(key, payload)?;
        debug!(
            source = %receipt.source,
            reference = %receipt.reference,
            event = %receipt.event,
            coalesced = outcome == EnqueueOutcome::Coalesced,
            "deal notification dispatched"
        );
        Ok(outcome)
    }
}

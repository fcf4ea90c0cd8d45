//! Upstream-source adapters.
//!
//! Each source the gateway accepts is represented by a [`Provider`]:
//! a cheap, side-effect-free validation/extraction surface plus one
//! side-effecting `handle` hook that decides enqueue semantics. Sources
//! are resolved through an explicit [`ProviderRegistry`]; an unknown
//! source is rejected before any provider code runs.

pub mod crm;

pub use crm::CrmDealProvider;

use crate::entities::receipts::Receipt;
use crate::queue::{DispatchQueue, EnqueueError, EnqueueOutcome};
use async_trait::async_trait;
use compact_str::CompactString;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// One inbound request, normalized: lowercased header names, query
/// parameters, and the parsed JSON body.
#[derive(Debug, Clone, Default)]
pub struct InboundEnvelope {
    pub headers: BTreeMap<CompactString, CompactString>,
    pub params: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl InboundEnvelope {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(CompactString::as_str)
    }

    /// Header snapshot as JSON, for the receipt row.
    pub fn headers_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.headers
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
        )
    }

    /// Query-parameter snapshot as JSON, for the receipt row.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

/// The dedup/identity keys were absent from the request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("missing event type header")]
    MissingEvent,
    #[error("missing reference identifier")]
    MissingReference,
}

/// Enqueueing the receipt's work failed.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

/// Capability set implemented per upstream source.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Source identifier this provider serves (the `{source}` path segment).
    fn source(&self) -> &'static str;

    /// Source-specific shape check. `false` means "accepted, not
    /// processed" — the caller gets a 2xx and nothing is persisted.
    fn validate(&self, envelope: &InboundEnvelope) -> bool;

    /// Event tag of the notification. Required.
    fn extract_event(&self, envelope: &InboundEnvelope) -> Result<CompactString, ExtractError>;

    /// Stable reference identifier of the notified entity. Required.
    fn extract_reference(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<CompactString, ExtractError>;

    /// Derive the job key from the receipt and enqueue the work. The only
    /// side-effecting hook on this trait.
    async fn handle(
        &self,
        receipt: &Receipt,
        queue: &DispatchQueue,
    ) -> Result<EnqueueOutcome, HandleError>;
}

/// Maps source identifiers to their providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.source(), provider);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(source).cloned()
    }
}

//! Downstream dispatchers.
//!
//! Each integration is one [`Dispatcher`]. Calls return an explicit
//! outcome value; the event processor collects them into a per-job
//! report and never converts one into a job-level failure.

pub mod conversion;
pub mod email;

pub use conversion::ConversionTracker;
pub use email::EmailNotifier;

use crate::queue::JobPayload;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from one dispatcher invocation. Logged, never propagated.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Destination answered with a non-success status
    #[error("dispatch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The forwarded payload lacks a field this destination needs
    #[error("payload is missing {0}")]
    MissingField(&'static str),
}

/// One downstream integration.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Deliver the action derived from this job. Expected to be
    /// idempotent-safe to the extent the destination allows.
    async fn dispatch(&self, job: &JobPayload) -> Result<(), DispatchError>;
}

/// The wired set of destinations the event processor fans out to.
#[derive(Clone)]
pub struct DispatcherSet {
    pub conversion: Arc<dyn Dispatcher>,
    pub notification: Arc<dyn Dispatcher>,
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

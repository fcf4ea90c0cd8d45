//! Conversion-tracking dispatcher.
//!
//! Posts one conversion event per qualifying deal transition to the
//! tracking platform. The destination's wire format is opaque to the
//! pipeline; this is a plain JSON POST with a bearer token.

use crate::processors::dispatchers::{DispatchError, Dispatcher, http_client};
use crate::queue::JobPayload;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

pub struct ConversionTracker {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
}

#[derive(Debug, Serialize)]
struct ConversionEvent<'a> {
    reference: &'a str,
    event: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    occurred_at: i64,
}

impl ConversionTracker {
    pub fn new(endpoint: Url, token: String) -> Self {
        Self {
            http: http_client(),
            endpoint,
            token,
        }
    }

    fn deal_value(body: &serde_json::Value) -> Option<f64> {
        body.get("deal")?.get("value")?.as_f64()
    }
}

#[async_trait]
impl Dispatcher for ConversionTracker {
    fn name(&self) -> &'static str {
        "conversion-tracker"
    }

    async fn dispatch(&self, job: &JobPayload) -> Result<(), DispatchError> {
        let event = ConversionEvent {
            reference: &job.reference,
            event: &job.event,
            status: &job.snapshot,
            value: Self::deal_value(&job.body),
            occurred_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&event)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(reference = %job.reference, "conversion tracked");
        Ok(())
    }
}

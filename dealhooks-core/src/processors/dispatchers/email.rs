//! Transactional-email dispatcher.
//!
//! Sends the customer notification for committed deals through the email
//! service API. The recipient comes from the forwarded deal contact; a
//! deal without one is a contained dispatch failure, never a job failure.

use crate::processors::dispatchers::{DispatchError, Dispatcher, http_client};
use crate::queue::JobPayload;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct EmailNotifier {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    sender: String,
}

#[derive(Debug, Serialize)]
struct NotificationRequest<'a> {
    from: &'a str,
    to: &'a str,
    template: &'a str,
    variables: NotificationVariables<'a>,
}

#[derive(Debug, Serialize)]
struct NotificationVariables<'a> {
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_name: Option<&'a str>,
}

impl EmailNotifier {
    pub fn new(endpoint: Url, api_key: String, sender: String) -> Self {
        Self {
            http: http_client(),
            endpoint,
            api_key,
            sender,
        }
    }

    fn contact_field<'a>(body: &'a serde_json::Value, field: &str) -> Option<&'a str> {
        body.get("deal")?.get("contact")?.get(field)?.as_str()
    }
}

#[async_trait]
impl Dispatcher for EmailNotifier {
    fn name(&self) -> &'static str {
        "email-notifier"
    }

    async fn dispatch(&self, job: &JobPayload) -> Result<(), DispatchError> {
        let Some(recipient) = Self::contact_field(&job.body, "email") else {
            return Err(DispatchError::MissingField("deal.contact.email"));
        };

        let request = NotificationRequest {
            from: &self.sender,
            to: recipient,
            template: "deal-committed",
            variables: NotificationVariables {
                reference: &job.reference,
                contact_name: Self::contact_field(&job.body, "name"),
            },
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
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

        info!(reference = %job.reference, "customer notification sent");
        Ok(())
    }
}

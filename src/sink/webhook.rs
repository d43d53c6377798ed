use super::DeliverySink;
use crate::error::DeliveryError;
use crate::feed::Entry;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Generic webhook delivery adapter: POSTs the entry as JSON to
/// `<base_url>/<destination_id>`. Works against any endpoint that accepts a
/// JSON body per destination (chat-platform webhook relays, internal
/// routers). The bearer token, when configured, is attached to every request
/// and never logged.
pub struct WebhookSink {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl WebhookSink {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, destination_id: &str, entry: &Entry) -> Result<(), DeliveryError> {
        let url = format!("{}/{}", self.base_url, destination_id);
        let mut req = self.client.post(&url).json(entry);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = resp.status();
        match status.as_u16() {
            200..=299 => Ok(()),
            // The destination endpoint no longer exists; retrying will not help.
            404 | 410 => Err(DeliveryError::Permanent(format!(
                "destination endpoint gone ({})",
                status
            ))),
            _ => Err(DeliveryError::Transient(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

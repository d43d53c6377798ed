pub mod webhook;

use crate::error::DeliveryError;
use crate::feed::Entry;
use async_trait::async_trait;

pub use webhook::WebhookSink;

/// Capability to post one entry to one destination.
///
/// Supplied by the platform adapter; the engine never sees the transport.
/// Transient failures are retried on the next poll cycle, permanent ones
/// count toward auto-unsubscribe.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, destination_id: &str, entry: &Entry) -> Result<(), DeliveryError>;
}

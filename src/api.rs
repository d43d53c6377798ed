//! Subscription command surface.
//!
//! The synchronous API an external command adapter (chat bot, admin CLI)
//! calls. Errors are surfaced directly to the caller for user-visible
//! feedback; only the poll scheduler talks to destinations asynchronously.

use crate::error::ApiError;
use crate::feed::FeedSource;
use crate::store::{SubscribeOutcome, Subscription, SubscriptionStore};
use std::sync::Arc;
use url::Url;

/// Reference vocabulary of tracker labels the adapter can display next to
/// `set-filter`. Documentation only: the matcher accepts arbitrary tokens and
/// never validates against this list.
pub const SUPPORTED_LABELS: &[&str] = &[
    "backend",
    "frontend",
    "documentation",
    "type::bug",
    "type::feature",
    "type::maintenance",
    "quick-win",
    "quick-win::first-time-contributor",
    "community-bonus::100",
    "community-bonus::200",
    "community-bonus::300",
    "community-bonus::500",
    "co-create",
];

pub struct SubscriptionApi {
    store: Arc<SubscriptionStore>,
    feed: Arc<dyn FeedSource>,
}

impl SubscriptionApi {
    pub fn new(store: Arc<SubscriptionStore>, feed: Arc<dyn FeedSource>) -> Self {
        Self { store, feed }
    }

    /// Subscribe a destination to a feed. Replace policy: a destination that
    /// is already subscribed gets its subscription overwritten, discarding
    /// the prior filter and seen state.
    ///
    /// The URL is syntax-checked synchronously; only that rejects the call.
    /// The baseline fetch is attempted here so the first poll delivers
    /// nothing, but a reachability failure degrades to deferred baselining
    /// (the first successful poll seeds the seen set) rather than an error.
    pub async fn subscribe(
        &self,
        destination_id: &str,
        feed_url: &str,
    ) -> Result<SubscribeOutcome, ApiError> {
        let feed_url = normalize_url(feed_url)?;

        let baseline = match self.feed.fetch(&feed_url).await {
            Ok(entries) => Some(entries.into_iter().map(|e| e.id).collect()),
            Err(e) => {
                tracing::warn!(
                    url = %feed_url,
                    error = %e,
                    "baseline fetch failed, seeding deferred to first successful poll"
                );
                None
            }
        };

        Ok(self.store.subscribe(destination_id, &feed_url, baseline)?)
    }

    pub fn unsubscribe(&self, destination_id: &str) -> Result<(), ApiError> {
        Ok(self.store.unsubscribe(destination_id)?)
    }

    /// Replace the destination's label filter. Seen entries stay seen, so a
    /// widened filter never re-delivers history.
    pub fn set_filter(
        &self,
        destination_id: &str,
        labels: Vec<String>,
    ) -> Result<(), ApiError> {
        let filter = crate::engine::LabelFilter::new(labels);
        Ok(self.store.set_filter(destination_id, filter)?)
    }

    pub fn status(&self, destination_id: &str) -> Result<SubscriptionStatus, ApiError> {
        let sub = self.store.status(destination_id)?;
        Ok(SubscriptionStatus::from(sub))
    }

    pub fn list_supported_labels(&self) -> &'static [&'static str] {
        SUPPORTED_LABELS
    }
}

/// Snapshot of one subscription for display by the adapter.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    pub feed_url: String,
    pub filter: Vec<String>,
    pub seen_count: usize,
    pub baselined: bool,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Subscription> for SubscriptionStatus {
    fn from(sub: Subscription) -> Self {
        Self {
            filter: sub.filter.tokens().map(str::to_string).collect(),
            seen_count: sub.seen_ids.len(),
            baselined: sub.baselined,
            last_checked: sub.last_checked,
            feed_url: sub.feed_url,
        }
    }
}

/// Trim and syntax-check a feed URL. Only http/https URLs with a host are
/// accepted; everything else is rejected before any subscription state
/// changes.
fn normalize_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    let parsed =
        Url::parse(trimmed).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported URL scheme: {}",
                scheme
            )))
        }
    }
    if parsed.host().is_none() {
        return Err(ApiError::InvalidUrl(format!("missing host: {}", trimmed)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_accepts_http_and_https() {
        assert!(normalize_url("https://tracker.example/feed.atom").is_ok());
        assert!(normalize_url("http://tracker.example/feed.atom").is_ok());
    }

    #[test]
    fn test_normalize_url_trims_whitespace() {
        let url = normalize_url("  https://tracker.example/feed.atom \n").unwrap();
        assert_eq!(url, "https://tracker.example/feed.atom");
    }

    #[test]
    fn test_normalize_url_rejects_bad_scheme() {
        assert!(matches!(
            normalize_url("ftp://tracker.example/feed.atom"),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_normalize_url_rejects_garbage() {
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn test_supported_labels_include_structured_tokens() {
        assert!(SUPPORTED_LABELS.contains(&"type::bug"));
        assert!(SUPPORTED_LABELS.contains(&"co-create"));
    }
}

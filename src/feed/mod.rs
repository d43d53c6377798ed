pub mod fetcher;
pub mod types;

use crate::error::FetchError;
use async_trait::async_trait;

pub use fetcher::HttpFetcher;
pub use types::Entry;

/// Retrieves one feed document and parses it into entries, in feed order.
///
/// Pure function of remote state at call time; the fetcher never caches.
/// "Seen" tracking belongs to the subscription store.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>, FetchError>;
}

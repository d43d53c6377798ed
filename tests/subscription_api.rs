//! Integration tests for the subscription command surface.

use async_trait::async_trait;
use issue_relay::api::SubscriptionApi;
use issue_relay::error::{ApiError, FetchError, StoreError};
use issue_relay::feed::{Entry, FeedSource};
use issue_relay::store::{SubscribeOutcome, SubscriptionStore};
use std::sync::Arc;
use tempfile::TempDir;

struct StaticFeed {
    entries: Vec<Entry>,
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self, _url: &str) -> Result<Vec<Entry>, FetchError> {
        Ok(self.entries.clone())
    }
}

fn entry(id: &str) -> Entry {
    Entry {
        id: id.to_string(),
        title: format!("issue {}", id),
        link: format!("https://tracker.example/issues/{}", id),
        labels: Default::default(),
        author: None,
        published: None,
    }
}

fn api_with_feed(dir: &TempDir, entries: Vec<Entry>) -> (SubscriptionApi, Arc<SubscriptionStore>) {
    let store = Arc::new(SubscriptionStore::open(dir.path().join("subs.json")).unwrap());
    let api = SubscriptionApi::new(Arc::clone(&store), Arc::new(StaticFeed { entries }));
    (api, store)
}

const FEED: &str = "https://tracker.example/project/-/work_items.atom";

#[tokio::test]
async fn test_invalid_url_rejected_before_any_state_change() {
    let dir = TempDir::new().unwrap();
    let (api, store) = api_with_feed(&dir, vec![]);

    let err = api.subscribe("chan-1", "not a url").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidUrl(_)));
    let err = api
        .subscribe("chan-1", "ftp://tracker.example/feed")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidUrl(_)));

    assert!(store.list_active().is_empty());
}

#[tokio::test]
async fn test_subscribe_url_is_trimmed() {
    let dir = TempDir::new().unwrap();
    let (api, store) = api_with_feed(&dir, vec![]);

    api.subscribe("chan-1", &format!("  {}  ", FEED)).await.unwrap();
    assert_eq!(store.status("chan-1").unwrap().feed_url, FEED);
}

#[tokio::test]
async fn test_subscribe_seeds_baseline_from_current_feed() {
    let dir = TempDir::new().unwrap();
    let (api, _store) = api_with_feed(&dir, vec![entry("e1"), entry("e2")]);

    api.subscribe("chan-1", FEED).await.unwrap();
    let status = api.status("chan-1").unwrap();
    assert_eq!(status.seen_count, 2);
    assert!(status.baselined);
    assert!(status.filter.is_empty());
}

#[tokio::test]
async fn test_resubscribe_reports_replacement() {
    let dir = TempDir::new().unwrap();
    let (api, _store) = api_with_feed(&dir, vec![]);

    let outcome = api.subscribe("chan-1", FEED).await.unwrap();
    assert_eq!(outcome, SubscribeOutcome::Created);

    let other = "https://tracker.example/other/-/work_items.atom";
    let outcome = api.subscribe("chan-1", other).await.unwrap();
    assert_eq!(
        outcome,
        SubscribeOutcome::Replaced {
            previous_url: FEED.to_string()
        }
    );
    assert_eq!(api.status("chan-1").unwrap().feed_url, other);
}

#[tokio::test]
async fn test_commands_on_missing_destination_report_not_subscribed() {
    let dir = TempDir::new().unwrap();
    let (api, _store) = api_with_feed(&dir, vec![]);

    assert!(matches!(
        api.unsubscribe("nobody"),
        Err(ApiError::Store(StoreError::NotSubscribed(_)))
    ));
    assert!(matches!(
        api.set_filter("nobody", vec!["backend".to_string()]),
        Err(ApiError::Store(StoreError::NotSubscribed(_)))
    ));
    assert!(matches!(
        api.status("nobody"),
        Err(ApiError::Store(StoreError::NotSubscribed(_)))
    ));
}

#[tokio::test]
async fn test_set_filter_round_trips_through_status() {
    let dir = TempDir::new().unwrap();
    let (api, _store) = api_with_feed(&dir, vec![]);
    api.subscribe("chan-1", FEED).await.unwrap();

    api.set_filter(
        "chan-1",
        vec!["type::bug".to_string(), "backend".to_string()],
    )
    .unwrap();

    let status = api.status("chan-1").unwrap();
    assert_eq!(status.filter, vec!["backend", "type::bug"]);
}

#[tokio::test]
async fn test_unsubscribe_removes_subscription() {
    let dir = TempDir::new().unwrap();
    let (api, store) = api_with_feed(&dir, vec![]);
    api.subscribe("chan-1", FEED).await.unwrap();

    api.unsubscribe("chan-1").unwrap();
    assert!(store.list_active().is_empty());
    assert!(api.status("chan-1").is_err());
}

#[test]
fn test_supported_labels_are_static_reference_vocabulary() {
    let labels = issue_relay::api::SUPPORTED_LABELS;
    assert!(!labels.is_empty());
    assert!(labels.contains(&"type::bug"));
    assert!(labels.contains(&"quick-win::first-time-contributor"));
}

//! Poll cycle driver.
//!
//! Each cycle snapshots the active subscriptions, fetches every distinct feed
//! URL once through a bounded concurrent fan-out, then distributes entries to
//! destinations. A fetch failure is isolated to that URL's destinations for
//! the cycle. Within one destination entries are processed sequentially in
//! feed order; the seen-set commit for an entry is made durable before the
//! delivery counts as done.

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::feed::{Entry, FeedSource};
use crate::sink::DeliverySink;
use crate::store::{Subscription, SubscriptionStore};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Counters from one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub feeds_fetched: usize,
    pub feeds_failed: usize,
    pub delivered: usize,
    pub baselined: usize,
    pub auto_unsubscribed: usize,
}

/// What happened to one destination during distribution.
struct DestinationOutcome {
    delivered: usize,
    permanent_failure: bool,
}

pub struct PollScheduler {
    store: Arc<SubscriptionStore>,
    feed: Arc<dyn FeedSource>,
    sink: Arc<dyn DeliverySink>,
    max_concurrent_fetches: usize,
    permanent_failure_threshold: u32,
    /// Consecutive cycles each destination ended with a permanent delivery
    /// failure. In-memory only; a restart resets the count (the entry is
    /// still unseen and retried).
    strikes: HashMap<String, u32>,
}

impl PollScheduler {
    pub fn new(
        store: Arc<SubscriptionStore>,
        feed: Arc<dyn FeedSource>,
        sink: Arc<dyn DeliverySink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            feed,
            sink,
            max_concurrent_fetches: config.max_concurrent_fetches,
            permanent_failure_threshold: config.permanent_failure_threshold,
            strikes: HashMap::new(),
        }
    }

    /// Drive poll cycles on a fixed interval until the shutdown signal flips
    /// to true (or its sender is dropped). The first cycle runs immediately.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("shutdown requested, poll loop exiting");
                        return;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, poll loop exiting");
                return;
            }
            let stats = self.run_cycle(&shutdown).await;
            tracing::debug!(
                feeds_fetched = stats.feeds_fetched,
                feeds_failed = stats.feeds_failed,
                delivered = stats.delivered,
                "poll cycle complete"
            );
        }
    }

    /// One fetch-and-distribute pass across all active subscriptions.
    ///
    /// The shutdown signal is checked between destinations and between
    /// entries; abandoning mid-cycle is safe because uncommitted entries are
    /// retried next cycle.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> CycleStats {
        let mut stats = CycleStats::default();
        let subscriptions = self.store.list_active();
        if subscriptions.is_empty() {
            return stats;
        }

        // Fetch each distinct URL once, even when several destinations share it.
        let mut urls: Vec<String> = subscriptions
            .iter()
            .map(|(_, sub)| sub.feed_url.clone())
            .collect();
        urls.sort();
        urls.dedup();

        let fetched: HashMap<String, Result<Vec<Entry>, FetchError>> = stream::iter(urls)
            .map(|url| {
                let feed = Arc::clone(&self.feed);
                async move {
                    let result = feed.fetch(&url).await;
                    (url, result)
                }
            })
            .buffer_unordered(self.max_concurrent_fetches)
            .collect()
            .await;

        for (url, result) in &fetched {
            match result {
                Ok(entries) => {
                    stats.feeds_fetched += 1;
                    tracing::debug!(url = %url, entries = entries.len(), "feed fetched");
                }
                Err(e) => {
                    stats.feeds_failed += 1;
                    tracing::warn!(url = %url, error = %e, "feed fetch failed, destinations on this URL skip the cycle");
                }
            }
        }

        for (destination_id, sub) in subscriptions {
            if *shutdown.borrow() {
                return stats;
            }
            let entries = match fetched.get(&sub.feed_url) {
                Some(Ok(entries)) => entries,
                _ => continue,
            };

            if !sub.baselined {
                // First successful contact with the feed: mark everything
                // currently in it seen, deliver nothing.
                let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
                match self.store.mark_baseline(&destination_id, ids) {
                    Ok(()) => {
                        stats.baselined += 1;
                        tracing::info!(
                            destination = %destination_id,
                            entries = entries.len(),
                            "baseline seeded"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(destination = %destination_id, error = %e, "baseline seeding failed")
                    }
                }
                continue;
            }

            let outcome = self
                .distribute(&destination_id, &sub, entries, shutdown)
                .await;
            stats.delivered += outcome.delivered;

            if outcome.permanent_failure {
                let strikes = self.strikes.entry(destination_id.clone()).or_insert(0);
                *strikes += 1;
                if *strikes >= self.permanent_failure_threshold {
                    tracing::warn!(
                        destination = %destination_id,
                        strikes = *strikes,
                        "repeated permanent delivery failures, auto-unsubscribing"
                    );
                    if let Err(e) = self.store.unsubscribe(&destination_id) {
                        tracing::warn!(destination = %destination_id, error = %e, "auto-unsubscribe failed");
                    } else {
                        stats.auto_unsubscribed += 1;
                    }
                    self.strikes.remove(&destination_id);
                }
            } else {
                self.strikes.remove(&destination_id);
            }
        }

        stats
    }

    /// Deliver unseen, filter-matching entries to one destination, in feed
    /// order. Stops at the first failure; whatever was not committed is
    /// retried next cycle. Entries excluded by the filter are never
    /// committed, so a later filter change can still pick them up.
    async fn distribute(
        &self,
        destination_id: &str,
        sub: &Subscription,
        entries: &[Entry],
        shutdown: &watch::Receiver<bool>,
    ) -> DestinationOutcome {
        let mut outcome = DestinationOutcome {
            delivered: 0,
            permanent_failure: false,
        };

        for entry in entries {
            if *shutdown.borrow() {
                break;
            }
            if sub.seen_ids.contains(&entry.id) {
                continue;
            }
            if !sub.filter.matches(&entry.labels) {
                continue;
            }

            match self.sink.deliver(destination_id, entry).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_seen(destination_id, &entry.id) {
                        // The sink already accepted the entry; without a
                        // durable commit it would be re-sent, so stop here.
                        tracing::error!(
                            destination = %destination_id,
                            entry = %entry.id,
                            error = %e,
                            "seen-set commit failed, stopping destination for this cycle"
                        );
                        break;
                    }
                    outcome.delivered += 1;
                    tracing::info!(
                        destination = %destination_id,
                        entry = %entry.id,
                        title = %entry.title,
                        "entry delivered"
                    );
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(
                        destination = %destination_id,
                        entry = %entry.id,
                        error = %e,
                        "permanent delivery failure"
                    );
                    outcome.permanent_failure = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        destination = %destination_id,
                        entry = %entry.id,
                        error = %e,
                        "transient delivery failure, retrying next cycle"
                    );
                    break;
                }
            }
        }

        if outcome.delivered > 0 {
            if let Err(e) = self.store.touch_checked(destination_id, Utc::now()) {
                tracing::warn!(destination = %destination_id, error = %e, "failed to update last_checked");
            }
        }

        outcome
    }
}

//! Durable subscription store.
//!
//! Sole owner of subscription state. All mutation goes through this API,
//! serialized by a single lock (write volume is a handful of operations per
//! poll cycle). Every mutation is persisted before the call returns success:
//! the full state document is serialized to a temp file in the same directory
//! and renamed over the previous file, so a crash mid-write never leaves a
//! partially written document. If the durable write fails, the in-memory
//! change is rolled back and the error surfaced.

use crate::engine::filter::LabelFilter;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// One destination's subscription. `seen_ids` only grows; entries are never
/// un-seen, and filter changes do not retroactively re-deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub feed_url: String,
    pub filter: LabelFilter,
    pub seen_ids: BTreeSet<String>,
    /// False until baseline seeding has run. Stays false when the
    /// subscribe-time fetch failed; the first successful poll then seeds the
    /// seen set without delivering.
    #[serde(default)]
    pub baselined: bool,
    /// Last time a poll delivered to this destination. Display only.
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Result of a `subscribe` call under the replace policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    /// An existing subscription was replaced; its filter and seen state were
    /// discarded.
    Replaced { previous_url: String },
}

#[derive(Debug, Default, Deserialize)]
struct StateDocument {
    destinations: BTreeMap<String, Subscription>,
}

#[derive(Serialize)]
struct StateDocumentRef<'a> {
    destinations: &'a BTreeMap<String, Subscription>,
}

pub struct SubscriptionStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, Subscription>>,
}

impl SubscriptionStore {
    /// Open the store, loading existing state from `path` if present.
    ///
    /// A corrupt state file is a hard error: starting empty would discard
    /// every seen set and flood every destination on the next cycle.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StoreError::Persistence)?;
            }
        }
        let destinations = match fs::read(&path) {
            Ok(bytes) => {
                let doc: StateDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
                doc.destinations
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Persistence(e)),
        };
        Ok(Self {
            path,
            inner: Mutex::new(destinations),
        })
    }

    /// Subscribe a destination to a feed. Replace policy: an existing
    /// subscription is overwritten and its filter/seen state discarded.
    /// `baseline` is the set of entry ids currently in the feed, or `None`
    /// when the baseline fetch failed and seeding is deferred to the first
    /// successful poll.
    pub fn subscribe(
        &self,
        destination_id: &str,
        feed_url: &str,
        baseline: Option<Vec<String>>,
    ) -> Result<SubscribeOutcome, StoreError> {
        let mut map = self.lock();
        let baselined = baseline.is_some();
        let previous = map.insert(
            destination_id.to_string(),
            Subscription {
                feed_url: feed_url.to_string(),
                filter: LabelFilter::default(),
                seen_ids: baseline.unwrap_or_default().into_iter().collect(),
                baselined,
                last_checked: None,
            },
        );
        match self.persist(&map) {
            Ok(()) => Ok(match previous {
                Some(prev) => SubscribeOutcome::Replaced {
                    previous_url: prev.feed_url,
                },
                None => SubscribeOutcome::Created,
            }),
            Err(e) => {
                match previous {
                    Some(prev) => {
                        map.insert(destination_id.to_string(), prev);
                    }
                    None => {
                        map.remove(destination_id);
                    }
                }
                Err(e)
            }
        }
    }

    pub fn unsubscribe(&self, destination_id: &str) -> Result<(), StoreError> {
        let mut map = self.lock();
        let removed = map
            .remove(destination_id)
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))?;
        if let Err(e) = self.persist(&map) {
            map.insert(destination_id.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }

    /// Replace the destination's filter. Does not alter `seen_ids`.
    pub fn set_filter(
        &self,
        destination_id: &str,
        filter: LabelFilter,
    ) -> Result<(), StoreError> {
        let mut map = self.lock();
        let sub = map
            .get_mut(destination_id)
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))?;
        let previous = std::mem::replace(&mut sub.filter, filter);
        if let Err(e) = self.persist(&map) {
            if let Some(sub) = map.get_mut(destination_id) {
                sub.filter = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn status(&self, destination_id: &str) -> Result<Subscription, StoreError> {
        self.lock()
            .get(destination_id)
            .cloned()
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))
    }

    /// Snapshot of all subscriptions, for the scheduler's cycle.
    pub fn list_active(&self) -> Vec<(String, Subscription)> {
        self.lock()
            .iter()
            .map(|(id, sub)| (id.clone(), sub.clone()))
            .collect()
    }

    /// Record one entry as seen and commit durably. Must complete before the
    /// delivery is reported done, so a restart never re-sends a committed
    /// entry.
    pub fn mark_seen(&self, destination_id: &str, entry_id: &str) -> Result<(), StoreError> {
        let mut map = self.lock();
        let sub = map
            .get_mut(destination_id)
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))?;
        if !sub.seen_ids.insert(entry_id.to_string()) {
            return Ok(());
        }
        if let Err(e) = self.persist(&map) {
            if let Some(sub) = map.get_mut(destination_id) {
                sub.seen_ids.remove(entry_id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Baseline seeding: mark every current entry seen without delivery, in
    /// one durable commit.
    pub fn mark_baseline(
        &self,
        destination_id: &str,
        entry_ids: Vec<String>,
    ) -> Result<(), StoreError> {
        let mut map = self.lock();
        let sub = map
            .get_mut(destination_id)
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))?;
        let previous = sub.clone();
        sub.seen_ids.extend(entry_ids);
        sub.baselined = true;
        if let Err(e) = self.persist(&map) {
            map.insert(destination_id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// Update the destination's last-delivery timestamp.
    pub fn touch_checked(
        &self,
        destination_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut map = self.lock();
        let sub = map
            .get_mut(destination_id)
            .ok_or_else(|| StoreError::NotSubscribed(destination_id.to_string()))?;
        let previous = sub.last_checked.replace(when);
        if let Err(e) = self.persist(&map) {
            if let Some(sub) = map.get_mut(destination_id) {
                sub.last_checked = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Subscription>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Atomic rewrite: temp file in the same directory, then rename.
    fn persist(&self, map: &BTreeMap<String, Subscription>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&StateDocumentRef { destinations: map })
            .map_err(|e| {
                StoreError::Persistence(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(StoreError::Persistence)?;
        fs::rename(&tmp, &self.path).map_err(StoreError::Persistence)?;
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Normalized feed entry used by the engine (format-agnostic).
///
/// `id` is the entry's stable identifier (Atom id / RSS guid, falling back to
/// the link URL) and is the only field dedup relies on. `published` is kept
/// for display and ordering within one fetch, never for dedup.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub labels: BTreeSet<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

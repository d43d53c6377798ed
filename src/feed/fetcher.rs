use super::types::Entry;
use super::FeedSource;
use crate::error::FetchError;
use anyhow::Result;
use async_trait::async_trait;
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Response bodies larger than this are rejected (tracker work-item feeds are
/// a few hundred KB at most).
const MAX_FEED_BYTES: u64 = 4 * 1024 * 1024;

const MAX_REDIRECTS: usize = 5;

const USER_AGENT: &str = concat!("issue-relay/", env!("CARGO_PKG_VERSION"));

/// HTTP feed fetcher.
///
/// Parses RSS and Atom documents. Label tokens are the union of the feed's
/// category elements and the tracker's custom `<labels><label>` elements,
/// which standard feed parsers drop; those are recovered from the raw
/// document, scoped per entry. Missing or unparseable label data yields an
/// empty label set for that entry, never a fetch failure.
pub struct HttpFetcher {
    client: Client,
    scanner: LabelScanner,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            scanner: LabelScanner::new()?,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>, FetchError> {
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        if let Some(len) = resp.content_length() {
            if len > MAX_FEED_BYTES {
                return Err(FetchError::Parse(format!(
                    "feed too large: {} bytes (max {})",
                    len, MAX_FEED_BYTES
                )));
            }
        }

        let bytes = resp.bytes().await?;
        if bytes.len() as u64 > MAX_FEED_BYTES {
            return Err(FetchError::Parse(format!(
                "feed too large: {} bytes (max {})",
                bytes.len(),
                MAX_FEED_BYTES
            )));
        }

        parse_document(&bytes, &self.scanner)
    }
}

/// Parse feed bytes into normalized entries, in document order.
fn parse_document(bytes: &[u8], scanner: &LabelScanner) -> Result<Vec<Entry>, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    // Custom label elements are invisible to the feed parser; scan the raw
    // text for them, keyed by entry id.
    let custom_labels = scanner.scan(&String::from_utf8_lossy(bytes));

    let mut entries = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let link = entry.links.first().map(|l| l.href.clone());

        // Stable id with link fallback; entries with neither cannot be
        // deduplicated and are dropped.
        let id = if entry.id.is_empty() {
            match &link {
                Some(l) => l.clone(),
                None => continue,
            }
        } else {
            entry.id
        };

        let mut labels: BTreeSet<String> = entry
            .categories
            .into_iter()
            .map(|c| c.term)
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(extra) = custom_labels.get(&id) {
            labels.extend(extra.iter().cloned());
        }

        entries.push(Entry {
            title: entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            link: link.unwrap_or_default(),
            labels,
            author: entry.authors.first().map(|a| a.name.clone()),
            published: entry.published.or(entry.updated),
            id,
        });
    }

    Ok(entries)
}

/// Extracts `<labels><label>tok</label>...</labels>` tokens from the raw feed
/// text, mapped by the owning entry's `<id>`.
struct LabelScanner {
    entry: Regex,
    id: Regex,
    labels: Regex,
    label: Regex,
}

impl LabelScanner {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            entry: Regex::new(r"(?s)<entry>(.*?)</entry>")?,
            id: Regex::new(r"<id>([^<]+)</id>")?,
            labels: Regex::new(r"(?s)<labels>(.*?)</labels>")?,
            label: Regex::new(r"<label>([^<]+)</label>")?,
        })
    }

    fn scan(&self, raw: &str) -> HashMap<String, BTreeSet<String>> {
        let mut map = HashMap::new();
        for entry_match in self.entry.captures_iter(raw) {
            let entry_xml = &entry_match[1];
            let Some(id) = self.id.captures(entry_xml).map(|c| c[1].to_string()) else {
                continue;
            };
            let mut tokens = BTreeSet::new();
            if let Some(block) = self.labels.captures(entry_xml) {
                for label in self.label.captures_iter(&block[1]) {
                    tokens.insert(label[1].to_string());
                }
            }
            if !tokens.is_empty() {
                map.insert(id, tokens);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM_WITH_LABELS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>work items</title>
  <id>https://tracker.example/project/-/work_items</id>
  <updated>2024-05-02T09:00:00Z</updated>
  <entry>
    <id>https://tracker.example/project/-/issues/102</id>
    <title>Add dark mode</title>
    <link href="https://tracker.example/project/-/issues/102"/>
    <updated>2024-05-02T09:00:00Z</updated>
    <author><name>bob</name></author>
    <category term="frontend"/>
  </entry>
  <entry>
    <id>https://tracker.example/project/-/issues/101</id>
    <title>Crash when saving</title>
    <link href="https://tracker.example/project/-/issues/101"/>
    <updated>2024-05-01T12:30:00Z</updated>
    <author><name>alice</name></author>
    <labels>
      <label>type::bug</label>
      <label>backend</label>
    </labels>
  </entry>
</feed>"#;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
  <channel>
    <title>issues</title>
    <link>https://tracker.example/project</link>
    <description>issue feed</description>
    <item>
      <guid>issue-7</guid>
      <title>Flaky test</title>
      <link>https://tracker.example/project/issues/7</link>
      <category>type::maintenance</category>
    </item>
  </channel>
</rss>"#;

    fn parse(bytes: &[u8]) -> Result<Vec<Entry>, FetchError> {
        parse_document(bytes, &LabelScanner::new().unwrap())
    }

    #[test]
    fn test_atom_custom_labels_scoped_per_entry() {
        let entries = parse(ATOM_WITH_LABELS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let dark_mode = &entries[0];
        assert_eq!(dark_mode.id, "https://tracker.example/project/-/issues/102");
        assert_eq!(
            dark_mode.labels.iter().collect::<Vec<_>>(),
            vec!["frontend"]
        );

        let crash = &entries[1];
        assert_eq!(crash.title, "Crash when saving");
        assert_eq!(crash.author.as_deref(), Some("alice"));
        assert_eq!(
            crash.labels.iter().collect::<Vec<_>>(),
            vec!["backend", "type::bug"]
        );
    }

    #[test]
    fn test_rss_categories_become_labels() {
        let entries = parse(RSS_SAMPLE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "issue-7");
        assert!(entries[0].labels.contains("type::maintenance"));
    }

    #[test]
    fn test_missing_label_data_yields_empty_set() {
        let entries = parse(ATOM_WITH_LABELS.as_bytes()).unwrap();
        // Entry 102 has no <labels> block; only its category survives.
        assert!(!entries[0].labels.contains("type::bug"));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = parse(b"this is not a feed").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_label_scan_ignores_entries_without_labels() {
        let scanner = LabelScanner::new().unwrap();
        let map = scanner.scan(ATOM_WITH_LABELS);
        assert_eq!(map.len(), 1);
        let tokens = &map["https://tracker.example/project/-/issues/101"];
        assert!(tokens.contains("type::bug"));
        assert!(tokens.contains("backend"));
    }
}

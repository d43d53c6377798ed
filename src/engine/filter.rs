use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Set of label tokens one destination wants.
///
/// An empty filter matches every entry. A non-empty filter matches when the
/// entry carries at least one of its tokens (OR across tokens, not AND: a
/// destination wants any of its tracked labels). Comparison is exact and
/// case-sensitive: tracker labels are structured tokens like `type::bug` and
/// no normalization is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelFilter(BTreeSet<String>);

impl LabelFilter {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self(tokens.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &BTreeSet<String>) -> bool {
        self.0.is_empty() || labels.iter().any(|l| self.0.contains(l))
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

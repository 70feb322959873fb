use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::model::BusinessListing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Keep the snapshot order.
    #[default]
    Relevance,
    /// Highest rating first.
    Rating,
    /// By name, A to Z.
    Alphabetical,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Relevance => "relevance",
            SortKey::Rating => "rating",
            SortKey::Alphabetical => "alphabetical",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort key: {0:?} (expected relevance, rating or alphabetical)")]
pub struct SortKeyError(String);

impl FromStr for SortKey {
    type Err = SortKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(SortKey::Relevance),
            "rating" => Ok(SortKey::Rating),
            "alphabetical" => Ok(SortKey::Alphabetical),
            _ => Err(SortKeyError(s.to_string())),
        }
    }
}

/// Stable in-place sort. Ties keep their incoming relative order.
pub fn sort_listings(listings: &mut [BusinessListing], key: SortKey) {
    match key {
        SortKey::Relevance => {}
        SortKey::Rating => listings.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        SortKey::Alphabetical => listings.sort_by(|a, b| collate(&a.name, &b.name)),
    }
}

/// Name collation in three levels, like a locale collator at its default
/// strength: base letters with accents and case ignored, then accents, then
/// case with lowercase first.
pub fn collate(a: &str, b: &str) -> Ordering {
    primary_key(a)
        .cmp(primary_key(b))
        .then_with(|| secondary_key(a).cmp(secondary_key(b)))
        .then_with(|| b.cmp(a))
}

fn secondary_key(s: &str) -> impl Iterator<Item = char> + '_ {
    s.nfd().flat_map(char::to_lowercase)
}

fn primary_key(s: &str) -> impl Iterator<Item = char> + '_ {
    secondary_key(s).filter(|c| !is_combining_mark(*c))
}

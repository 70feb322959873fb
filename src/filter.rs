use std::collections::BTreeSet;

use crate::limits::{DEFAULT_MIN_RATING, MAX_RATING, MIN_RATING};
use crate::model::BusinessListing;
use crate::sort::SortKey;

/// The viewer's current filter and sort selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub locations: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    /// Inclusive lower bound on rating.
    pub min_rating: f64,
    pub price_ranges: BTreeSet<String>,
    pub query: String,
    pub sort: SortKey,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            locations: BTreeSet::new(),
            categories: BTreeSet::new(),
            min_rating: DEFAULT_MIN_RATING,
            price_ranges: BTreeSet::new(),
            query: String::new(),
            sort: SortKey::default(),
        }
    }
}

/// One user interaction with the filter sidebar or search header.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterAction {
    SetLocation { location: String, selected: bool },
    SetCategory { category: String, selected: bool },
    TogglePriceRange(String),
    SetMinRating(f64),
    SetQuery(String),
    SetSort(SortKey),
    Reset,
}

impl FilterState {
    pub fn reduce(mut self, action: FilterAction) -> Self {
        match action {
            FilterAction::SetLocation { location, selected } => {
                set_membership(&mut self.locations, location, selected);
            }
            FilterAction::SetCategory { category, selected } => {
                set_membership(&mut self.categories, category, selected);
            }
            FilterAction::TogglePriceRange(tag) => {
                if !self.price_ranges.remove(&tag) {
                    self.price_ranges.insert(tag);
                }
            }
            FilterAction::SetMinRating(rating) => {
                self.min_rating = if rating.is_nan() {
                    DEFAULT_MIN_RATING
                } else {
                    rating.clamp(MIN_RATING, MAX_RATING)
                };
            }
            FilterAction::SetQuery(query) => self.query = query,
            FilterAction::SetSort(key) => self.sort = key,
            FilterAction::Reset => return Self::default(),
        }
        self
    }
}

fn set_membership(set: &mut BTreeSet<String>, value: String, selected: bool) {
    if selected {
        set.insert(value);
    } else {
        set.remove(&value);
    }
}

// ── Predicates ───────────────────────────────────────────────────

pub fn location_matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    filters.locations.is_empty() || filters.locations.contains(&listing.location)
}

/// Any overlap between the listing's tags and the selection passes.
pub fn category_matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    filters.categories.is_empty()
        || listing
            .category
            .iter()
            .any(|tag| filters.categories.contains(tag))
}

pub fn rating_matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    listing.rating >= filters.min_rating
}

pub fn price_range_matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    filters.price_ranges.is_empty() || filters.price_ranges.contains(&listing.price_range)
}

/// Case-insensitive substring search over name, description and tags.
pub fn search_matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    if filters.query.is_empty() {
        return true;
    }
    let needle = filters.query.to_lowercase();
    listing.name.to_lowercase().contains(&needle)
        || listing.description.to_lowercase().contains(&needle)
        || listing
            .category
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

pub fn matches(listing: &BusinessListing, filters: &FilterState) -> bool {
    location_matches(listing, filters)
        && category_matches(listing, filters)
        && rating_matches(listing, filters)
        && price_range_matches(listing, filters)
        && search_matches(listing, filters)
}

use crate::model::{BusinessListing, ChangeEvent};

/// Ordered snapshot of every listing, kept in sync by change events.
///
/// Order is first-seen: a full load sets it, inserts append, updates keep the
/// row where it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingStore {
    listings: Vec<BusinessListing>,
}

/// Distinct values present in the snapshot, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub locations: Vec<String>,
    pub categories: Vec<String>,
    pub price_ranges: Vec<String>,
}

impl ListingStore {
    pub fn new(listings: Vec<BusinessListing>) -> Self {
        let mut store = Self::default();
        store.replace_all(listings);
        store
    }

    /// Swap in a full snapshot. A repeated id keeps its first position and
    /// its last contents.
    pub fn replace_all(&mut self, listings: Vec<BusinessListing>) {
        self.listings.clear();
        for listing in listings {
            self.upsert(listing);
        }
    }

    /// Apply one change. Returns whether the snapshot changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert { row } => {
                self.upsert(row.clone());
                true
            }
            ChangeEvent::Update { row } => match self.position(&row.id) {
                Some(i) => {
                    self.listings[i] = row.clone();
                    true
                }
                None => false,
            },
            ChangeEvent::Delete { id } => match self.position(id) {
                Some(i) => {
                    self.listings.remove(i);
                    true
                }
                None => false,
            },
        }
    }

    pub fn snapshot(&self) -> &[BusinessListing] {
        &self.listings
    }

    pub fn get(&self, id: &str) -> Option<&BusinessListing> {
        self.listings.iter().find(|l| l.id == id)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Options for the filter sidebar.
    pub fn facets(&self) -> Facets {
        let mut facets = Facets::default();
        for listing in &self.listings {
            push_new(&mut facets.locations, &listing.location);
            for tag in &listing.category {
                push_new(&mut facets.categories, tag);
            }
            push_new(&mut facets.price_ranges, &listing.price_range);
        }
        facets
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.listings.iter().position(|l| l.id == id)
    }

    fn upsert(&mut self, listing: BusinessListing) {
        match self.position(&listing.id) {
            Some(i) => self.listings[i] = listing,
            None => self.listings.push(listing),
        }
    }
}

fn push_new(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, rating: f64) -> BusinessListing {
        BusinessListing {
            id: id.into(),
            name: format!("Shop {id}"),
            image: String::new(),
            category: vec!["Retail".into()],
            rating,
            price_range: "1만원대".into(),
            description: String::new(),
            location: "Downtown".into(),
        }
    }

    fn ids(store: &ListingStore) -> Vec<&str> {
        store.snapshot().iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn insert_appends_update_replaces_in_place() {
        let mut store = ListingStore::new(vec![listing("a", 4.0), listing("b", 4.0)]);
        assert!(store.apply(&ChangeEvent::Insert { row: listing("c", 3.0) }));
        assert!(store.apply(&ChangeEvent::Update { row: listing("a", 2.5) }));
        assert_eq!(ids(&store), ["a", "b", "c"]);
        assert_eq!(store.get("a").map(|l| l.rating), Some(2.5));
    }

    #[test]
    fn duplicate_insert_does_not_duplicate() {
        let mut store = ListingStore::new(vec![listing("a", 4.0)]);
        store.apply(&ChangeEvent::Insert { row: listing("a", 4.9) });
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").map(|l| l.rating), Some(4.9));
    }

    #[test]
    fn unknown_ids_are_noops() {
        let mut store = ListingStore::default();
        assert!(!store.apply(&ChangeEvent::Delete { id: "ghost".into() }));
        assert!(!store.apply(&ChangeEvent::Update { row: listing("ghost", 1.0) }));
        assert!(store.is_empty());

        // delete arriving before its insert leaves the later insert in place
        store.apply(&ChangeEvent::Insert { row: listing("ghost", 1.0) });
        assert_eq!(ids(&store), ["ghost"]);
    }

    #[test]
    fn delete_removes() {
        let mut store = ListingStore::new(vec![listing("a", 4.0), listing("b", 4.0)]);
        assert!(store.apply(&ChangeEvent::Delete { id: "a".into() }));
        assert_eq!(ids(&store), ["b"]);
    }

    #[test]
    fn replace_all_collapses_repeated_ids() {
        let store = ListingStore::new(vec![listing("a", 1.0), listing("b", 2.0), listing("a", 3.0)]);
        assert_eq!(ids(&store), ["a", "b"]);
        assert_eq!(store.get("a").map(|l| l.rating), Some(3.0));
    }

    #[test]
    fn facets_first_seen_distinct() {
        let mut a = listing("a", 4.0);
        a.category = vec!["Retail".into(), "Services".into()];
        let mut b = listing("b", 4.0);
        b.location = "West End".into();
        b.price_range = "2만원대".into();
        let c = listing("c", 4.0);

        let facets = ListingStore::new(vec![a, b, c]).facets();
        assert_eq!(facets.locations, ["Downtown", "West End"]);
        assert_eq!(facets.categories, ["Retail", "Services"]);
        assert_eq!(facets.price_ranges, ["1만원대", "2만원대"]);
    }
}

use crate::filter::{FilterState, matches};
use crate::model::BusinessListing;
use crate::sort::sort_listings;

/// Filter then sort a snapshot into the displayed sequence. Pure and total;
/// an empty result is a valid answer to an over-constrained filter.
pub fn apply(snapshot: &[BusinessListing], filters: &FilterState) -> Vec<BusinessListing> {
    let mut out: Vec<BusinessListing> = snapshot
        .iter()
        .filter(|l| matches(l, filters))
        .cloned()
        .collect();
    sort_listings(&mut out, filters.sort);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterAction;
    use crate::sort::SortKey;

    fn listing(id: &str, name: &str, location: &str, rating: f64) -> BusinessListing {
        BusinessListing {
            id: id.into(),
            name: name.into(),
            image: format!("https://img.example/{id}.jpg"),
            category: vec!["Restaurants".into()],
            rating,
            price_range: "1만원대".into(),
            description: String::new(),
            location: location.into(),
        }
    }

    fn ids(listings: &[BusinessListing]) -> Vec<&str> {
        listings.iter().map(|l| l.id.as_str()).collect()
    }

    fn three() -> Vec<BusinessListing> {
        vec![
            listing("1", "Harbor Grill", "Downtown", 4.5),
            listing("2", "Corner Books", "West End", 4.8),
            listing("3", "East Market", "East Side", 4.9),
        ]
    }

    #[test]
    fn unconstrained_filter_is_identity() {
        let snapshot = three();
        assert_eq!(apply(&snapshot, &FilterState::default()), snapshot);
    }

    #[test]
    fn location_scenario() {
        let f = FilterState::default().reduce(FilterAction::SetLocation {
            location: "Downtown".into(),
            selected: true,
        });
        assert_eq!(ids(&apply(&three(), &f)), ["1"]);
    }

    #[test]
    fn min_rating_scenario_keeps_order() {
        let f = FilterState::default().reduce(FilterAction::SetMinRating(4.7));
        assert_eq!(ids(&apply(&three(), &f)), ["2", "3"]);
    }

    #[test]
    fn filter_then_sort() {
        let f = FilterState::default()
            .reduce(FilterAction::SetMinRating(4.6))
            .reduce(FilterAction::SetSort(SortKey::Rating));
        assert_eq!(ids(&apply(&three(), &f)), ["3", "2"]);

        let f = f.reduce(FilterAction::SetSort(SortKey::Alphabetical));
        assert_eq!(ids(&apply(&three(), &f)), ["2", "3"]);
    }

    #[test]
    fn over_constrained_is_empty() {
        let f = FilterState::default()
            .reduce(FilterAction::SetLocation {
                location: "North District".into(),
                selected: true,
            })
            .reduce(FilterAction::SetQuery("grill".into()));
        assert!(apply(&three(), &f).is_empty());
        assert!(apply(&[], &FilterState::default()).is_empty());
    }
}

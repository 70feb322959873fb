use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::filter::{FilterAction, FilterState};
use crate::limits::DEFAULT_CALL_TIMEOUT_MS;
use crate::model::UserIdentity;
use crate::reservation::OccupancyPolicy;
use crate::sort::SortKey;

/// Runtime settings, read once at startup from `BIZDIR_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub apply_schema: bool,
    pub metrics_port: Option<u16>,
    pub call_timeout: Duration,
    pub occupancy: OccupancyPolicy,
    /// Identity to sign in as, when both id and email are set.
    pub user: Option<UserIdentity>,
    pub query: String,
    pub sort: SortKey,
    pub locations: Vec<String>,
    pub categories: Vec<String>,
    pub price_ranges: Vec<String>,
    pub min_rating: Option<f64>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Invalid values fall back to their default
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let user = match (lookup("BIZDIR_USER_ID"), lookup("BIZDIR_USER_EMAIL")) {
            (Some(id), Some(email)) => Some(UserIdentity { id, email }),
            (None, None) => None,
            _ => {
                warn!("BIZDIR_USER_ID and BIZDIR_USER_EMAIL must be set together, ignoring");
                None
            }
        };
        let cancelled_blocks: bool = try_load(&lookup, "BIZDIR_CANCELLED_BLOCKS_SLOT", false);

        Self {
            database_url: lookup("BIZDIR_DATABASE_URL").unwrap_or_else(|| {
                info!("BIZDIR_DATABASE_URL not set, using default");
                "host=localhost user=postgres dbname=bizdir".into()
            }),
            apply_schema: try_load(&lookup, "BIZDIR_APPLY_SCHEMA", false),
            metrics_port: lookup("BIZDIR_METRICS_PORT")
                .and_then(|s| parse_or_warn("BIZDIR_METRICS_PORT", &s)),
            call_timeout: Duration::from_millis(try_load(
                &lookup,
                "BIZDIR_CALL_TIMEOUT_MS",
                DEFAULT_CALL_TIMEOUT_MS,
            )),
            occupancy: if cancelled_blocks {
                OccupancyPolicy::IncludeCancelled
            } else {
                OccupancyPolicy::ExcludeCancelled
            },
            user,
            query: lookup("BIZDIR_QUERY").unwrap_or_default(),
            sort: try_load(&lookup, "BIZDIR_SORT", SortKey::default()),
            locations: list(lookup("BIZDIR_LOCATIONS")),
            categories: list(lookup("BIZDIR_CATEGORIES")),
            price_ranges: list(lookup("BIZDIR_PRICE_RANGES")),
            min_rating: lookup("BIZDIR_MIN_RATING")
                .and_then(|s| parse_or_warn("BIZDIR_MIN_RATING", &s)),
        }
    }

    /// Starting filter selection, built through the same reducer the viewer
    /// drives.
    pub fn initial_filters(&self) -> FilterState {
        let mut actions = Vec::new();
        actions.extend(self.locations.iter().map(|l| FilterAction::SetLocation {
            location: l.clone(),
            selected: true,
        }));
        actions.extend(self.categories.iter().map(|c| FilterAction::SetCategory {
            category: c.clone(),
            selected: true,
        }));
        actions.extend(
            self.price_ranges
                .iter()
                .map(|p| FilterAction::TogglePriceRange(p.clone())),
        );
        if let Some(rating) = self.min_rating {
            actions.push(FilterAction::SetMinRating(rating));
        }
        actions.push(FilterAction::SetQuery(self.query.clone()));
        actions.push(FilterAction::SetSort(self.sort));

        actions
            .into_iter()
            .fold(FilterState::default(), FilterState::reduce)
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| warn!("Invalid {key} value {raw:?}: {e}"))
        .ok()
}

fn try_load<T: FromStr + Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T
where
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_or_warn(key, &raw).unwrap_or_else(|| {
            warn!("{key} falling back to default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

/// Comma-separated list; blanks dropped, order and duplicates kept for the
/// reducer to collapse.
fn list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_RATING, MIN_RATING};

// ── Listings ─────────────────────────────────────────────────────

/// One business directory entry, in canonical shape.
///
/// Rows only become a `BusinessListing` through [`RawListing`], so every
/// instance has a non-empty, duplicate-free category list and a finite
/// rating in `0.0..=5.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawListing")]
pub struct BusinessListing {
    pub id: String,
    pub name: String,
    pub image: String,
    pub category: Vec<String>,
    pub rating: f64,
    pub price_range: String,
    pub description: String,
    pub location: String,
}

impl BusinessListing {
    pub fn has_category(&self, tag: &str) -> bool {
        self.category.iter().any(|c| c == tag)
    }
}

/// Category column as it arrives: older rows carry a single tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CategoryField {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for CategoryField {
    fn from(tag: &str) -> Self {
        CategoryField::One(tag.to_string())
    }
}

impl From<Vec<&str>> for CategoryField {
    fn from(tags: Vec<&str>) -> Self {
        CategoryField::Many(tags.into_iter().map(String::from).collect())
    }
}

/// Listing row before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawListing {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    pub category: CategoryField,
    pub rating: f64,
    #[serde(alias = "priceRange")]
    pub price_range: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListingError {
    #[error("listing {0} has no category")]
    NoCategory(String),
    #[error("listing {id} has rating {rating} outside 0.0..=5.0")]
    RatingOutOfRange { id: String, rating: f64 },
}

impl TryFrom<RawListing> for BusinessListing {
    type Error = ListingError;

    fn try_from(raw: RawListing) -> Result<Self, Self::Error> {
        let category = normalize_categories(raw.category);
        if category.is_empty() {
            return Err(ListingError::NoCategory(raw.id));
        }
        if !raw.rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&raw.rating) {
            return Err(ListingError::RatingOutOfRange {
                id: raw.id,
                rating: raw.rating,
            });
        }
        Ok(Self {
            id: raw.id,
            name: raw.name,
            image: raw.image,
            category,
            rating: raw.rating,
            price_range: raw.price_range,
            description: raw.description,
            location: raw.location,
        })
    }
}

/// Trim tags, drop blanks and duplicates. First occurrence wins.
pub fn normalize_categories(field: CategoryField) -> Vec<String> {
    let tags = match field {
        CategoryField::One(tag) => vec![tag],
        CategoryField::Many(tags) => tags,
    };
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

/// Realtime change on the `businesses` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert { row: BusinessListing },
    Update { row: BusinessListing },
    Delete { id: String },
}

impl ChangeEvent {
    pub fn listing_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { row } | ChangeEvent::Update { row } => &row.id,
            ChangeEvent::Delete { id } => id,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

/// Wall-clock time of day at minute resolution, rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeLabel(u16);

const MINUTES_PER_DAY: u16 = 24 * 60;

impl TimeLabel {
    pub const fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes < MINUTES_PER_DAY {
            Some(Self(minutes))
        } else {
            None
        }
    }

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour as u16 * 60 + minute as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time label: {0:?}")]
pub struct TimeLabelError(String);

impl FromStr for TimeLabel {
    type Err = TimeLabelError;

    /// Accepts `HH:MM`, and `HH:MM:00` as returned by SQL `time` columns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeLabelError(s.to_string());
        let mut parts = s.trim().split(':');
        let hour = parts.next().and_then(two_digits).ok_or_else(bad)?;
        let minute = parts.next().and_then(two_digits).ok_or_else(bad)?;
        match parts.next() {
            None | Some("00") => {}
            Some(_) => return Err(bad()),
        }
        if parts.next().is_some() || hour >= 24 {
            return Err(bad());
        }
        Self::new(hour, minute).ok_or_else(bad)
    }
}

/// One or two ASCII digits, no sign.
fn two_digits(p: &str) -> Option<u8> {
    if p.is_empty() || p.len() > 2 || !p.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    p.parse().ok()
}

impl TryFrom<String> for TimeLabel {
    type Error = TimeLabelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeLabel> for String {
    fn from(t: TimeLabel) -> Self {
        t.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reservation status: {0:?}")]
pub struct StatusError(String);

impl FromStr for ReservationStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(StatusError(other.to_string())),
        }
    }
}

/// A stored reservation of one (date, time) slot at one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSlot {
    pub id: Ulid,
    pub business_id: String,
    pub user_id: String,
    pub reservation_date: NaiveDate,
    pub reservation_time: TimeLabel,
    pub status: ReservationStatus,
}

impl ReservationSlot {
    pub fn is_at(&self, date: NaiveDate, time: TimeLabel) -> bool {
        self.reservation_date == date && self.reservation_time == time
    }
}

/// Insert payload for a reservation; storage assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub business_id: String,
    pub user_id: String,
    pub reservation_date: NaiveDate,
    pub reservation_time: TimeLabel,
    pub status: ReservationStatus,
}

impl NewReservation {
    pub fn into_slot(self, id: Ulid) -> ReservationSlot {
        ReservationSlot {
            id,
            business_id: self.business_id,
            user_id: self.user_id,
            reservation_date: self.reservation_date,
            reservation_time: self.reservation_time,
            status: self.status,
        }
    }
}

/// A reservation joined with the business it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationHistoryEntry {
    pub reservation: ReservationSlot,
    pub business_name: Option<String>,
    pub business_image: Option<String>,
}

// ── Users ────────────────────────────────────────────────────────

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
}

/// Row of the `users` table, written once at sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
}

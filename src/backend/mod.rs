mod memory;
mod postgres;

pub use memory::InMemoryBackend;
pub use postgres::{
    ChangeNotice, LISTINGS_CHANNEL, PgBackend, SCHEMA, SLOT_UNIQUE_INDEX, decode_notification,
};

use async_trait::async_trait;

use crate::model::*;
use crate::notify::{Subscription, Topic};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The request never completed (connection refused, dropped, ...).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Another live reservation already holds this (business, date, time).
    #[error("reservation slot already taken")]
    SlotTaken,
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("referenced row missing: {0}")]
    MissingReference(String),
    /// The backend refused the write for another reason (check constraint, ...).
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

/// The managed backend: row storage, auth session and realtime changes.
///
/// Each method is one round trip. Implementations enforce slot uniqueness
/// among non-cancelled reservations themselves; callers only check it as a
/// courtesy.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `select * from businesses`. Rows that fail normalization are skipped.
    async fn fetch_listings(&self) -> Result<Vec<BusinessListing>, BackendError>;

    async fn fetch_listing(&self, id: &str) -> Result<Option<BusinessListing>, BackendError>;

    async fn fetch_reservations(
        &self,
        business_id: &str,
    ) -> Result<Vec<ReservationSlot>, BackendError>;

    /// Reservations of one user joined with business name and image, newest
    /// date first.
    async fn reservation_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationHistoryEntry>, BackendError>;

    /// Store a reservation and return the stored row.
    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<ReservationSlot, BackendError>;

    async fn insert_profile(&self, profile: UserProfile) -> Result<UserProfile, BackendError>;

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BackendError>;

    async fn current_user(&self) -> Result<Option<UserIdentity>, BackendError>;
}

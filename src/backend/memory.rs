use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{NotifyHub, Subscription, Topic};

use super::{Backend, BackendError};

type SharedReservations = Arc<Mutex<Vec<ReservationSlot>>>;

/// Process-local stand-in for the managed backend.
///
/// Listings are written through the admin methods (`upsert_listing`,
/// `delete_listing`), which publish change events like the hosted realtime
/// feed would. Reservation inserts for one business are serialized behind a
/// per-business mutex, so the slot check and the write are atomic.
pub struct InMemoryBackend {
    /// id → (insertion sequence, row). Sequence keeps `fetch_listings` stable.
    listings: DashMap<String, (u64, BusinessListing)>,
    next_seq: AtomicU64,
    /// business id → its reservations.
    reservations: DashMap<String, SharedReservations>,
    users: DashMap<String, UserProfile>,
    session: RwLock<Option<UserIdentity>>,
    notify: Arc<NotifyHub>,
    offline: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            listings: DashMap::new(),
            next_seq: AtomicU64::new(0),
            reservations: DashMap::new(),
            users: DashMap::new(),
            session: RwLock::new(None),
            notify: Arc::new(NotifyHub::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn with_listings(listings: impl IntoIterator<Item = BusinessListing>) -> Self {
        let backend = Self::new();
        for listing in listings {
            backend.upsert_listing(listing);
        }
        backend
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    // ── Admin side (the "external source") ───────────────────

    /// Insert or replace a listing and publish the change.
    pub fn upsert_listing(&self, listing: BusinessListing) -> ChangeEvent {
        let event = match self.listings.get_mut(&listing.id) {
            Some(mut entry) => {
                entry.1 = listing.clone();
                ChangeEvent::Update { row: listing }
            }
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                self.listings.insert(listing.id.clone(), (seq, listing.clone()));
                ChangeEvent::Insert { row: listing }
            }
        };
        self.notify.publish(&event);
        event
    }

    /// Remove a listing and its reservations. Returns false if it did not exist.
    pub fn delete_listing(&self, id: &str) -> bool {
        if self.listings.remove(id).is_none() {
            return false;
        }
        self.reservations.remove(id);
        self.notify.publish(&ChangeEvent::Delete { id: id.to_string() });
        true
    }

    pub async fn sign_in(&self, identity: UserIdentity) {
        *self.session.write().await = Some(identity);
    }

    pub async fn sign_out(&self) {
        *self.session.write().await = None;
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Move a reservation to another status. Leaving `cancelled` re-checks
    /// the slot.
    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<(), BackendError> {
        self.ensure_online()?;
        for slots in self.reservation_sets() {
            let mut guard = slots.lock().await;
            let Some(pos) = guard.iter().position(|r| r.id == id) else {
                continue;
            };
            let current = &guard[pos];
            if current.status == ReservationStatus::Cancelled
                && status != ReservationStatus::Cancelled
            {
                check_slot_free(&guard, current.reservation_date, current.reservation_time)?;
            }
            guard[pos].status = status;
            return Ok(());
        }
        Err(BackendError::MissingReference(format!("reservation {id}")))
    }

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    fn ensure_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    /// Snapshot of the per-business handles; never hold DashMap refs across
    /// an await.
    fn reservation_sets(&self) -> Vec<SharedReservations> {
        self.reservations.iter().map(|e| e.value().clone()).collect()
    }
}

/// Storage-side uniqueness: at most one non-cancelled reservation per
/// (date, time) within one business.
pub(crate) fn check_slot_free(
    slots: &[ReservationSlot],
    date: NaiveDate,
    time: TimeLabel,
) -> Result<(), BackendError> {
    match slots
        .iter()
        .find(|r| r.is_at(date, time) && r.status != ReservationStatus::Cancelled)
    {
        Some(existing) => {
            tracing::debug!("slot {date} {time} held by reservation {}", existing.id);
            Err(BackendError::SlotTaken)
        }
        None => Ok(()),
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn fetch_listings(&self) -> Result<Vec<BusinessListing>, BackendError> {
        self.ensure_online()?;
        let mut rows: Vec<(u64, BusinessListing)> =
            self.listings.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, l)| l).collect())
    }

    async fn fetch_listing(&self, id: &str) -> Result<Option<BusinessListing>, BackendError> {
        self.ensure_online()?;
        Ok(self.listings.get(id).map(|e| e.value().1.clone()))
    }

    async fn fetch_reservations(
        &self,
        business_id: &str,
    ) -> Result<Vec<ReservationSlot>, BackendError> {
        self.ensure_online()?;
        let Some(slots) = self.reservations.get(business_id).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = slots.lock().await;
        Ok(guard.clone())
    }

    async fn reservation_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<ReservationHistoryEntry>, BackendError> {
        self.ensure_online()?;
        let mut mine = Vec::new();
        for slots in self.reservation_sets() {
            let guard = slots.lock().await;
            mine.extend(guard.iter().filter(|r| r.user_id == user_id).cloned());
        }
        mine.sort_by(|a, b| {
            b.reservation_date
                .cmp(&a.reservation_date)
                .then(b.reservation_time.cmp(&a.reservation_time))
        });
        Ok(mine
            .into_iter()
            .map(|reservation| {
                let business = self
                    .listings
                    .get(&reservation.business_id)
                    .map(|e| (e.value().1.name.clone(), e.value().1.image.clone()));
                let (business_name, business_image) = business.unzip();
                ReservationHistoryEntry {
                    reservation,
                    business_name,
                    business_image,
                }
            })
            .collect())
    }

    async fn insert_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<ReservationSlot, BackendError> {
        self.ensure_online()?;
        if !self.listings.contains_key(&reservation.business_id) {
            return Err(BackendError::MissingReference(format!(
                "business {}",
                reservation.business_id
            )));
        }
        let slots = self
            .reservations
            .entry(reservation.business_id.clone())
            .or_default()
            .clone();
        let mut guard = slots.lock().await;
        if reservation.status != ReservationStatus::Cancelled {
            check_slot_free(
                &guard,
                reservation.reservation_date,
                reservation.reservation_time,
            )?;
        }
        let stored = reservation.into_slot(Ulid::new());
        guard.push(stored.clone());
        Ok(stored)
    }

    async fn insert_profile(&self, profile: UserProfile) -> Result<UserProfile, BackendError> {
        self.ensure_online()?;
        match self.users.entry(profile.id.clone()) {
            Entry::Occupied(_) => Err(BackendError::Duplicate(format!("user {}", profile.id))),
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                Ok(profile)
            }
        }
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, BackendError> {
        self.ensure_online()?;
        Ok(self.notify.subscribe(topic))
    }

    async fn current_user(&self) -> Result<Option<UserIdentity>, BackendError> {
        self.ensure_online()?;
        Ok(self.session.read().await.clone())
    }
}

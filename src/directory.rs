use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};
use crate::config::Config;
use crate::error::{DirectoryError, ValidationError};
use crate::limits::MAX_FULL_NAME_LEN;
use crate::listing::ListingStore;
use crate::model::*;
use crate::notify::{Subscription, Topic};
use crate::observability::*;
use crate::reservation::{AvailabilityChecker, OccupancyPolicy};

/// Client facade over a [`Backend`]. Every call is bounded by `timeout` and
/// recorded in the backend call metrics.
#[derive(Clone)]
pub struct Directory {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    occupancy: OccupancyPolicy,
}

impl Directory {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration, occupancy: OccupancyPolicy) -> Self {
        Self {
            backend,
            timeout,
            occupancy,
        }
    }

    pub fn from_config(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self::new(backend, config.call_timeout, config.occupancy)
    }

    pub fn occupancy(&self) -> OccupancyPolicy {
        self.occupancy
    }

    /// Run one backend call under the timeout and record it. The outer error
    /// is the timeout; the inner one is whatever the backend answered.
    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<Result<T, BackendError>, DirectoryError> {
        let start = Instant::now();
        let Ok(result) = tokio::time::timeout(self.timeout, fut).await else {
            warn!(op, "backend call timed out after {:?}", self.timeout);
            metrics::counter!(BACKEND_CALLS_TOTAL, "op" => op, "status" => "timeout").increment(1);
            return Err(DirectoryError::Timeout(self.timeout));
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(BACKEND_CALLS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(BACKEND_CALL_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(op, "backend error: {e}");
        }
        Ok(result)
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, DirectoryError> {
        self.timed(op, fut).await?.map_err(into_directory_error)
    }

    /// Replace the store with a fresh snapshot. On failure the prior contents
    /// stay in place and `false` is returned.
    pub async fn load_listings(&self, store: &mut ListingStore) -> bool {
        match self.call("fetch_listings", self.backend.fetch_listings()).await {
            Ok(listings) => {
                info!("loaded {} listings", listings.len());
                store.replace_all(listings);
                true
            }
            Err(e) => {
                warn!("listing load failed, keeping {} cached: {e}", store.len());
                metrics::counter!(LISTING_LOAD_FAILURES_TOTAL).increment(1);
                false
            }
        }
    }

    pub async fn fetch_business(&self, id: &str) -> Result<Option<BusinessListing>, DirectoryError> {
        self.call("fetch_listing", self.backend.fetch_listing(id)).await
    }

    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription, DirectoryError> {
        self.call("subscribe", self.backend.subscribe(topic)).await
    }

    /// Load the reservations of one business into a checker.
    pub async fn open_checker(&self, business_id: &str) -> Result<AvailabilityChecker, DirectoryError> {
        let rows = self
            .call("fetch_reservations", self.backend.fetch_reservations(business_id))
            .await?;
        Ok(AvailabilityChecker::new(business_id, rows, self.occupancy))
    }

    /// Submit a reservation for the signed-in user.
    ///
    /// The local check rejects slots the checker already knows are taken; the
    /// backend rejects the rest. On success the stored row is appended to the
    /// checker. On any failure the checker is left untouched.
    pub async fn reserve(
        &self,
        checker: &mut AvailabilityChecker,
        date: Option<NaiveDate>,
        time: Option<TimeLabel>,
    ) -> Result<ReservationSlot, DirectoryError> {
        let result = self.submit(checker, date, time).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => e.label(),
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        let slot = result?;
        info!(
            business = checker.business_id(),
            "reserved {} at {}", slot.reservation_date, slot.reservation_time
        );
        checker.record(slot.clone());
        Ok(slot)
    }

    async fn submit(
        &self,
        checker: &AvailabilityChecker,
        date: Option<NaiveDate>,
        time: Option<TimeLabel>,
    ) -> Result<ReservationSlot, DirectoryError> {
        let (date, time) = checker.validate(date, time)?;
        let user = self
            .call("current_user", self.backend.current_user())
            .await?
            .ok_or(DirectoryError::Unauthenticated)?;

        let conflict = || DirectoryError::Conflict {
            business_id: checker.business_id().to_string(),
            date,
            time,
        };
        if checker.is_reserved(date, time) {
            return Err(conflict());
        }

        let request = NewReservation {
            business_id: checker.business_id().to_string(),
            user_id: user.id,
            reservation_date: date,
            reservation_time: time,
            status: ReservationStatus::Pending,
        };
        match self
            .timed("insert_reservation", self.backend.insert_reservation(request))
            .await?
        {
            Ok(slot) => Ok(slot),
            Err(BackendError::SlotTaken) => Err(conflict()),
            Err(e) => Err(into_directory_error(e)),
        }
    }

    /// The signed-in user's reservations, newest date first.
    pub async fn reservation_history(&self) -> Result<Vec<ReservationHistoryEntry>, DirectoryError> {
        let user = self
            .call("current_user", self.backend.current_user())
            .await?
            .ok_or(DirectoryError::Unauthenticated)?;
        self.call("reservation_history", self.backend.reservation_history(&user.id))
            .await
    }

    /// Create the profile row for the signed-in user. Write-once.
    pub async fn register_profile(&self, full_name: &str) -> Result<UserProfile, DirectoryError> {
        let full_name = full_name.trim();
        if full_name.len() > MAX_FULL_NAME_LEN {
            return Err(ValidationError::NameTooLong(MAX_FULL_NAME_LEN).into());
        }
        let user = self
            .call("current_user", self.backend.current_user())
            .await?
            .ok_or(DirectoryError::Unauthenticated)?;
        let profile = UserProfile {
            id: user.id,
            email: user.email,
            full_name: full_name.to_string(),
        };
        self.call("insert_profile", self.backend.insert_profile(profile))
            .await
    }
}

fn into_directory_error(e: BackendError) -> DirectoryError {
    match e {
        BackendError::Unavailable(msg) => DirectoryError::Network(msg),
        // `reserve` turns this into a `Conflict` naming the slot
        BackendError::SlotTaken => DirectoryError::AlreadyExists("reservation slot".into()),
        BackendError::Duplicate(key) => DirectoryError::AlreadyExists(key),
        BackendError::MissingReference(what) => DirectoryError::NotFound(what),
        BackendError::Rejected(msg) | BackendError::Malformed(msg) => DirectoryError::Malformed(msg),
    }
}

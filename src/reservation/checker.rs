use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::model::{ReservationSlot, ReservationStatus, TimeLabel};

use super::slots::{is_bookable, time_slots};

/// Which reservations hold on to their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OccupancyPolicy {
    /// Cancelled reservations free their slot. Matches the storage constraint.
    #[default]
    ExcludeCancelled,
    /// Every reservation blocks its slot regardless of status.
    IncludeCancelled,
}

impl OccupancyPolicy {
    pub fn occupies(self, status: ReservationStatus) -> bool {
        match self {
            OccupancyPolicy::ExcludeCancelled => status != ReservationStatus::Cancelled,
            OccupancyPolicy::IncludeCancelled => true,
        }
    }
}

/// Local view of one business's reservations, used to gate date/time
/// selection. Advisory only: the storage layer has the final word.
#[derive(Debug, Clone)]
pub struct AvailabilityChecker {
    business_id: String,
    reservations: Vec<ReservationSlot>,
    occupancy: OccupancyPolicy,
}

impl AvailabilityChecker {
    pub fn new(
        business_id: impl Into<String>,
        mut reservations: Vec<ReservationSlot>,
        occupancy: OccupancyPolicy,
    ) -> Self {
        let business_id = business_id.into();
        reservations.retain(|r| r.business_id == business_id);
        Self {
            business_id,
            reservations,
            occupancy,
        }
    }

    pub fn business_id(&self) -> &str {
        &self.business_id
    }

    pub fn reservations(&self) -> &[ReservationSlot] {
        &self.reservations
    }

    pub fn occupancy(&self) -> OccupancyPolicy {
        self.occupancy
    }

    pub fn is_reserved(&self, date: NaiveDate, time: TimeLabel) -> bool {
        self.reservations
            .iter()
            .any(|r| r.is_at(date, time) && self.occupancy.occupies(r.status))
    }

    pub fn is_date_fully_booked(&self, date: NaiveDate) -> bool {
        time_slots().into_iter().all(|t| self.is_reserved(date, t))
    }

    pub fn available_slots(&self, date: NaiveDate) -> Vec<TimeLabel> {
        time_slots()
            .into_iter()
            .filter(|t| !self.is_reserved(date, *t))
            .collect()
    }

    /// Check that both halves of the slot were picked and that the time is on
    /// the grid.
    pub fn validate(
        &self,
        date: Option<NaiveDate>,
        time: Option<TimeLabel>,
    ) -> Result<(NaiveDate, TimeLabel), ValidationError> {
        let date = date.ok_or(ValidationError::MissingDate)?;
        let time = time.ok_or(ValidationError::MissingTime)?;
        if !is_bookable(time) {
            return Err(ValidationError::UnknownTimeSlot(time));
        }
        Ok((date, time))
    }

    /// Optimistic append of a row the backend just stored.
    pub(crate) fn record(&mut self, slot: ReservationSlot) {
        if slot.business_id == self.business_id {
            self.reservations.push(slot);
        }
    }
}

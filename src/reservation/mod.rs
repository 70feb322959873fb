mod checker;
mod slots;

pub use checker::{AvailabilityChecker, OccupancyPolicy};
pub use slots::{
    CLOSING_MINUTE, OPENING_MINUTE, SLOT_MINUTES, SLOTS_PER_DAY, is_bookable, time_slots,
};

use crate::model::TimeLabel;

/// First bookable minute of the day (09:00).
pub const OPENING_MINUTE: u16 = 9 * 60;

/// Slots start strictly before this minute (21:00).
pub const CLOSING_MINUTE: u16 = 21 * 60;

pub const SLOT_MINUTES: u16 = 30;

pub const SLOTS_PER_DAY: usize = ((CLOSING_MINUTE - OPENING_MINUTE) / SLOT_MINUTES) as usize;

/// The fixed half-hour grid: 09:00, 09:30, … 20:30.
pub fn time_slots() -> Vec<TimeLabel> {
    (OPENING_MINUTE..CLOSING_MINUTE)
        .step_by(SLOT_MINUTES as usize)
        .filter_map(TimeLabel::from_minutes)
        .collect()
}

/// True if `time` lies on the grid returned by [`time_slots`].
pub fn is_bookable(time: TimeLabel) -> bool {
    let m = time.minutes();
    (OPENING_MINUTE..CLOSING_MINUTE).contains(&m) && (m - OPENING_MINUTE) % SLOT_MINUTES == 0
}

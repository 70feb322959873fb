/// Lowest rating a listing may carry.
pub const MIN_RATING: f64 = 0.0;

/// Highest rating a listing may carry.
pub const MAX_RATING: f64 = 5.0;

/// Minimum rating selected when the filter is reset.
pub const DEFAULT_MIN_RATING: f64 = 1.0;

/// Buffered change events per notify topic before slow subscribers lag.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on any single backend call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Longest full name accepted on profile registration, in bytes.
pub const MAX_FULL_NAME_LEN: usize = 256;

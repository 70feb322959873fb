use std::time::Duration;

use chrono::NaiveDate;

use crate::model::TimeLabel;

/// Rejected at the call boundary, before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no reservation date selected")]
    MissingDate,
    #[error("no reservation time selected")]
    MissingTime,
    #[error("{0} is not a bookable time slot")]
    UnknownTimeSlot(TimeLabel),
    #[error("full name longer than {0} bytes")]
    NameTooLong(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no signed-in user")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("slot {time} on {date} is already reserved at business {business_id}")]
    Conflict {
        business_id: String,
        date: NaiveDate,
        time: TimeLabel,
    },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("malformed data from backend: {0}")]
    Malformed(String),
}

impl DirectoryError {
    /// Transport-level failure; the caller may retry by hand.
    pub fn is_network(&self) -> bool {
        matches!(self, DirectoryError::Network(_) | DirectoryError::Timeout(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DirectoryError::Network(_) => "network",
            DirectoryError::Timeout(_) => "timeout",
            DirectoryError::Validation(_) => "validation",
            DirectoryError::Unauthenticated => "unauthenticated",
            DirectoryError::NotFound(_) => "not_found",
            DirectoryError::Conflict { .. } => "conflict",
            DirectoryError::AlreadyExists(_) => "already_exists",
            DirectoryError::Malformed(_) => "malformed",
        }
    }
}

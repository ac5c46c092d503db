//! Error types for the mess core
//!
//! Every expected business-rule rejection has its own variant carrying the
//! values needed to explain it. Only `Database`, `Io` and `Serialization`
//! represent unexpected faults.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Money, SeatStatus};

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried
    Validation,
    /// Invariant or uniqueness clash with current state
    Conflict,
    /// Business-rule rejection in the current state
    State,
    NotFound,
    /// Storage or infrastructure failure
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    // Validation
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("Invalid grocery item {field}: {reason}")]
    InvalidGroceryItem { field: &'static str, reason: String },

    #[error("Invalid coordinates: longitude {longitude}, latitude {latitude}")]
    InvalidCoordinates { longitude: f64, latitude: f64 },

    #[error("Seat status {status} does not allow occupant {occupant:?}")]
    InvalidOccupantBinding {
        status: SeatStatus,
        occupant: Option<Uuid>,
    },

    #[error("Invalid date range: {start} to {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    // Conflict
    #[error("Seat {seat_number} already exists in hostel {hostel_id}")]
    DuplicateSeat { hostel_id: Uuid, seat_number: String },

    #[error("A hostel with short code {0} already exists")]
    DuplicateShortCode(String),

    #[error("A user with {0} already exists")]
    DuplicateUser(String),

    #[error("A {entity} named {name:?} already exists")]
    DuplicateName { entity: &'static str, name: String },

    #[error("User {user_id} already has an active membership in hostel {hostel_id}")]
    AlreadyMember { user_id: Uuid, hostel_id: Uuid },

    #[error(
        "Seat capacity exceeded: occupied {occupied} + available {available_for_rent} + maintenance {in_maintenance} > total {total}"
    )]
    SeatCapacityExceeded {
        total: u32,
        occupied: u32,
        available_for_rent: u32,
        in_maintenance: u32,
    },

    #[error("Seat {seat_id} is already occupied by {occupant_id}")]
    SeatAlreadyOccupied { seat_id: Uuid, occupant_id: Uuid },

    #[error("User {user_id} already occupies seat {seat_id}")]
    OccupantAlreadySeated { user_id: Uuid, seat_id: Uuid },

    #[error("Concurrent modification of {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("Billing period {start} to {end} overlaps an already closed period")]
    BillingPeriodOverlap { start: NaiveDate, end: NaiveDate },

    // State
    #[error("User {user_id} is not a member of hostel {hostel_id} on {date}")]
    NotAMember {
        user_id: Uuid,
        hostel_id: Uuid,
        date: NaiveDate,
    },

    #[error("Hostel {hostel_id} service is suspended until {until}: {reason}")]
    HostelServiceSuspended {
        hostel_id: Uuid,
        until: DateTime<Utc>,
        reason: String,
    },

    #[error("Meals for {date} can no longer be edited (window closed at {closed_at})")]
    EditWindowClosed {
        date: NaiveDate,
        closed_at: DateTime<Utc>,
    },

    #[error("Billing period containing {date} is closed for hostel {hostel_id}")]
    BillingPeriodClosed { hostel_id: Uuid, date: NaiveDate },

    #[error("No meals recorded in period; grocery cost {total_grocery_cost} cannot be shared")]
    NoMealsRecorded { total_grocery_cost: Money },

    // Not found
    #[error("Hostel not found: {0}")]
    HostelNotFound(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput { .. }
            | Error::InvalidGroceryItem { .. }
            | Error::InvalidCoordinates { .. }
            | Error::InvalidOccupantBinding { .. }
            | Error::InvalidDateRange { .. } => ErrorKind::Validation,

            Error::DuplicateSeat { .. }
            | Error::DuplicateShortCode(_)
            | Error::DuplicateUser(_)
            | Error::DuplicateName { .. }
            | Error::AlreadyMember { .. }
            | Error::SeatCapacityExceeded { .. }
            | Error::SeatAlreadyOccupied { .. }
            | Error::OccupantAlreadySeated { .. }
            | Error::ConcurrentModification { .. }
            | Error::BillingPeriodOverlap { .. } => ErrorKind::Conflict,

            Error::Authentication(_)
            | Error::NotAMember { .. }
            | Error::HostelServiceSuspended { .. }
            | Error::EditWindowClosed { .. }
            | Error::BillingPeriodClosed { .. }
            | Error::NoMealsRecorded { .. } => ErrorKind::State,

            Error::HostelNotFound(_) | Error::NotFound { .. } => ErrorKind::NotFound,

            Error::Database(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Safe to retry automatically with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConcurrentModification { .. } => true,
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_concurrent_modification_and_busy_are_retryable() {
        let cas = Error::ConcurrentModification {
            entity: "seat",
            id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };
        assert!(cas.is_retryable());
        assert_eq!(cas.kind(), ErrorKind::Conflict);

        let busy = Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());
        assert_eq!(busy.kind(), ErrorKind::Internal);

        let dup = Error::DuplicateSeat {
            hostel_id: Uuid::new_v4(),
            seat_number: "12".to_string(),
        };
        assert!(!dup.is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::HostelNotFound("DH402A".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::InvalidGroceryItem {
                field: "quantity",
                reason: "must be positive".into()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::NoMealsRecorded {
                total_grocery_cost: Money(100)
            }
            .kind(),
            ErrorKind::State
        );
    }
}

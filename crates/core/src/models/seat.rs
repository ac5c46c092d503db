//! Seat model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Occupied,
    AvailableForRent,
    InMaintenance,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Occupied => "OCCUPIED",
            SeatStatus::AvailableForRent => "AVAILABLE_FOR_RENT",
            SeatStatus::InMaintenance => "IN_MAINTENANCE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OCCUPIED" => Some(SeatStatus::Occupied),
            "AVAILABLE_FOR_RENT" => Some(SeatStatus::AvailableForRent),
            "IN_MAINTENANCE" => Some(SeatStatus::InMaintenance),
            _ => None,
        }
    }

    /// Occupied seats must name an occupant; other states must not
    pub fn accepts_occupant(&self, occupant: Option<Uuid>) -> bool {
        matches!(
            (self, occupant),
            (SeatStatus::Occupied, Some(_))
                | (SeatStatus::AvailableForRent, None)
                | (SeatStatus::InMaintenance, None)
        )
    }
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rentable bed. Seat rows are the source of truth for the hostel's seat tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub seat_number: String,
    pub room_number: String,
    pub status: SeatStatus,
    pub rent: Money,
    pub occupant_id: Option<Uuid>,
    /// Optimistic concurrency token, bumped on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Seat {
    pub fn new(hostel_id: Uuid, seat_number: String, room_number: String, rent: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hostel_id,
            seat_number,
            room_number,
            status: SeatStatus::AvailableForRent,
            rent,
            occupant_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

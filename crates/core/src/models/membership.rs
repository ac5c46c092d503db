//! Hostel membership model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

/// A user's stay in a hostel.
///
/// The membership covers every date in `[join_date, leaving_date)`; without a
/// leaving date it is open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub user_id: Uuid,
    pub seat_id: Option<Uuid>,
    pub join_date: NaiveDate,
    pub leaving_date: Option<NaiveDate>,
    pub security_paid: bool,
    pub security_amount: Option<Money>,
    pub agreed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(hostel_id: Uuid, user_id: Uuid, join_date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            hostel_id,
            user_id,
            seat_id: None,
            join_date,
            leaving_date: None,
            security_paid: false,
            security_amount: None,
            agreed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.join_date <= date && self.leaving_date.map_or(true, |leaving| date < leaving)
    }
}

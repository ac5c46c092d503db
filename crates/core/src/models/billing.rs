//! Billing period, fine and bill models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

/// A date range whose meals and bazars are frozen for billing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub closed_at: DateTime<Utc>,
    pub closed_by: Uuid,
}

impl BillingPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A manually assessed fine for breaking a hostel rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub user_id: Uuid,
    pub rule_order: Option<u32>,
    pub amount: Money,
    pub reason: String,
    pub assessed_on: NaiveDate,
    pub assessed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Input for assessing a fine
#[derive(Debug, Clone, Deserialize)]
pub struct NewFine {
    pub user_id: Uuid,
    /// Rule broken; its fine text supplies the amount when `amount` is absent
    pub rule_order: Option<u32>,
    pub amount: Option<Money>,
    pub reason: String,
    pub assessed_on: NaiveDate,
    pub assessed_by: Uuid,
}

/// One member's line of a bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBill {
    pub user_id: Uuid,
    /// Weighted meal units in hundredths
    pub meal_units: u64,
    pub meal_cost: Money,
    pub seat_rent: Money,
    pub fines: Money,
    pub total: Money,
}

/// Cost apportionment of a hostel for an inclusive date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub hostel_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_grocery_cost: Money,
    /// Weighted meal units in hundredths
    pub total_meal_units: u64,
    /// Minor units per whole meal unit; informational only
    pub cost_per_meal_unit: f64,
    pub members: Vec<MemberBill>,
    /// The range is exactly a closed billing period
    pub is_final: bool,
}

impl Bill {
    pub fn member(&self, user_id: Uuid) -> Option<&MemberBill> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn meal_cost_sum(&self) -> Money {
        self.members.iter().map(|m| m.meal_cost).sum()
    }
}

//! Meal record model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MealWeights;

/// Meals taken on one day: the member's own plus guests, per meal type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealCounts {
    pub breakfast: u32,
    pub lunch: u32,
    pub dinner: u32,
    #[serde(default)]
    pub breakfast_guests: u32,
    #[serde(default)]
    pub lunch_guests: u32,
    #[serde(default)]
    pub dinner_guests: u32,
}

impl MealCounts {
    pub fn new(breakfast: u32, lunch: u32, dinner: u32) -> Self {
        Self {
            breakfast,
            lunch,
            dinner,
            ..Self::default()
        }
    }

    pub fn with_guests(mut self, breakfast: u32, lunch: u32, dinner: u32) -> Self {
        self.breakfast_guests = breakfast;
        self.lunch_guests = lunch;
        self.dinner_guests = dinner;
        self
    }

    pub fn total_meals(&self) -> u64 {
        [
            self.breakfast,
            self.lunch,
            self.dinner,
            self.breakfast_guests,
            self.lunch_guests,
            self.dinner_guests,
        ]
        .iter()
        .map(|&c| c as u64)
        .sum()
    }

    /// Weighted meal units in hundredths
    pub fn weighted_units(&self, weights: &MealWeights) -> u64 {
        (self.breakfast as u64 + self.breakfast_guests as u64) * weights.breakfast as u64
            + (self.lunch as u64 + self.lunch_guests as u64) * weights.lunch as u64
            + (self.dinner as u64 + self.dinner_guests as u64) * weights.dinner as u64
    }
}

/// The single meal record of a user for a date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub hostel_id: Uuid,
    pub date: NaiveDate,
    pub counts: MealCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

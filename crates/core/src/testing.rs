//! Shared fixtures for unit tests

use chrono::{NaiveDate, Utc};

use crate::clock::FixedClock;
use crate::models::{Hostel, HostelType, MealWeights, SeatSummary, User};
use crate::storage::Database;

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Noon UTC on the given day
pub(crate) fn clock_on(y: i32, m: u32, d: u32) -> FixedClock {
    FixedClock::at_date(date(y, m, d))
}

pub(crate) fn seed_user(db: &Database, name: &str) -> User {
    let user = User::new(name.to_string());
    db.users().create(&user).unwrap();
    user
}

/// A hostel with `total` seats and no seat records, owned by a fresh user
pub(crate) fn seed_hostel(db: &Database, code: &str, total: u32) -> Hostel {
    let owner = seed_user(db, "Owner");
    let now = Utc::now();
    let hostel = Hostel {
        id: uuid::Uuid::new_v4(),
        name: format!("Hostel {code}"),
        short_code: code.to_string(),
        hostel_type: HostelType::Boys,
        address: Some("House 12, Road 4".to_string()),
        location: None,
        rules: Vec::new(),
        owner_id: owner.id,
        manager_id: None,
        seats: SeatSummary::with_total(total),
        suspension: None,
        meal_weights: MealWeights::default(),
        created_at: now,
        updated_at: now,
    };
    db.hostels().create(&hostel).unwrap();
    hostel
}

//! Mess Core Library
//!
//! Seats, memberships, meals, groceries and billing for shared hostel
//! messes, persisted in SQLite.

pub mod billing;
pub mod clock;
pub mod config;
pub mod error;
pub mod grocery;
pub mod hostels;
pub mod invariants;
pub mod meals;
pub mod membership;
pub mod models;
pub mod retry;
pub mod seats;
pub mod service;
pub mod storage;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use billing::{apportion, BillingAggregator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{BillingConfig, ConfigError, DatabaseConfig, MealPolicy, MessConfig, NoMealsPolicy};
pub use error::{Error, ErrorKind, Result};
pub use grocery::{GroceryLedger, MarketRegistry, PriceHistory};
pub use hostels::HostelRegistry;
pub use meals::{MealCursor, MealLedger};
pub use membership::MembershipRegistry;
pub use models::*;
pub use retry::RetryPolicy;
pub use seats::{Reconciliation, SeatLedger};
pub use service::MessService;
pub use storage::Database;
pub use users::UserRegistry;

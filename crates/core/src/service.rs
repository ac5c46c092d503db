//! Contract facade
//!
//! `MessService` is the entry point an API layer calls. It owns the
//! database, clock and configuration and hands out short-lived components
//! that borrow them. Write operations are retried per the configured
//! `RetryPolicy` when they fail with a retryable error.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::billing::BillingAggregator;
use crate::clock::Clock;
use crate::config::MessConfig;
use crate::error::{Error, Result};
use crate::grocery::{GroceryLedger, MarketRegistry};
use crate::hostels::HostelRegistry;
use crate::meals::MealLedger;
use crate::membership::MembershipRegistry;
use crate::models::{
    Bazar, Bill, BillingPeriod, GroceryItem, GroceryItemInput, Hostel, MealCounts, MealRecord,
    Membership, NewHostel, Seat, SeatStatus,
};
use crate::seats::SeatLedger;
use crate::storage::Database;
use crate::users::UserRegistry;

pub struct MessService {
    db: Database,
    clock: Arc<dyn Clock>,
    config: MessConfig,
}

impl MessService {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: MessConfig) -> Self {
        Self { db, clock, config }
    }

    /// Open the database named by `config`, creating its directory if needed
    pub fn open(config: MessConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = config
            .database_path()
            .ok_or_else(|| Error::invalid("database.path", "no data directory available"))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&path)?;
        info!(path = %path.display(), schema_version = db.schema_version(), "Database opened");
        Ok(Self::new(db, clock, config))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &MessConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // Components

    pub fn seats(&self) -> SeatLedger<'_> {
        SeatLedger::new(self.db.connection(), self.clock.as_ref())
    }

    pub fn members(&self) -> MembershipRegistry<'_> {
        MembershipRegistry::new(self.db.connection(), self.clock.as_ref())
    }

    pub fn meals(&self) -> MealLedger<'_> {
        MealLedger::new(self.db.connection(), self.clock.as_ref(), self.config.meals)
    }

    pub fn grocery(&self) -> GroceryLedger<'_> {
        GroceryLedger::new(self.db.connection(), self.clock.as_ref())
    }

    pub fn billing(&self) -> BillingAggregator<'_> {
        BillingAggregator::new(
            self.db.connection(),
            self.clock.as_ref(),
            self.config.billing.no_meals,
        )
    }

    pub fn hostels(&self) -> HostelRegistry<'_> {
        HostelRegistry::new(self.db.connection(), self.clock.as_ref())
            .with_default_weights(self.config.billing.default_weights)
    }

    pub fn users(&self) -> UserRegistry<'_> {
        UserRegistry::new(self.db.connection(), self.clock.as_ref())
    }

    pub fn markets(&self) -> MarketRegistry<'_> {
        MarketRegistry::new(self.db.connection(), self.clock.as_ref())
    }

    // Contract operations

    pub fn create_hostel(&self, input: NewHostel) -> Result<Hostel> {
        self.config
            .retry
            .run(|_| self.hostels().create_hostel(input.clone()))
    }

    /// Set a seat's status against its current version, re-reading the
    /// version on every attempt
    #[instrument(skip(self))]
    pub fn set_seat_status(
        &self,
        seat_id: Uuid,
        status: SeatStatus,
        occupant: Option<Uuid>,
    ) -> Result<Seat> {
        self.config.retry.run(|_| {
            let seats = self.seats();
            let current = seats.seat(seat_id)?;
            seats.set_seat_status(seat_id, current.version, status, occupant)
        })
    }

    pub fn join_hostel(
        &self,
        user_id: Uuid,
        short_code: &str,
        join_date: NaiveDate,
        seat_id: Option<Uuid>,
    ) -> Result<Membership> {
        self.config
            .retry
            .run(|_| self.members().join_hostel(user_id, short_code, join_date, seat_id))
    }

    pub fn leave_hostel(&self, user_id: Uuid, leaving_date: NaiveDate) -> Result<Membership> {
        self.config
            .retry
            .run(|_| self.members().leave_hostel(user_id, leaving_date))
    }

    pub fn set_meal_counts(
        &self,
        user_id: Uuid,
        hostel_id: Uuid,
        date: NaiveDate,
        counts: MealCounts,
    ) -> Result<MealRecord> {
        self.config
            .retry
            .run(|_| self.meals().set_meal_counts(user_id, hostel_id, date, counts))
    }

    pub fn create_bazar(
        &self,
        hostel_id: Uuid,
        date: NaiveDate,
        added_by: Option<Uuid>,
    ) -> Result<Bazar> {
        self.config
            .retry
            .run(|_| self.grocery().create_bazar(hostel_id, date, added_by))
    }

    pub fn add_grocery_item(&self, bazar_id: Uuid, input: GroceryItemInput) -> Result<GroceryItem> {
        self.config
            .retry
            .run(|_| self.grocery().add_item(bazar_id, input.clone()))
    }

    pub fn close_billing_period(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        closed_by: Uuid,
    ) -> Result<BillingPeriod> {
        self.config
            .retry
            .run(|_| self.billing().close_billing_period(hostel_id, start, end, closed_by))
    }

    pub fn compute_bill(&self, hostel_id: Uuid, start: NaiveDate, end: NaiveDate) -> Result<Bill> {
        self.config
            .retry
            .run(|_| self.billing().compute_bill(hostel_id, start, end))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{
        GroceryCategory, GroceryUnit, HostelType, Money, NewUser, Quantity, SeatSummary,
    };
    use crate::testing::date;

    fn service(clock: Arc<FixedClock>) -> MessService {
        MessService::new(Database::open_in_memory().unwrap(), clock, MessConfig::default())
    }

    fn register(service: &MessService, name: &str, phone: &str) -> Uuid {
        service
            .users()
            .register_user(NewUser {
                name: name.to_string(),
                phone: Some(phone.to_string()),
                email: None,
                password: None,
            })
            .unwrap()
            .id
    }

    fn new_hostel(code: &str, owner_id: Uuid, total_seats: u32) -> NewHostel {
        NewHostel {
            name: "Mirpur Girls Hostel".to_string(),
            short_code: code.to_string(),
            hostel_type: HostelType::Girls,
            address: "Section 10, Mirpur".to_string(),
            location: None,
            total_seats,
            owner_id,
            manager_id: None,
        }
    }

    #[test]
    fn test_month_end_to_end() {
        let clock = Arc::new(FixedClock::at_date(date(2025, 1, 1)));
        let mess = service(clock.clone());
        let owner = register(&mess, "Owner", "01700000000");
        let a = register(&mess, "Ayesha", "01700000001");
        let b = register(&mess, "Bristi", "01700000002");

        let hostel = mess.create_hostel(new_hostel("dh402a", owner, 10)).unwrap();
        let seat = mess
            .seats()
            .create_seat(hostel.id, "1", "101", Money::major(3000))
            .unwrap();

        mess.join_hostel(a, "DH402A", date(2025, 1, 1), Some(seat.id)).unwrap();
        mess.join_hostel(b, "dh402a", date(2025, 1, 1), None).unwrap();

        let summary = mess.hostels().hostel(hostel.id).unwrap().seats;
        assert_eq!(
            summary,
            SeatSummary {
                total: 10,
                occupied: 1,
                available_for_rent: 0,
                in_maintenance: 0
            }
        );

        for day in 1..=10 {
            mess.set_meal_counts(a, hostel.id, date(2025, 1, day), MealCounts::new(0, 1, 1))
                .unwrap();
        }
        for day in 1..=5 {
            mess.set_meal_counts(b, hostel.id, date(2025, 1, day), MealCounts::new(0, 1, 1))
                .unwrap();
        }

        let bazar = mess.create_bazar(hostel.id, date(2025, 1, 1), Some(owner)).unwrap();
        mess.add_grocery_item(
            bazar.id,
            GroceryItemInput::new(
                "Rice",
                GroceryCategory::RiceGrains,
                Quantity::whole(10),
                GroceryUnit::Kg,
                Money::major(60),
            ),
        )
        .unwrap();
        mess.add_grocery_item(
            bazar.id,
            GroceryItemInput::new(
                "Onion",
                GroceryCategory::Vegetable,
                Quantity::whole(5),
                GroceryUnit::Kg,
                Money::major(40),
            ),
        )
        .unwrap();

        clock.set(date(2025, 2, 1).and_hms_opt(9, 0, 0).unwrap().and_utc());
        mess.close_billing_period(hostel.id, date(2025, 1, 1), date(2025, 1, 31), owner)
            .unwrap();
        let bill = mess
            .compute_bill(hostel.id, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap();

        assert!(bill.is_final);
        assert_eq!(bill.total_grocery_cost, Money::major(800));
        let line_a = bill.member(a).unwrap();
        let line_b = bill.member(b).unwrap();
        assert_eq!(line_a.meal_cost + line_b.meal_cost, Money::major(800));
        assert_eq!(line_a.meal_cost, Money(53_333));
        assert_eq!(line_b.meal_cost, Money(26_667));
        assert_eq!(line_a.total, Money(53_333) + Money::major(3000));

        // The closed month is frozen
        let err = mess
            .set_meal_counts(b, hostel.id, date(2025, 1, 31), MealCounts::new(1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::BillingPeriodClosed { .. } | Error::EditWindowClosed { .. }));
        let err = mess
            .add_grocery_item(
                bazar.id,
                GroceryItemInput::new(
                    "salt",
                    GroceryCategory::SpicesOil,
                    Quantity::whole(1),
                    GroceryUnit::Packet,
                    Money::major(40),
                ),
            )
            .unwrap_err();
        assert!(matches!(err, Error::BillingPeriodClosed { .. }));

        assert_eq!(
            mess.compute_bill(hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap(),
            bill
        );
    }

    #[test]
    fn test_leaving_frees_seat_lazily() {
        let clock = Arc::new(FixedClock::at_date(date(2025, 1, 1)));
        let mess = service(clock.clone());
        let owner = register(&mess, "Owner", "01700000000");
        let a = register(&mess, "Ayesha", "01700000001");
        let hostel = mess.create_hostel(new_hostel("LEAVE1", owner, 2)).unwrap();
        let seat = mess.seats().create_seat(hostel.id, "1", "1", Money::major(1)).unwrap();

        mess.join_hostel(a, "LEAVE1", date(2025, 1, 1), Some(seat.id)).unwrap();
        mess.leave_hostel(a, date(2025, 1, 15)).unwrap();
        assert_eq!(mess.seats().seat(seat.id).unwrap().occupant_id, Some(a));

        clock.set(date(2025, 1, 15).and_hms_opt(8, 0, 0).unwrap().and_utc());
        assert!(mess.members().refresh_user(a).unwrap().is_none());
        assert_eq!(mess.users().user(a).unwrap().current_hostel_id, None);
        let seat = mess.seats().seat(seat.id).unwrap();
        assert_eq!(seat.status, SeatStatus::AvailableForRent);
        assert_eq!(seat.occupant_id, None);
    }

    #[test]
    fn test_racing_occupants_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mess.db");
        let clock = Arc::new(FixedClock::at_date(date(2025, 1, 1)));

        let setup = MessService::new(Database::open(&path).unwrap(), clock.clone(), MessConfig::default());
        let owner = register(&setup, "Owner", "01700000000");
        let a = register(&setup, "Ayesha", "01700000001");
        let b = register(&setup, "Bristi", "01700000002");
        let hostel = setup.create_hostel(new_hostel("RACE1", owner, 4)).unwrap();
        let seat = setup.seats().create_seat(hostel.id, "1", "1", Money::major(1)).unwrap();
        setup.join_hostel(a, "RACE1", date(2025, 1, 1), None).unwrap();
        setup.join_hostel(b, "RACE1", date(2025, 1, 1), None).unwrap();
        let seat_id = seat.id;

        let results: Vec<Result<Seat>> = std::thread::scope(|scope| {
            let handles: Vec<_> = [a, b]
                .into_iter()
                .map(|user| {
                    let path = path.clone();
                    let clock = clock.clone();
                    scope.spawn(move || {
                        let db = Database::open(&path).unwrap();
                        db.set_busy_timeout(Duration::from_secs(10)).unwrap();
                        let mess = MessService::new(db, clock, MessConfig::default());
                        mess.set_seat_status(seat_id, SeatStatus::Occupied, Some(user))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::SeatAlreadyOccupied { .. }))));

        let summary = setup.hostels().hostel(hostel.id).unwrap().seats;
        assert_eq!(summary.occupied, 1);
        assert_eq!(summary.available_for_rent, 0);
    }
}

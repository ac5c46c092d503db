//! Billing aggregator
//!
//! Bills are computed from the ledgers on every call and never stored.
//! Closing a period freezes its meals, bazars and fines, which is what makes
//! a bill over a closed period reproducible.

mod apportion;

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::NoMealsPolicy;
use crate::error::{Error, Result};
use crate::invariants::assert_bill_invariants;
use crate::meals::{MealCursor, DEFAULT_PAGE_SIZE};
use crate::models::{Bill, BillingPeriod, Fine, MemberBill, Money, NewFine};
use crate::storage::{
    with_read_tx, with_write_tx, BazarStore, BillingStore, HostelStore, MealStore,
    MembershipStore, SeatStore, UserStore,
};

pub use apportion::apportion;

#[derive(Default)]
struct MemberTally {
    meal_units: u64,
    seats: BTreeSet<Uuid>,
    fines: Money,
}

pub struct BillingAggregator<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
    no_meals: NoMealsPolicy,
    page_size: usize,
}

impl<'a> BillingAggregator<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock, no_meals: NoMealsPolicy) -> Self {
        Self {
            conn,
            clock,
            no_meals,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Close `[start, end]` for edits. Periods of one hostel never overlap.
    #[instrument(skip(self))]
    pub fn close_billing_period(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        closed_by: Uuid,
    ) -> Result<BillingPeriod> {
        if start > end {
            return Err(Error::InvalidDateRange { start, end });
        }
        with_write_tx(self.conn, |conn| {
            HostelStore::new(conn).get(hostel_id)?;
            UserStore::new(conn).get(closed_by)?;

            let billing = BillingStore::new(conn);
            if billing.find_overlapping(hostel_id, start, end)?.is_some() {
                return Err(Error::BillingPeriodOverlap { start, end });
            }

            let period = BillingPeriod {
                id: Uuid::new_v4(),
                hostel_id,
                start,
                end,
                closed_at: self.clock.now(),
                closed_by,
            };
            billing.insert_period(&period)?;
            info!(hostel_id = %hostel_id, start = %start, end = %end, closed_by = %closed_by, "Billing period closed");
            Ok(period)
        })
    }

    /// Apportion the hostel's grocery cost over `[start, end]` by weighted
    /// meal units and add each member's seat rent and fines
    #[instrument(skip(self))]
    pub fn compute_bill(&self, hostel_id: Uuid, start: NaiveDate, end: NaiveDate) -> Result<Bill> {
        if start > end {
            return Err(Error::InvalidDateRange { start, end });
        }
        let bill = with_read_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;
            let total_grocery_cost =
                BazarStore::new(conn).grand_total_in_range(hostel_id, start, end)?;

            let mut members: BTreeMap<Uuid, MemberTally> = BTreeMap::new();
            for membership in MembershipStore::new(conn).list_overlapping(hostel_id, start, end)? {
                let tally = members.entry(membership.user_id).or_default();
                tally.seats.extend(membership.seat_id);
            }

            let meals = MealCursor::new(MealStore::new(conn), hostel_id, start, end, self.page_size);
            for record in meals {
                let record = record?;
                members.entry(record.user_id).or_default().meal_units +=
                    record.counts.weighted_units(&hostel.meal_weights);
            }

            for fine in BillingStore::new(conn).fines_in_range(hostel_id, start, end)? {
                members.entry(fine.user_id).or_default().fines += fine.amount;
            }

            let total_meal_units: u64 = members.values().map(|t| t.meal_units).sum();
            if total_meal_units == 0
                && total_grocery_cost.minor() > 0
                && self.no_meals == NoMealsPolicy::Reject
            {
                return Err(Error::NoMealsRecorded { total_grocery_cost });
            }

            let shares: Vec<(Uuid, u64)> = members
                .iter()
                .map(|(&user_id, tally)| (user_id, tally.meal_units))
                .collect();
            let meal_costs = apportion(total_grocery_cost, &shares);

            let seats = SeatStore::new(conn);
            let mut lines = Vec::with_capacity(members.len());
            for ((user_id, tally), meal_cost) in members.into_iter().zip(meal_costs) {
                let mut seat_rent = Money::ZERO;
                for seat_id in &tally.seats {
                    seat_rent += seats.get(*seat_id)?.rent;
                }
                lines.push(MemberBill {
                    user_id,
                    meal_units: tally.meal_units,
                    meal_cost,
                    seat_rent,
                    fines: tally.fines,
                    total: meal_cost + seat_rent + tally.fines,
                });
            }

            let cost_per_meal_unit = if total_meal_units == 0 {
                0.0
            } else {
                total_grocery_cost.minor() as f64 * 100.0 / total_meal_units as f64
            };
            let is_final = BillingStore::new(conn)
                .find_exact(hostel_id, start, end)?
                .is_some();

            Ok(Bill {
                hostel_id,
                start,
                end,
                total_grocery_cost,
                total_meal_units,
                cost_per_meal_unit,
                members: lines,
                is_final,
            })
        })?;

        assert_bill_invariants(&bill);
        info!(
            hostel_id = %hostel_id,
            start = %start,
            end = %end,
            total = %bill.total_grocery_cost,
            members = bill.members.len(),
            is_final = bill.is_final,
            "Bill computed"
        );
        Ok(bill)
    }

    /// Record a fine against a member. Without an explicit amount the fine
    /// text of the referenced rule is used.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, date = %input.assessed_on))]
    pub fn assess_fine(&self, hostel_id: Uuid, input: NewFine) -> Result<Fine> {
        let reason = input.reason.trim();
        if reason.is_empty() {
            return Err(Error::invalid("fine.reason", "must not be empty"));
        }
        with_write_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;
            UserStore::new(conn).get(input.assessed_by)?;
            MembershipStore::new(conn)
                .find_covering(input.user_id, input.assessed_on)?
                .filter(|m| m.hostel_id == hostel_id)
                .ok_or(Error::NotAMember {
                    user_id: input.user_id,
                    hostel_id,
                    date: input.assessed_on,
                })?;

            let rule = match input.rule_order {
                Some(order) => Some(
                    hostel
                        .rule(order)
                        .ok_or_else(|| Error::not_found("rule", order))?,
                ),
                None => None,
            };
            let amount = match (input.amount, rule) {
                (Some(amount), _) => amount,
                (None, Some(rule)) => rule
                    .fine
                    .as_deref()
                    .and_then(fine_amount_from_text)
                    .ok_or_else(|| {
                        Error::invalid("fine.amount", format!("rule {} has no usable fine", rule.order))
                    })?,
                (None, None) => {
                    return Err(Error::invalid("fine.amount", "required without a rule"));
                }
            };
            if amount.minor() <= 0 {
                return Err(Error::invalid("fine.amount", format!("{amount} is not positive")));
            }

            let billing = BillingStore::new(conn);
            if billing
                .find_closed_containing(hostel_id, input.assessed_on)?
                .is_some()
            {
                return Err(Error::BillingPeriodClosed {
                    hostel_id,
                    date: input.assessed_on,
                });
            }

            let fine = Fine {
                id: Uuid::new_v4(),
                hostel_id,
                user_id: input.user_id,
                rule_order: input.rule_order,
                amount,
                reason: reason.to_string(),
                assessed_on: input.assessed_on,
                assessed_by: input.assessed_by,
                created_at: self.clock.now(),
            };
            billing.insert_fine(&fine)?;
            info!(fine_id = %fine.id, amount = %fine.amount, "Fine assessed");
            Ok(fine)
        })
    }

    pub fn periods(&self, hostel_id: Uuid) -> Result<Vec<BillingPeriod>> {
        BillingStore::new(self.conn).list_periods(hostel_id)
    }

    pub fn fines(&self, hostel_id: Uuid, start: NaiveDate, end: NaiveDate) -> Result<Vec<Fine>> {
        BillingStore::new(self.conn).fines_in_range(hostel_id, start, end)
    }
}

/// First amount written in a rule's fine text, e.g. "Tk 200 per incident"
fn fine_amount_from_text(text: &str) -> Option<Money> {
    let amount: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    amount.trim_end_matches(['.', ',']).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::MealPolicy;
    use crate::grocery::GroceryLedger;
    use crate::meals::MealLedger;
    use crate::membership::MembershipRegistry;
    use crate::models::{
        GroceryCategory, GroceryItemInput, GroceryUnit, Hostel, MealCounts, Quantity, Rule,
        RuleLevel, SeatStatus, User,
    };
    use crate::seats::SeatLedger;
    use crate::storage::Database;
    use crate::testing::{clock_on, date, seed_hostel, seed_user};

    struct Fixture {
        db: Database,
        clock: FixedClock,
        hostel: Hostel,
    }

    impl Fixture {
        fn new(code: &str) -> Self {
            let db = Database::open_in_memory().unwrap();
            let hostel = seed_hostel(&db, code, 10);
            Self {
                db,
                clock: clock_on(2025, 1, 1),
                hostel,
            }
        }

        fn member(&self, name: &str, seat_id: Option<Uuid>) -> User {
            let user = seed_user(&self.db, name);
            MembershipRegistry::new(self.db.connection(), &self.clock)
                .join_hostel(user.id, &self.hostel.short_code, date(2025, 1, 1), seat_id)
                .unwrap();
            user
        }

        fn eat(&self, user: &User, days: u32, counts: MealCounts) {
            let meals = MealLedger::new(self.db.connection(), &self.clock, MealPolicy::default());
            for day in 1..=days {
                meals
                    .set_meal_counts(user.id, self.hostel.id, date(2025, 1, day), counts)
                    .unwrap();
            }
        }

        fn buy(&self, day: u32, price: Money) {
            let grocery = GroceryLedger::new(self.db.connection(), &self.clock);
            let bazar = grocery
                .create_bazar(self.hostel.id, date(2025, 1, day), None)
                .unwrap();
            let mut input = GroceryItemInput::new(
                "rice",
                GroceryCategory::RiceGrains,
                Quantity::whole(1),
                GroceryUnit::Kg,
                Money::ZERO,
            );
            input.price_per_unit = price;
            grocery.add_item(bazar.id, input).unwrap();
        }

        fn billing(&self) -> BillingAggregator<'_> {
            BillingAggregator::new(self.db.connection(), &self.clock, NoMealsPolicy::Reject)
        }
    }

    #[test]
    fn test_bill_splits_by_meal_units() {
        let f = Fixture::new("BILL1");
        let a = f.member("A", None);
        let b = f.member("B", None);
        // lunch + dinner = 2 units a day
        f.eat(&a, 15, MealCounts::new(0, 1, 1));
        f.eat(&b, 10, MealCounts::new(0, 1, 1));
        f.buy(1, Money::major(500));

        let bill = f.billing().compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert_eq!(bill.total_grocery_cost, Money::major(500));
        assert_eq!(bill.total_meal_units, 5000);
        assert_eq!(bill.cost_per_meal_unit, 1000.0);
        assert_eq!(bill.member(a.id).unwrap().meal_cost, Money::major(300));
        assert_eq!(bill.member(b.id).unwrap().meal_cost, Money::major(200));
        assert_eq!(bill.meal_cost_sum(), Money::major(500));
        assert!(!bill.is_final);
    }

    #[test]
    fn test_bill_conserves_awkward_totals() {
        let f = Fixture::new("BILL2");
        let a = f.member("A", None);
        let b = f.member("B", None);
        let c = f.member("C", None);
        f.eat(&a, 3, MealCounts::new(1, 0, 0));
        f.eat(&b, 7, MealCounts::new(0, 1, 0).with_guests(0, 0, 1));
        f.eat(&c, 2, MealCounts::new(1, 1, 1));
        f.buy(1, Money(100_001));
        f.buy(2, Money(33_333));

        let bill = f.billing().compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert_eq!(bill.total_grocery_cost, Money(133_334));
        assert_eq!(bill.meal_cost_sum(), bill.total_grocery_cost);
        assert_eq!(bill.members.len(), 3);
    }

    #[test]
    fn test_bill_is_idempotent_and_final_once_closed() {
        let f = Fixture::new("BILL3");
        let a = f.member("A", None);
        let b = f.member("B", None);
        f.eat(&a, 5, MealCounts::new(1, 1, 1));
        f.eat(&b, 4, MealCounts::new(0, 1, 1));
        f.buy(2, Money(77_777));

        let billing = f.billing();
        billing
            .close_billing_period(f.hostel.id, date(2025, 1, 1), date(2025, 1, 15), f.hostel.owner_id)
            .unwrap();

        let first = billing.compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 15)).unwrap();
        let second = billing.compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 15)).unwrap();
        assert_eq!(first, second);
        assert!(first.is_final);

        let partial = billing.compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 3)).unwrap();
        assert!(!partial.is_final);
        assert_eq!(partial.total_grocery_cost, Money(77_777));
    }

    #[test]
    fn test_closed_periods_cannot_overlap() {
        let f = Fixture::new("BILL4");
        let billing = f.billing();
        let owner = f.hostel.owner_id;
        billing
            .close_billing_period(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31), owner)
            .unwrap();

        let err = billing
            .close_billing_period(f.hostel.id, date(2025, 1, 31), date(2025, 2, 28), owner)
            .unwrap_err();
        assert!(matches!(err, Error::BillingPeriodOverlap { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        billing
            .close_billing_period(f.hostel.id, date(2025, 2, 1), date(2025, 2, 28), owner)
            .unwrap();
        assert_eq!(billing.periods(f.hostel.id).unwrap().len(), 2);

        let err = billing
            .close_billing_period(f.hostel.id, date(2025, 3, 2), date(2025, 3, 1), owner)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDateRange { .. }));
    }

    #[test]
    fn test_no_meals_policy() {
        let f = Fixture::new("BILL5");
        let a = f.member("A", None);

        // Nothing bought and nothing eaten is a zero bill
        let empty = f.billing().compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert_eq!(empty.total_grocery_cost, Money::ZERO);
        assert_eq!(empty.member(a.id).unwrap().total, Money::ZERO);

        f.buy(1, Money::major(250));
        let err = f
            .billing()
            .compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31))
            .unwrap_err();
        assert!(matches!(err, Error::NoMealsRecorded { total_grocery_cost } if total_grocery_cost == Money::major(250)));

        let lenient = BillingAggregator::new(f.db.connection(), &f.clock, NoMealsPolicy::ZeroBill);
        let bill = lenient.compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert_eq!(bill.total_meal_units, 0);
        assert_eq!(bill.cost_per_meal_unit, 0.0);
        assert_eq!(bill.member(a.id).unwrap().meal_cost, Money::ZERO);
    }

    #[test]
    fn test_bill_adds_seat_rent_and_fines() {
        let f = Fixture::new("BILL6");
        let seat = SeatLedger::new(f.db.connection(), &f.clock)
            .create_seat(f.hostel.id, "1", "101", Money::major(2500))
            .unwrap();
        f.db.hostels()
            .insert_rule(
                f.hostel.id,
                &Rule {
                    order: 1,
                    level: RuleLevel::Moderate,
                    title: "No smoking".to_string(),
                    description: None,
                    fine: Some("Tk 200 per incident".to_string()),
                },
            )
            .unwrap();
        let a = f.member("A", Some(seat.id));
        let b = f.member("B", None);
        f.eat(&a, 1, MealCounts::new(0, 1, 0));
        f.eat(&b, 1, MealCounts::new(0, 1, 0));
        f.buy(1, Money::major(100));

        let billing = f.billing();
        let fine = billing
            .assess_fine(
                f.hostel.id,
                NewFine {
                    user_id: a.id,
                    rule_order: Some(1),
                    amount: None,
                    reason: "Smoking on the roof".to_string(),
                    assessed_on: date(2025, 1, 2),
                    assessed_by: f.hostel.owner_id,
                },
            )
            .unwrap();
        assert_eq!(fine.amount, Money::major(200));

        let bill = billing.compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        let line = bill.member(a.id).unwrap();
        assert_eq!(line.meal_cost, Money::major(50));
        assert_eq!(line.seat_rent, Money::major(2500));
        assert_eq!(line.fines, Money::major(200));
        assert_eq!(line.total, Money::major(2750));
        assert_eq!(bill.member(b.id).unwrap().total, Money::major(50));
    }

    #[test]
    fn test_rent_follows_seat_after_vacate_and_reassign() {
        let f = Fixture::new("BILL8");
        let ledger = SeatLedger::new(f.db.connection(), &f.clock);
        let s1 = ledger.create_seat(f.hostel.id, "1", "101", Money::major(2500)).unwrap();
        let s2 = ledger.create_seat(f.hostel.id, "2", "101", Money::major(1800)).unwrap();

        let a = f.member("A", Some(s1.id));
        let s1 = ledger.seat(s1.id).unwrap();
        ledger
            .set_seat_status(s1.id, s1.version, SeatStatus::AvailableForRent, None)
            .unwrap();
        let b = f.member("B", Some(s1.id));

        let c = f.member("C", Some(s2.id));
        let s2 = ledger.seat(s2.id).unwrap();
        ledger
            .set_seat_status(s2.id, s2.version, SeatStatus::InMaintenance, None)
            .unwrap();

        let bill = f.billing().compute_bill(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap();
        assert_eq!(bill.member(a.id).unwrap().seat_rent, Money::ZERO);
        assert_eq!(bill.member(b.id).unwrap().seat_rent, Money::major(2500));
        assert_eq!(bill.member(c.id).unwrap().seat_rent, Money::ZERO);

        let occupied_rent: Money = ledger
            .seats(f.hostel.id)
            .unwrap()
            .iter()
            .filter(|seat| seat.status == SeatStatus::Occupied)
            .map(|seat| seat.rent)
            .sum();
        let billed_rent: Money = bill.members.iter().map(|m| m.seat_rent).sum();
        assert_eq!(billed_rent, occupied_rent);
    }

    #[test]
    fn test_fines_respect_closed_periods_and_membership() {
        let f = Fixture::new("BILL7");
        let a = f.member("A", None);
        let stranger = seed_user(&f.db, "Stranger");
        let billing = f.billing();
        let fine = |user_id, day| NewFine {
            user_id,
            rule_order: None,
            amount: Some(Money::major(100)),
            reason: "Late rent".to_string(),
            assessed_on: date(2025, 1, day),
            assessed_by: f.hostel.owner_id,
        };

        let err = billing.assess_fine(f.hostel.id, fine(stranger.id, 2)).unwrap_err();
        assert!(matches!(err, Error::NotAMember { .. }));

        billing
            .close_billing_period(f.hostel.id, date(2025, 1, 1), date(2025, 1, 10), f.hostel.owner_id)
            .unwrap();
        let err = billing.assess_fine(f.hostel.id, fine(a.id, 5)).unwrap_err();
        assert!(matches!(err, Error::BillingPeriodClosed { .. }));

        billing.assess_fine(f.hostel.id, fine(a.id, 11)).unwrap();
        assert_eq!(billing.fines(f.hostel.id, date(2025, 1, 1), date(2025, 1, 31)).unwrap().len(), 1);
    }

    #[test]
    fn test_fine_amount_from_rule_text() {
        assert_eq!(fine_amount_from_text("500"), Some(Money::major(500)));
        assert_eq!(fine_amount_from_text("Tk 1,200 per incident"), Some(Money::major(1200)));
        assert_eq!(fine_amount_from_text("Tk 50."), Some(Money::major(50)));
        assert_eq!(fine_amount_from_text("warning only"), None);
    }
}

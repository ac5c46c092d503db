//! Membership registry
//!
//! A membership covers `[join_date, leaving_date)`. Windows of one user never
//! overlap, so at most one membership is active on any day. Expiry is lazy:
//! `refresh_user` brings the cached `User.current_hostel_id` pointer and the
//! user's seat in line with whatever membership covers today.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{Membership, Money, SeatStatus};
use crate::seats::SeatLedger;
use crate::storage::{with_write_tx, HostelStore, MembershipStore, SeatStore, UserStore};

pub struct MembershipRegistry<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
}

impl<'a> MembershipRegistry<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self { conn, clock }
    }

    /// Join the hostel with `short_code`, optionally taking a seat there
    #[instrument(skip(self))]
    pub fn join_hostel(
        &self,
        user_id: Uuid,
        short_code: &str,
        join_date: NaiveDate,
        seat_id: Option<Uuid>,
    ) -> Result<Membership> {
        with_write_tx(self.conn, |conn| {
            self.refresh_in(conn, user_id)?;

            let hostel = HostelStore::new(conn)
                .find_by_short_code(short_code)?
                .ok_or_else(|| Error::HostelNotFound(short_code.trim().to_uppercase()))?;

            let now = self.clock.now();
            if let Some(suspension) = hostel.suspension.as_ref().filter(|s| s.covers_instant(now)) {
                return Err(Error::HostelServiceSuspended {
                    hostel_id: hostel.id,
                    until: suspension.until,
                    reason: suspension.reason.clone(),
                });
            }

            let memberships = MembershipStore::new(conn);
            if let Some(existing) = memberships.find_open_after(user_id, join_date)? {
                return Err(Error::AlreadyMember {
                    user_id,
                    hostel_id: existing.hostel_id,
                });
            }

            let mut membership = Membership::new(hostel.id, user_id, join_date);
            membership.created_at = now;
            memberships.create(&membership)?;

            let today = self.clock.today();
            if membership.covers(today) {
                UserStore::new(conn).set_current_hostel(user_id, Some(hostel.id))?;
            }

            if let Some(seat_id) = seat_id {
                let seat = SeatStore::new(conn).get(seat_id)?;
                if seat.hostel_id != hostel.id {
                    return Err(Error::invalid(
                        "seat_id",
                        format!("seat {seat_id} belongs to another hostel"),
                    ));
                }
                SeatLedger::new(conn, self.clock).set_seat_status(
                    seat_id,
                    seat.version,
                    SeatStatus::Occupied,
                    Some(user_id),
                )?;
            }

            info!(user_id = %user_id, hostel_id = %hostel.id, join_date = %join_date, "Joined hostel");
            memberships.get(membership.id)
        })
    }

    /// Set the leaving date of the user's current or upcoming membership.
    ///
    /// Meal records are kept. If the date has already arrived the user is
    /// detached immediately, otherwise on the first refresh after it.
    #[instrument(skip(self))]
    pub fn leave_hostel(&self, user_id: Uuid, leaving_date: NaiveDate) -> Result<Membership> {
        with_write_tx(self.conn, |conn| {
            UserStore::new(conn).get(user_id)?;
            let memberships = MembershipStore::new(conn);
            let membership = memberships
                .find_open_after(user_id, self.clock.today())?
                .ok_or_else(|| Error::not_found("active membership", user_id))?;

            if leaving_date < membership.join_date {
                return Err(Error::InvalidDateRange {
                    start: membership.join_date,
                    end: leaving_date,
                });
            }
            memberships.set_leaving_date(membership.id, Some(leaving_date))?;
            info!(
                user_id = %user_id,
                hostel_id = %membership.hostel_id,
                leaving_date = %leaving_date,
                "Leaving date set"
            );

            self.refresh_in(conn, user_id)?;
            memberships.get(membership.id)
        })
    }

    /// Mark the security deposit as paid. Repeating the call overwrites the
    /// amount and agreement time with the same values.
    #[instrument(skip(self))]
    pub fn record_security_deposit(
        &self,
        membership_id: Uuid,
        amount: Money,
        paid_at: DateTime<Utc>,
    ) -> Result<Membership> {
        if amount.is_negative() {
            return Err(Error::invalid("security_amount", format!("{amount} is negative")));
        }
        with_write_tx(self.conn, |conn| {
            let memberships = MembershipStore::new(conn);
            memberships.set_security_deposit(membership_id, amount, paid_at)?;
            memberships.get(membership_id)
        })
    }

    /// Apply lazy expiry for one user and return the membership covering today
    #[instrument(skip(self))]
    pub fn refresh_user(&self, user_id: Uuid) -> Result<Option<Membership>> {
        with_write_tx(self.conn, |conn| self.refresh_in(conn, user_id))
    }

    pub fn active_membership(&self, user_id: Uuid) -> Result<Option<Membership>> {
        MembershipStore::new(self.conn).find_covering(user_id, self.clock.today())
    }

    pub fn memberships(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        MembershipStore::new(self.conn).list_for_user(user_id)
    }

    fn refresh_in(&self, conn: &Connection, user_id: Uuid) -> Result<Option<Membership>> {
        let users = UserStore::new(conn);
        let user = users.get(user_id)?;
        let active = MembershipStore::new(conn).find_covering(user_id, self.clock.today())?;
        let active_hostel = active.as_ref().map(|m| m.hostel_id);

        if user.current_hostel_id != active_hostel {
            if active_hostel.is_none() {
                warn!(user_id = %user_id, hostel_id = ?user.current_hostel_id, "Membership elapsed");
            }
            users.set_current_hostel(user_id, active_hostel)?;
        }

        if let Some(seat) = SeatStore::new(conn).find_by_occupant(user_id)? {
            if Some(seat.hostel_id) != active_hostel {
                warn!(user_id = %user_id, seat_id = %seat.id, "Vacating seat of former member");
                SeatLedger::new(conn, self.clock).set_seat_status(
                    seat.id,
                    seat.version,
                    SeatStatus::AvailableForRent,
                    None,
                )?;
            }
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::FixedClock;
    use crate::models::ServiceSuspension;
    use crate::storage::Database;
    use crate::testing::{clock_on, date, seed_hostel, seed_user};

    fn registry<'a>(db: &'a Database, clock: &'a FixedClock) -> MembershipRegistry<'a> {
        MembershipRegistry::new(db.connection(), clock)
    }

    #[test]
    fn test_join_by_short_code_sets_current_hostel() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let hostel = seed_hostel(&db, "DH402A", 10);
        let user = seed_user(&db, "Nabil");

        let membership = registry(&db, &clock)
            .join_hostel(user.id, "dh402a", date(2025, 1, 1), None)
            .unwrap();
        assert_eq!(membership.hostel_id, hostel.id);
        assert_eq!(
            db.users().get(user.id).unwrap().current_hostel_id,
            Some(hostel.id)
        );
    }

    #[test]
    fn test_unknown_code_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let user = seed_user(&db, "Nabil");
        let err = registry(&db, &clock)
            .join_hostel(user.id, "nope1", date(2025, 1, 1), None)
            .unwrap_err();
        assert!(matches!(err, Error::HostelNotFound(ref code) if code == "NOPE1"));
    }

    #[test]
    fn test_membership_exclusivity() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 10);
        let first = seed_hostel(&db, "FIRST", 10);
        seed_hostel(&db, "SECOND", 10);
        let user = seed_user(&db, "Tania");
        let members = registry(&db, &clock);

        members.join_hostel(user.id, "FIRST", date(2025, 1, 1), None).unwrap();
        let err = members
            .join_hostel(user.id, "SECOND", date(2025, 1, 10), None)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyMember { hostel_id, .. } if hostel_id == first.id));

        // Leaving on the 20th allows a join from the 20th, not before
        members.leave_hostel(user.id, date(2025, 1, 20)).unwrap();
        let err = members
            .join_hostel(user.id, "SECOND", date(2025, 1, 19), None)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyMember { .. }));
        members
            .join_hostel(user.id, "SECOND", date(2025, 1, 20), None)
            .unwrap();

        // At every day at most one membership covers it
        for day in 1..=31 {
            let covering = members
                .memberships(user.id)
                .unwrap()
                .into_iter()
                .filter(|m| m.covers(date(2025, 1, day)))
                .count();
            assert!(covering <= 1, "day {day} covered {covering} times");
        }
    }

    #[test]
    fn test_join_rejected_while_suspended() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 10);
        let hostel = seed_hostel(&db, "PANIC1", 10);
        let suspension = ServiceSuspension {
            from: clock.now() - Duration::hours(1),
            until: clock.now() + Duration::days(2),
            reason: "water outage".to_string(),
        };
        db.hostels()
            .set_suspension(hostel.id, Some(&suspension), clock.now())
            .unwrap();
        let user = seed_user(&db, "Mim");

        let err = registry(&db, &clock)
            .join_hostel(user.id, "PANIC1", date(2025, 1, 10), None)
            .unwrap_err();
        assert!(matches!(err, Error::HostelServiceSuspended { .. }));
    }

    #[test]
    fn test_join_with_seat_occupies_it() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let hostel = seed_hostel(&db, "SEATED", 4);
        let seat = SeatLedger::new(db.connection(), &clock)
            .create_seat(hostel.id, "7", "2B", Money::major(2500))
            .unwrap();
        let user = seed_user(&db, "Arif");

        let membership = registry(&db, &clock)
            .join_hostel(user.id, "SEATED", date(2025, 1, 1), Some(seat.id))
            .unwrap();
        assert_eq!(membership.seat_id, Some(seat.id));

        let seat = db.seats().get(seat.id).unwrap();
        assert_eq!(seat.status, SeatStatus::Occupied);
        assert_eq!(seat.occupant_id, Some(user.id));
        assert_eq!(db.hostels().get(hostel.id).unwrap().seats.occupied, 1);
    }

    #[test]
    fn test_leaving_date_elapses_lazily() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let hostel = seed_hostel(&db, "LAZY1", 4);
        let seat = SeatLedger::new(db.connection(), &clock)
            .create_seat(hostel.id, "1", "A", Money::ZERO)
            .unwrap();
        let user = seed_user(&db, "Sakib");
        let members = registry(&db, &clock);
        members
            .join_hostel(user.id, "LAZY1", date(2025, 1, 1), Some(seat.id))
            .unwrap();

        members.leave_hostel(user.id, date(2025, 2, 1)).unwrap();
        assert!(members.refresh_user(user.id).unwrap().is_some());
        assert_eq!(db.users().get(user.id).unwrap().current_hostel_id, Some(hostel.id));

        clock.set(date(2025, 2, 1).and_hms_opt(0, 0, 0).unwrap().and_utc());
        assert!(members.active_membership(user.id).unwrap().is_none());
        assert!(members.refresh_user(user.id).unwrap().is_none());

        assert_eq!(db.users().get(user.id).unwrap().current_hostel_id, None);
        let seat = db.seats().get(seat.id).unwrap();
        assert_eq!(seat.status, SeatStatus::AvailableForRent);
        assert_eq!(db.hostels().get(hostel.id).unwrap().seats.occupied, 0);
    }

    #[test]
    fn test_leaving_before_joining_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        seed_hostel(&db, "MONO1", 4);
        let user = seed_user(&db, "Rina");
        let members = registry(&db, &clock);
        members.join_hostel(user.id, "MONO1", date(2025, 1, 1), None).unwrap();

        let err = members.leave_hostel(user.id, date(2024, 12, 31)).unwrap_err();
        assert!(matches!(err, Error::InvalidDateRange { .. }));
    }

    #[test]
    fn test_security_deposit_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        seed_hostel(&db, "DEP1", 4);
        let user = seed_user(&db, "Lamia");
        let members = registry(&db, &clock);
        let membership = members.join_hostel(user.id, "DEP1", date(2025, 1, 1), None).unwrap();

        let paid_at = clock.now();
        let first = members
            .record_security_deposit(membership.id, Money::major(5000), paid_at)
            .unwrap();
        let second = members
            .record_security_deposit(membership.id, Money::major(5000), paid_at)
            .unwrap();
        assert!(first.security_paid);
        assert_eq!(first.security_amount, second.security_amount);
        assert_eq!(second.agreed_at, Some(paid_at));
    }
}

//! Seat & capacity ledger
//!
//! Seat records are the source of truth for a hostel's seat breakdown. The
//! `Hostel.seats` projection is rewritten from a live tally inside the same
//! transaction as every seat write, and nothing outside this module writes it.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::invariants::{assert_seat_invariants, assert_seat_summary_invariants};
use crate::models::{Hostel, Money, Seat, SeatStatus, SeatSummary};
use crate::storage::{with_write_tx, HostelStore, MembershipStore, SeatStore};

/// Outcome of a seat-count reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub before: SeatSummary,
    pub after: SeatSummary,
}

impl Reconciliation {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

pub struct SeatLedger<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
}

impl<'a> SeatLedger<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self { conn, clock }
    }

    /// Create an AVAILABLE_FOR_RENT seat
    #[instrument(skip(self, rent))]
    pub fn create_seat(
        &self,
        hostel_id: Uuid,
        seat_number: &str,
        room_number: &str,
        rent: Money,
    ) -> Result<Seat> {
        let seat_number = seat_number.trim();
        let room_number = room_number.trim();
        if seat_number.is_empty() {
            return Err(Error::invalid("seat_number", "must not be empty"));
        }
        if room_number.is_empty() {
            return Err(Error::invalid("room_number", "must not be empty"));
        }
        if rent.is_negative() {
            return Err(Error::invalid("rent", format!("{rent} is negative")));
        }

        with_write_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;
            let seats = SeatStore::new(conn);
            if seats.find_by_number(hostel_id, seat_number)?.is_some() {
                return Err(Error::DuplicateSeat {
                    hostel_id,
                    seat_number: seat_number.to_string(),
                });
            }

            let mut seat = Seat::new(
                hostel_id,
                seat_number.to_string(),
                room_number.to_string(),
                rent,
            );
            seat.created_at = self.clock.now();
            seat.updated_at = seat.created_at;
            seats.create(&seat)?;

            let summary = self.sync_projection(conn, &hostel, hostel.seats.total)?;
            info!(
                hostel_id = %hostel_id,
                seat_number = %seat.seat_number,
                available = summary.available_for_rent,
                "Seat created"
            );
            Ok(seat)
        })
    }

    /// Move a seat to `status`, binding or clearing its occupant.
    ///
    /// `expected_version` is the version the caller last read; a mismatch
    /// means another writer got there first and yields
    /// `ConcurrentModification`. The hostel projection is rewritten in the
    /// same transaction.
    #[instrument(skip(self))]
    pub fn set_seat_status(
        &self,
        seat_id: Uuid,
        expected_version: u64,
        status: SeatStatus,
        occupant: Option<Uuid>,
    ) -> Result<Seat> {
        if !status.accepts_occupant(occupant) {
            return Err(Error::InvalidOccupantBinding { status, occupant });
        }

        with_write_tx(self.conn, |conn| {
            let seats = SeatStore::new(conn);
            let seat = seats.get(seat_id)?;
            if seat.version != expected_version {
                return Err(Error::ConcurrentModification {
                    entity: "seat",
                    id: seat_id,
                    expected: expected_version,
                    actual: seat.version,
                });
            }

            let today = self.clock.today();
            let memberships = MembershipStore::new(conn);
            if let Some(user_id) = occupant {
                if let Some(current) = seat.occupant_id.filter(|current| *current != user_id) {
                    return Err(Error::SeatAlreadyOccupied {
                        seat_id,
                        occupant_id: current,
                    });
                }
                if let Some(other) = seats.find_by_occupant(user_id)?.filter(|s| s.id != seat_id) {
                    return Err(Error::OccupantAlreadySeated {
                        user_id,
                        seat_id: other.id,
                    });
                }
                let membership = memberships
                    .find_covering(user_id, today)?
                    .filter(|m| m.hostel_id == seat.hostel_id)
                    .ok_or(Error::NotAMember {
                        user_id,
                        hostel_id: seat.hostel_id,
                        date: today,
                    })?;
                memberships.set_seat(membership.id, Some(seat_id))?;
            }

            let released = memberships.release_seat(seat_id, occupant)?;
            if released > 0 {
                debug!(seat_id = %seat_id, released, "Seat unlinked from former occupant");
            }

            if !seats.compare_and_set(seat_id, expected_version, status, occupant, self.clock.now())? {
                let actual = seats.get(seat_id)?.version;
                return Err(Error::ConcurrentModification {
                    entity: "seat",
                    id: seat_id,
                    expected: expected_version,
                    actual,
                });
            }

            let hostel = HostelStore::new(conn).get(seat.hostel_id)?;
            self.sync_projection(conn, &hostel, hostel.seats.total)?;

            let updated = seats.get(seat_id)?;
            assert_seat_invariants(&updated);
            info!(
                seat_id = %seat_id,
                from = %seat.status,
                to = %updated.status,
                occupant = ?updated.occupant_id,
                version = updated.version,
                "Seat status changed"
            );
            Ok(updated)
        })
    }

    /// Recompute the hostel's breakdown from live seat records.
    ///
    /// `total` is left as set by the manager. Fails with
    /// `SeatCapacityExceeded` if the records no longer fit in it.
    #[instrument(skip(self))]
    pub fn reconcile_hostel_seat_counts(&self, hostel_id: Uuid) -> Result<Reconciliation> {
        with_write_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;
            let after = self.sync_projection(conn, &hostel, hostel.seats.total)?;
            let reconciliation = Reconciliation {
                before: hostel.seats,
                after,
            };
            if reconciliation.drifted() {
                warn!(
                    hostel_id = %hostel_id,
                    before = ?reconciliation.before,
                    after = ?reconciliation.after,
                    "Seat counts drifted from seat records"
                );
            }
            Ok(reconciliation)
        })
    }

    /// Change the manager-set seat total
    #[instrument(skip(self))]
    pub fn set_total_seats(&self, hostel_id: Uuid, total: u32) -> Result<SeatSummary> {
        if total == 0 {
            return Err(Error::invalid("total_seats", "must be at least 1"));
        }
        with_write_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;
            let summary = self.sync_projection(conn, &hostel, total)?;
            info!(hostel_id = %hostel_id, from = hostel.seats.total, to = total, "Seat total changed");
            Ok(summary)
        })
    }

    pub fn seat(&self, seat_id: Uuid) -> Result<Seat> {
        SeatStore::new(self.conn).get(seat_id)
    }

    pub fn seats(&self, hostel_id: Uuid) -> Result<Vec<Seat>> {
        SeatStore::new(self.conn).list_for_hostel(hostel_id)
    }

    /// Tally seats, check capacity against `total`, and persist the projection
    fn sync_projection(&self, conn: &Connection, hostel: &Hostel, total: u32) -> Result<SeatSummary> {
        let mut summary = SeatStore::new(conn).tally(hostel.id)?;
        summary.total = total;
        if !summary.within_capacity() {
            return Err(Error::SeatCapacityExceeded {
                total: summary.total,
                occupied: summary.occupied,
                available_for_rent: summary.available_for_rent,
                in_maintenance: summary.in_maintenance,
            });
        }
        assert_seat_summary_invariants(hostel.id, &summary);
        HostelStore::new(conn).write_seat_summary(hostel.id, &summary, self.clock.now())?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::Membership;
    use crate::storage::Database;
    use crate::testing::{clock_on, date, seed_hostel, seed_user};

    fn member(db: &Database, hostel_id: Uuid, name: &str) -> Uuid {
        let user = seed_user(db, name);
        db.memberships()
            .create(&Membership::new(hostel_id, user.id, date(2025, 1, 1)))
            .unwrap();
        user.id
    }

    fn ledger<'a>(db: &'a Database, clock: &'a FixedClock) -> SeatLedger<'a> {
        SeatLedger::new(db.connection(), clock)
    }

    #[test]
    fn test_six_of_ten_seats_occupied() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "DH402A", 10);
        let seats = ledger(&db, &clock);

        let mut created = Vec::new();
        for n in 1..=10 {
            created.push(
                seats
                    .create_seat(hostel.id, &format!("S{n}"), "1A", Money::major(3000))
                    .unwrap(),
            );
        }
        for (i, seat) in created.iter().take(6).enumerate() {
            let occupant = member(&db, hostel.id, &format!("Resident {i}"));
            seats
                .set_seat_status(seat.id, seat.version, SeatStatus::Occupied, Some(occupant))
                .unwrap();
        }

        let stored = db.hostels().get(hostel.id).unwrap();
        assert_eq!(
            stored.seats,
            SeatSummary {
                total: 10,
                occupied: 6,
                available_for_rent: 4,
                in_maintenance: 0,
            }
        );
    }

    #[test]
    fn test_duplicate_seat_leaves_aggregate_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "DUP1", 10);
        let seats = ledger(&db, &clock);

        seats.create_seat(hostel.id, "12", "3B", Money::ZERO).unwrap();
        let before = db.hostels().get(hostel.id).unwrap().seats;

        let err = seats.create_seat(hostel.id, "12", "4C", Money::ZERO).unwrap_err();
        assert!(matches!(err, Error::DuplicateSeat { ref seat_number, .. } if seat_number == "12"));
        assert_eq!(db.hostels().get(hostel.id).unwrap().seats, before);
        assert_eq!(seats.seats(hostel.id).unwrap().len(), 1);
    }

    #[test]
    fn test_capacity_is_enforced_on_create() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "CAP1", 2);
        let seats = ledger(&db, &clock);

        seats.create_seat(hostel.id, "1", "A", Money::ZERO).unwrap();
        seats.create_seat(hostel.id, "2", "A", Money::ZERO).unwrap();
        let err = seats.create_seat(hostel.id, "3", "A", Money::ZERO).unwrap_err();
        assert!(matches!(err, Error::SeatCapacityExceeded { total: 2, available_for_rent: 3, .. }));

        let stored = db.hostels().get(hostel.id).unwrap().seats;
        assert_eq!(stored.available_for_rent, 2);
        assert!(stored.within_capacity());
    }

    #[test]
    fn test_invalid_occupant_binding() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "BIND1", 5);
        let seats = ledger(&db, &clock);
        let seat = seats.create_seat(hostel.id, "1", "A", Money::ZERO).unwrap();

        let err = seats
            .set_seat_status(seat.id, seat.version, SeatStatus::Occupied, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOccupantBinding { .. }));

        let err = seats
            .set_seat_status(seat.id, seat.version, SeatStatus::InMaintenance, Some(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOccupantBinding { .. }));
    }

    #[test]
    fn test_stale_version_is_concurrent_modification() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "CAS1", 5);
        let seats = ledger(&db, &clock);
        let seat = seats.create_seat(hostel.id, "1", "A", Money::ZERO).unwrap();
        let a = member(&db, hostel.id, "A");
        let b = member(&db, hostel.id, "B");

        // Both writers read version 0; the first wins
        seats
            .set_seat_status(seat.id, 0, SeatStatus::Occupied, Some(a))
            .unwrap();
        let err = seats
            .set_seat_status(seat.id, 0, SeatStatus::Occupied, Some(b))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConcurrentModification { expected: 0, actual: 1, .. }
        ));
        assert!(err.is_retryable());

        // Retrying with the fresh version still refuses to double-book
        let err = seats
            .set_seat_status(seat.id, 1, SeatStatus::Occupied, Some(b))
            .unwrap_err();
        assert!(matches!(err, Error::SeatAlreadyOccupied { occupant_id, .. } if occupant_id == a));
        assert_eq!(db.hostels().get(hostel.id).unwrap().seats.occupied, 1);
    }

    #[test]
    fn test_occupant_must_be_member_and_seated_once() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "ONE1", 5);
        let seats = ledger(&db, &clock);
        let s1 = seats.create_seat(hostel.id, "1", "A", Money::ZERO).unwrap();
        let s2 = seats.create_seat(hostel.id, "2", "A", Money::ZERO).unwrap();

        let outsider = seed_user(&db, "Outsider");
        let err = seats
            .set_seat_status(s1.id, 0, SeatStatus::Occupied, Some(outsider.id))
            .unwrap_err();
        assert!(matches!(err, Error::NotAMember { .. }));

        let resident = member(&db, hostel.id, "Resident");
        seats
            .set_seat_status(s1.id, 0, SeatStatus::Occupied, Some(resident))
            .unwrap();
        let err = seats
            .set_seat_status(s2.id, 0, SeatStatus::Occupied, Some(resident))
            .unwrap_err();
        assert!(matches!(err, Error::OccupantAlreadySeated { seat_id, .. } if seat_id == s1.id));
    }

    #[test]
    fn test_vacating_unlinks_membership() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "VAC1", 5);
        let seats = ledger(&db, &clock);
        let seat = seats.create_seat(hostel.id, "1", "A", Money::major(2500)).unwrap();
        let resident = member(&db, hostel.id, "Resident");

        let occupied = seats
            .set_seat_status(seat.id, seat.version, SeatStatus::Occupied, Some(resident))
            .unwrap();
        let linked = db.memberships().find_covering(resident, date(2025, 1, 5)).unwrap().unwrap();
        assert_eq!(linked.seat_id, Some(seat.id));

        seats
            .set_seat_status(seat.id, occupied.version, SeatStatus::InMaintenance, None)
            .unwrap();
        let unlinked = db.memberships().get(linked.id).unwrap();
        assert_eq!(unlinked.seat_id, None);
    }

    #[test]
    fn test_reconcile_repairs_drift() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "DRIFT1", 10);
        let seats = ledger(&db, &clock);
        seats.create_seat(hostel.id, "1", "A", Money::ZERO).unwrap();
        seats.create_seat(hostel.id, "2", "A", Money::ZERO).unwrap();

        // Simulate a stale projection written outside the ledger
        let stale = SeatSummary {
            total: 10,
            occupied: 3,
            available_for_rent: 0,
            in_maintenance: 0,
        };
        db.hostels()
            .write_seat_summary(hostel.id, &stale, clock.now())
            .unwrap();

        let result = seats.reconcile_hostel_seat_counts(hostel.id).unwrap();
        assert!(result.drifted());
        assert_eq!(result.before, stale);
        assert_eq!(result.after.available_for_rent, 2);
        assert_eq!(result.after.occupied, 0);

        let again = seats.reconcile_hostel_seat_counts(hostel.id).unwrap();
        assert!(!again.drifted());
    }

    #[test]
    fn test_total_cannot_drop_below_assigned() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "TOT1", 4);
        let seats = ledger(&db, &clock);
        for n in 1..=3 {
            seats.create_seat(hostel.id, &n.to_string(), "A", Money::ZERO).unwrap();
        }

        let err = seats.set_total_seats(hostel.id, 2).unwrap_err();
        assert!(matches!(err, Error::SeatCapacityExceeded { total: 2, .. }));
        assert_eq!(db.hostels().get(hostel.id).unwrap().seats.total, 4);

        let summary = seats.set_total_seats(hostel.id, 3).unwrap();
        assert_eq!(summary.total, 3);
        assert!(matches!(
            seats.set_total_seats(hostel.id, 0),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_seat_sum_invariant_holds_across_mixed_operations() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 5);
        let hostel = seed_hostel(&db, "MIX1", 4);
        let seats = ledger(&db, &clock);
        let check = || {
            let s = db.hostels().get(hostel.id).unwrap().seats;
            assert!(s.within_capacity(), "{s:?}");
            s
        };

        let mut ids = Vec::new();
        for n in 1..=6 {
            if let Ok(seat) = seats.create_seat(hostel.id, &n.to_string(), "A", Money::ZERO) {
                ids.push(seat.id);
            }
            check();
        }
        assert_eq!(ids.len(), 4);

        let resident = member(&db, hostel.id, "R");
        let statuses = [
            (SeatStatus::InMaintenance, None),
            (SeatStatus::Occupied, Some(resident)),
            (SeatStatus::AvailableForRent, None),
            (SeatStatus::Occupied, None),
        ];
        for (i, (status, occupant)) in statuses.into_iter().enumerate() {
            let seat = seats.seat(ids[i % ids.len()]).unwrap();
            let _ = seats.set_seat_status(seat.id, seat.version, status, occupant);
            let s = check();
            assert_eq!(s.assigned(), 4);
        }
    }
}

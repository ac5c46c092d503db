//! Seat storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    is_constraint_violation, parse_datetime, parse_seat_status, parse_uuid, parse_uuid_opt,
    OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{Money, Seat, SeatStatus, SeatSummary};

const SEAT_COLUMNS: &str = "id, hostel_id, seat_number, room_number, status, rent, occupant_id,
     version, created_at, updated_at";

fn seat_from_row(row: &Row<'_>) -> rusqlite::Result<Seat> {
    Ok(Seat {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(1)?)?,
        seat_number: row.get(2)?,
        room_number: row.get(3)?,
        status: parse_seat_status(&row.get::<_, String>(4)?)?,
        rent: Money(row.get(5)?),
        occupant_id: parse_uuid_opt(row.get(6)?)?,
        version: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(9)?)?,
    })
}

pub struct SeatStore<'a> {
    conn: &'a Connection,
}

impl<'a> SeatStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a seat; (hostel, seat number) must be unused
    #[instrument(skip(self, seat), fields(hostel_id = %seat.hostel_id, seat_number = %seat.seat_number))]
    pub fn create(&self, seat: &Seat) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO seats ({SEAT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    seat.id.to_string(),
                    seat.hostel_id.to_string(),
                    seat.seat_number,
                    seat.room_number,
                    seat.status.as_str(),
                    seat.rent.minor(),
                    seat.occupant_id.map(|o| o.to_string()),
                    seat.version,
                    seat.created_at.to_rfc3339(),
                    seat.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::DuplicateSeat {
                        hostel_id: seat.hostel_id,
                        seat_number: seat.seat_number.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Seat>> {
        let sql = format!("SELECT {SEAT_COLUMNS} FROM seats WHERE id = ?1");
        let seat = self
            .conn
            .query_row(&sql, params![id.to_string()], seat_from_row)
            .optional()?;
        Ok(seat)
    }

    pub fn get(&self, id: Uuid) -> Result<Seat> {
        self.find_by_id(id)?.ok_or_else(|| Error::not_found("seat", id))
    }

    #[instrument(skip(self))]
    pub fn find_by_number(&self, hostel_id: Uuid, seat_number: &str) -> Result<Option<Seat>> {
        let sql = format!("SELECT {SEAT_COLUMNS} FROM seats WHERE hostel_id = ?1 AND seat_number = ?2");
        let seat = self
            .conn
            .query_row(&sql, params![hostel_id.to_string(), seat_number], seat_from_row)
            .optional()?;
        Ok(seat)
    }

    /// The seat a user currently occupies, in any hostel
    #[instrument(skip(self))]
    pub fn find_by_occupant(&self, user_id: Uuid) -> Result<Option<Seat>> {
        let sql = format!("SELECT {SEAT_COLUMNS} FROM seats WHERE occupant_id = ?1");
        let seat = self
            .conn
            .query_row(&sql, params![user_id.to_string()], seat_from_row)
            .optional()?;
        Ok(seat)
    }

    /// All seats of a hostel by room then seat number
    #[instrument(skip(self))]
    pub fn list_for_hostel(&self, hostel_id: Uuid) -> Result<Vec<Seat>> {
        let sql = format!(
            "SELECT {SEAT_COLUMNS} FROM seats WHERE hostel_id = ?1 ORDER BY room_number, seat_number"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let seats = stmt
            .query_map(params![hostel_id.to_string()], seat_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(seats)
    }

    /// Tally live seat records by status; `total` is left at zero
    #[instrument(skip(self))]
    pub fn tally(&self, hostel_id: Uuid) -> Result<SeatSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM seats WHERE hostel_id = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![hostel_id.to_string()], |row| {
                Ok((parse_seat_status(&row.get::<_, String>(0)?)?, row.get::<_, u32>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut summary = SeatSummary::default();
        for (status, count) in rows {
            match status {
                SeatStatus::Occupied => summary.occupied = count,
                SeatStatus::AvailableForRent => summary.available_for_rent = count,
                SeatStatus::InMaintenance => summary.in_maintenance = count,
            }
        }
        Ok(summary)
    }

    /// Compare-and-swap a seat's status and occupant.
    ///
    /// Returns `false` without writing when the stored version differs from
    /// `expected_version`. A successful write bumps the version by one.
    #[instrument(skip(self))]
    pub fn compare_and_set(
        &self,
        seat_id: Uuid,
        expected_version: u64,
        status: SeatStatus,
        occupant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE seats SET status = ?1, occupant_id = ?2, version = version + 1, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                status.as_str(),
                occupant_id.map(|o| o.to_string()),
                now.to_rfc3339(),
                seat_id.to_string(),
                expected_version,
            ],
        )?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::{Money, Seat, SeatStatus};
    use crate::storage::Database;
    use crate::testing::seed_hostel;

    #[test]
    fn test_duplicate_seat_number_rejected() {
        let db = Database::open_in_memory().unwrap();
        let hostel = seed_hostel(&db, "SEAT1", 10);

        let seat = Seat::new(hostel.id, "12".into(), "3B".into(), Money::major(3000));
        db.seats().create(&seat).unwrap();
        let dup = Seat::new(hostel.id, "12".into(), "4A".into(), Money::major(3000));
        let err = db.seats().create(&dup).unwrap_err();
        assert!(matches!(err, crate::Error::DuplicateSeat { .. }));
    }

    #[test]
    fn test_compare_and_set_checks_version() {
        let db = Database::open_in_memory().unwrap();
        let hostel = seed_hostel(&db, "SEAT2", 10);
        let seat = Seat::new(hostel.id, "1".into(), "1A".into(), Money::ZERO);
        db.seats().create(&seat).unwrap();

        assert!(db
            .seats()
            .compare_and_set(seat.id, 0, SeatStatus::InMaintenance, None, Utc::now())
            .unwrap());
        assert!(!db
            .seats()
            .compare_and_set(seat.id, 0, SeatStatus::AvailableForRent, None, Utc::now())
            .unwrap());

        let stored = db.seats().get(seat.id).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, SeatStatus::InMaintenance);

        let tally = db.seats().tally(hostel.id).unwrap();
        assert_eq!(tally.in_maintenance, 1);
        assert_eq!(tally.available_for_rent, 0);
        assert!(db.seats().find_by_occupant(Uuid::new_v4()).unwrap().is_none());
    }
}

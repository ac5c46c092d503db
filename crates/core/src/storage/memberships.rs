//! Membership storage operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    date_str, is_constraint_violation, parse_date, parse_date_opt, parse_datetime,
    parse_datetime_opt, parse_uuid, parse_uuid_opt, OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{Membership, Money};

const MEMBERSHIP_COLUMNS: &str = "id, hostel_id, user_id, seat_id, join_date, leaving_date,
     security_paid, security_amount, agreed_at, created_at";

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(1)?)?,
        user_id: parse_uuid(&row.get::<_, String>(2)?)?,
        seat_id: parse_uuid_opt(row.get(3)?)?,
        join_date: parse_date(&row.get::<_, String>(4)?)?,
        leaving_date: parse_date_opt(row.get(5)?)?,
        security_paid: row.get(6)?,
        security_amount: row.get::<_, Option<i64>>(7)?.map(Money),
        agreed_at: parse_datetime_opt(row.get(8)?)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?)?,
    })
}

pub struct MembershipStore<'a> {
    conn: &'a Connection,
}

impl<'a> MembershipStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, membership), fields(user_id = %membership.user_id, hostel_id = %membership.hostel_id))]
    pub fn create(&self, membership: &Membership) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO memberships ({MEMBERSHIP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    membership.id.to_string(),
                    membership.hostel_id.to_string(),
                    membership.user_id.to_string(),
                    membership.seat_id.map(|s| s.to_string()),
                    date_str(membership.join_date),
                    membership.leaving_date.map(date_str),
                    membership.security_paid,
                    membership.security_amount.map(|m| m.minor()),
                    membership.agreed_at.map(|t| t.to_rfc3339()),
                    membership.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::AlreadyMember {
                        user_id: membership.user_id,
                        hostel_id: membership.hostel_id,
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Membership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = ?1");
        let membership = self
            .conn
            .query_row(&sql, params![id.to_string()], membership_from_row)
            .optional()?;
        Ok(membership)
    }

    pub fn get(&self, id: Uuid) -> Result<Membership> {
        self.find_by_id(id)?
            .ok_or_else(|| Error::not_found("membership", id))
    }

    /// The user's membership covering `date`, in any hostel
    #[instrument(skip(self))]
    pub fn find_covering(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
             WHERE user_id = ?1 AND join_date <= ?2
               AND (leaving_date IS NULL OR leaving_date > ?2)
             ORDER BY join_date DESC LIMIT 1"
        );
        let membership = self
            .conn
            .query_row(
                &sql,
                params![user_id.to_string(), date_str(date)],
                membership_from_row,
            )
            .optional()?;
        Ok(membership)
    }

    /// A membership of the user whose window reaches past `date`: open-ended,
    /// or leaving after `date`. Latest join first.
    #[instrument(skip(self))]
    pub fn find_open_after(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
             WHERE user_id = ?1 AND (leaving_date IS NULL OR leaving_date > ?2)
             ORDER BY join_date DESC LIMIT 1"
        );
        let membership = self
            .conn
            .query_row(
                &sql,
                params![user_id.to_string(), date_str(date)],
                membership_from_row,
            )
            .optional()?;
        Ok(membership)
    }

    /// All memberships of a user, oldest first
    #[instrument(skip(self))]
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = ?1 ORDER BY join_date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let memberships = stmt
            .query_map(params![user_id.to_string()], membership_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(memberships)
    }

    /// Memberships of a hostel whose window overlaps the inclusive range
    #[instrument(skip(self))]
    pub fn list_overlapping(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
             WHERE hostel_id = ?1 AND join_date <= ?3
               AND (leaving_date IS NULL OR leaving_date > ?2)
             ORDER BY user_id, join_date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let memberships = stmt
            .query_map(
                params![hostel_id.to_string(), date_str(start), date_str(end)],
                membership_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(memberships)
    }

    #[instrument(skip(self))]
    pub fn set_leaving_date(&self, id: Uuid, leaving_date: Option<NaiveDate>) -> Result<()> {
        self.conn.execute(
            "UPDATE memberships SET leaving_date = ?1 WHERE id = ?2",
            params![leaving_date.map(date_str), id.to_string()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_seat(&self, id: Uuid, seat_id: Option<Uuid>) -> Result<()> {
        self.conn.execute(
            "UPDATE memberships SET seat_id = ?1 WHERE id = ?2",
            params![seat_id.map(|s| s.to_string()), id.to_string()],
        )?;
        Ok(())
    }

    /// Unlink `seat_id` from every membership except `keep`'s; returns how many were cleared
    #[instrument(skip(self))]
    pub fn release_seat(&self, seat_id: Uuid, keep: Option<Uuid>) -> Result<usize> {
        let released = self.conn.execute(
            "UPDATE memberships SET seat_id = NULL
             WHERE seat_id = ?1 AND (?2 IS NULL OR user_id <> ?2)",
            params![seat_id.to_string(), keep.map(|u| u.to_string())],
        )?;
        Ok(released)
    }

    #[instrument(skip(self))]
    pub fn set_security_deposit(
        &self,
        id: Uuid,
        amount: Money,
        agreed_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE memberships SET security_paid = 1, security_amount = ?1, agreed_at = ?2
             WHERE id = ?3",
            params![amount.minor(), agreed_at.to_rfc3339(), id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::not_found("membership", id));
        }
        Ok(())
    }
}

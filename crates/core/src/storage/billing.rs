//! Billing period and fine storage operations

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{date_str, parse_date, parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{BillingPeriod, Fine, Money};

const PERIOD_COLUMNS: &str = "id, hostel_id, start_date, end_date, closed_at, closed_by";

const FINE_COLUMNS: &str =
    "id, hostel_id, user_id, rule_order, amount, reason, assessed_on, assessed_by, created_at";

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<BillingPeriod> {
    Ok(BillingPeriod {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(1)?)?,
        start: parse_date(&row.get::<_, String>(2)?)?,
        end: parse_date(&row.get::<_, String>(3)?)?,
        closed_at: parse_datetime(&row.get::<_, String>(4)?)?,
        closed_by: parse_uuid(&row.get::<_, String>(5)?)?,
    })
}

fn fine_from_row(row: &Row<'_>) -> rusqlite::Result<Fine> {
    Ok(Fine {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(1)?)?,
        user_id: parse_uuid(&row.get::<_, String>(2)?)?,
        rule_order: row.get(3)?,
        amount: Money(row.get(4)?),
        reason: row.get(5)?,
        assessed_on: parse_date(&row.get::<_, String>(6)?)?,
        assessed_by: parse_uuid(&row.get::<_, String>(7)?)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?)?,
    })
}

pub struct BillingStore<'a> {
    conn: &'a Connection,
}

impl<'a> BillingStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, period), fields(hostel_id = %period.hostel_id, start = %period.start, end = %period.end))]
    pub fn insert_period(&self, period: &BillingPeriod) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO billing_periods ({PERIOD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                period.id.to_string(),
                period.hostel_id.to_string(),
                date_str(period.start),
                date_str(period.end),
                period.closed_at.to_rfc3339(),
                period.closed_by.to_string(),
            ],
        )?;
        Ok(())
    }

    /// The closed period containing `date`, if any
    #[instrument(skip(self))]
    pub fn find_closed_containing(
        &self,
        hostel_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<BillingPeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods
             WHERE hostel_id = ?1 AND start_date <= ?2 AND end_date >= ?2
             LIMIT 1"
        );
        let period = self
            .conn
            .query_row(&sql, params![hostel_id.to_string(), date_str(date)], period_from_row)
            .optional()?;
        Ok(period)
    }

    /// Any closed period sharing a day with the inclusive range
    #[instrument(skip(self))]
    pub fn find_overlapping(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BillingPeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods
             WHERE hostel_id = ?1 AND start_date <= ?3 AND end_date >= ?2
             ORDER BY start_date LIMIT 1"
        );
        let period = self
            .conn
            .query_row(
                &sql,
                params![hostel_id.to_string(), date_str(start), date_str(end)],
                period_from_row,
            )
            .optional()?;
        Ok(period)
    }

    #[instrument(skip(self))]
    pub fn find_exact(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BillingPeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods
             WHERE hostel_id = ?1 AND start_date = ?2 AND end_date = ?3"
        );
        let period = self
            .conn
            .query_row(
                &sql,
                params![hostel_id.to_string(), date_str(start), date_str(end)],
                period_from_row,
            )
            .optional()?;
        Ok(period)
    }

    #[instrument(skip(self))]
    pub fn list_periods(&self, hostel_id: Uuid) -> Result<Vec<BillingPeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods WHERE hostel_id = ?1 ORDER BY start_date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let periods = stmt
            .query_map(params![hostel_id.to_string()], period_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(periods)
    }

    #[instrument(skip(self, fine), fields(user_id = %fine.user_id, amount = %fine.amount))]
    pub fn insert_fine(&self, fine: &Fine) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO fines ({FINE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                fine.id.to_string(),
                fine.hostel_id.to_string(),
                fine.user_id.to_string(),
                fine.rule_order,
                fine.amount.minor(),
                fine.reason,
                date_str(fine.assessed_on),
                fine.assessed_by.to_string(),
                fine.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fines assessed in the inclusive range, by user then date
    #[instrument(skip(self))]
    pub fn fines_in_range(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Fine>> {
        let sql = format!(
            "SELECT {FINE_COLUMNS} FROM fines
             WHERE hostel_id = ?1 AND assessed_on >= ?2 AND assessed_on <= ?3
             ORDER BY user_id, assessed_on, created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let fines = stmt
            .query_map(
                params![hostel_id.to_string(), date_str(start), date_str(end)],
                fine_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(fines)
    }
}

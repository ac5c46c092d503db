//! Meal storage operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{date_str, parse_date, parse_datetime, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{MealCounts, MealRecord};

const MEAL_COLUMNS: &str = "id, user_id, hostel_id, date, breakfast, lunch, dinner,
     breakfast_guests, lunch_guests, dinner_guests, created_at, updated_at";

/// Position of a meal record in (date, user) order, used for keyset paging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MealKey {
    pub date: NaiveDate,
    pub user_id: Uuid,
}

impl MealKey {
    pub fn of(record: &MealRecord) -> Self {
        Self {
            date: record.date,
            user_id: record.user_id,
        }
    }
}

fn meal_from_row(row: &Row<'_>) -> rusqlite::Result<MealRecord> {
    Ok(MealRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        user_id: parse_uuid(&row.get::<_, String>(1)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(2)?)?,
        date: parse_date(&row.get::<_, String>(3)?)?,
        counts: MealCounts {
            breakfast: row.get(4)?,
            lunch: row.get(5)?,
            dinner: row.get(6)?,
            breakfast_guests: row.get(7)?,
            lunch_guests: row.get(8)?,
            dinner_guests: row.get(9)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(10)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(11)?)?,
    })
}

pub struct MealStore<'a> {
    conn: &'a Connection,
}

impl<'a> MealStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert the (user, date) record or overwrite its counts in place
    #[instrument(skip(self, counts))]
    pub fn upsert(
        &self,
        user_id: Uuid,
        hostel_id: Uuid,
        date: NaiveDate,
        counts: &MealCounts,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meals (id, user_id, hostel_id, date, breakfast, lunch, dinner,
                 breakfast_guests, lunch_guests, dinner_guests, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(user_id, date) DO UPDATE SET
                 hostel_id = excluded.hostel_id,
                 breakfast = excluded.breakfast,
                 lunch = excluded.lunch,
                 dinner = excluded.dinner,
                 breakfast_guests = excluded.breakfast_guests,
                 lunch_guests = excluded.lunch_guests,
                 dinner_guests = excluded.dinner_guests,
                 updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                hostel_id.to_string(),
                date_str(date),
                counts.breakfast,
                counts.lunch,
                counts.dinner,
                counts.breakfast_guests,
                counts.lunch_guests,
                counts.dinner_guests,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<MealRecord>> {
        let sql = format!("SELECT {MEAL_COLUMNS} FROM meals WHERE user_id = ?1 AND date = ?2");
        let record = self
            .conn
            .query_row(&sql, params![user_id.to_string(), date_str(date)], meal_from_row)
            .optional()?;
        Ok(record)
    }

    /// Number of records stored for a user
    #[instrument(skip(self))]
    pub fn count_for_user(&self, user_id: Uuid) -> Result<u64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM meals WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// One page of a hostel's records in `[start, end]`, ordered by (date, user),
    /// strictly after `after` when given
    #[instrument(skip(self))]
    pub fn page(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        after: Option<MealKey>,
        limit: usize,
    ) -> Result<Vec<MealRecord>> {
        let (after_date, after_user) = match after {
            Some(key) => (Some(date_str(key.date)), Some(key.user_id.to_string())),
            None => (None, None),
        };
        let sql = format!(
            "SELECT {MEAL_COLUMNS} FROM meals
             WHERE hostel_id = ?1 AND date >= ?2 AND date <= ?3
               AND (?4 IS NULL OR (date, user_id) > (?4, ?5))
             ORDER BY date, user_id
             LIMIT ?6"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![
                    hostel_id.to_string(),
                    date_str(start),
                    date_str(end),
                    after_date,
                    after_user,
                    limit as i64,
                ],
                meal_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

//! Meal ledger
//!
//! One record per (user, date), written by upsert. A day's counts can be
//! changed until its edit deadline passes, and never while the hostel's
//! service is suspended or the day sits inside a closed billing period.

mod cursor;

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::MealPolicy;
use crate::error::{Error, Result};
use crate::models::{MealCounts, MealRecord};
use crate::storage::{with_write_tx, BillingStore, HostelStore, MealStore, MembershipStore};

pub use cursor::MealCursor;

/// Rows fetched per round trip by lazy cursors
pub const DEFAULT_PAGE_SIZE: usize = 256;

pub struct MealLedger<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
    policy: MealPolicy,
    page_size: usize,
}

impl<'a> MealLedger<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock, policy: MealPolicy) -> Self {
        Self {
            conn,
            clock,
            policy,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create or overwrite the user's meal counts for `date`
    #[instrument(skip(self, counts))]
    pub fn set_meal_counts(
        &self,
        user_id: Uuid,
        hostel_id: Uuid,
        date: NaiveDate,
        counts: MealCounts,
    ) -> Result<MealRecord> {
        with_write_tx(self.conn, |conn| {
            let hostel = HostelStore::new(conn).get(hostel_id)?;

            MembershipStore::new(conn)
                .find_covering(user_id, date)?
                .filter(|m| m.hostel_id == hostel_id)
                .ok_or(Error::NotAMember {
                    user_id,
                    hostel_id,
                    date,
                })?;

            let now = self.clock.now();
            if let Some(suspension) = hostel
                .suspension
                .as_ref()
                .filter(|s| s.covers_instant(now) || s.covers_date(date))
            {
                return Err(Error::HostelServiceSuspended {
                    hostel_id,
                    until: suspension.until,
                    reason: suspension.reason.clone(),
                });
            }

            if BillingStore::new(conn)
                .find_closed_containing(hostel_id, date)?
                .is_some()
            {
                return Err(Error::BillingPeriodClosed { hostel_id, date });
            }

            let deadline = self.policy.edit_deadline(date);
            if now > deadline {
                return Err(Error::EditWindowClosed {
                    date,
                    closed_at: deadline,
                });
            }

            let meals = MealStore::new(conn);
            meals.upsert(user_id, hostel_id, date, &counts, now)?;
            debug!(user_id = %user_id, date = %date, meals = counts.total_meals(), "Meal counts saved");
            meals
                .find(user_id, date)?
                .ok_or_else(|| Error::not_found("meal record", format!("{user_id}@{date}")))
        })
    }

    pub fn meal(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<MealRecord>> {
        MealStore::new(self.conn).find(user_id, date)
    }

    /// Lazily iterate a hostel's meal records in `[start, end]`, ordered by
    /// date then user. Each call starts a fresh cursor.
    #[instrument(skip(self))]
    pub fn meals_for_period(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<MealCursor<'a>> {
        if start > end {
            return Err(Error::InvalidDateRange { start, end });
        }
        HostelStore::new(self.conn).get(hostel_id)?;
        Ok(MealCursor::new(
            MealStore::new(self.conn),
            hostel_id,
            start,
            end,
            self.page_size,
        ))
    }
}

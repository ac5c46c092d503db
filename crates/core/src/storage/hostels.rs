//! Hostel storage operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    is_constraint_violation, parse_datetime, parse_datetime_opt, parse_hostel_type,
    parse_rule_level, parse_uuid, parse_uuid_opt, OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{GeoPoint, Hostel, MealWeights, Rule, SeatSummary, ServiceSuspension};

const HOSTEL_COLUMNS: &str = "id, name, short_code, hostel_type, address, longitude, latitude,
     owner_id, manager_id, seats_total, seats_occupied, seats_available, seats_maintenance,
     suspended_from, suspended_until, suspension_reason,
     weight_breakfast, weight_lunch, weight_dinner, created_at, updated_at";

/// Map a row to a hostel without its rules
fn hostel_from_row(row: &Row<'_>) -> rusqlite::Result<Hostel> {
    let location = match (row.get::<_, Option<f64>>(5)?, row.get::<_, Option<f64>>(6)?) {
        (Some(longitude), Some(latitude)) => Some(GeoPoint::new(longitude, latitude)),
        _ => None,
    };
    let suspension = match (
        parse_datetime_opt(row.get(13)?)?,
        parse_datetime_opt(row.get(14)?)?,
    ) {
        (Some(from), Some(until)) => Some(ServiceSuspension {
            from,
            until,
            reason: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Hostel {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        short_code: row.get(2)?,
        hostel_type: parse_hostel_type(&row.get::<_, String>(3)?)?,
        address: row.get(4)?,
        location,
        rules: Vec::new(),
        owner_id: parse_uuid(&row.get::<_, String>(7)?)?,
        manager_id: parse_uuid_opt(row.get(8)?)?,
        seats: SeatSummary {
            total: row.get(9)?,
            occupied: row.get(10)?,
            available_for_rent: row.get(11)?,
            in_maintenance: row.get(12)?,
        },
        suspension,
        meal_weights: MealWeights {
            breakfast: row.get(16)?,
            lunch: row.get(17)?,
            dinner: row.get(18)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(19)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(20)?)?,
    })
}

pub struct HostelStore<'a> {
    conn: &'a Connection,
}

impl<'a> HostelStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new hostel and its rules
    #[instrument(skip(self, hostel), fields(short_code = %hostel.short_code))]
    pub fn create(&self, hostel: &Hostel) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO hostels ({HOSTEL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                             ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
                ),
                params![
                    hostel.id.to_string(),
                    hostel.name,
                    hostel.short_code,
                    hostel.hostel_type.as_str(),
                    hostel.address,
                    hostel.location.map(|l| l.longitude),
                    hostel.location.map(|l| l.latitude),
                    hostel.owner_id.to_string(),
                    hostel.manager_id.map(|m| m.to_string()),
                    hostel.seats.total,
                    hostel.seats.occupied,
                    hostel.seats.available_for_rent,
                    hostel.seats.in_maintenance,
                    hostel.suspension.as_ref().map(|s| s.from.to_rfc3339()),
                    hostel.suspension.as_ref().map(|s| s.until.to_rfc3339()),
                    hostel.suspension.as_ref().map(|s| s.reason.clone()),
                    hostel.meal_weights.breakfast,
                    hostel.meal_weights.lunch,
                    hostel.meal_weights.dinner,
                    hostel.created_at.to_rfc3339(),
                    hostel.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::DuplicateShortCode(hostel.short_code.clone())
                } else {
                    e.into()
                }
            })?;

        for rule in &hostel.rules {
            self.insert_rule(hostel.id, rule)?;
        }
        Ok(())
    }

    /// Find hostel by ID, rules included
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Hostel>> {
        let sql = format!("SELECT {HOSTEL_COLUMNS} FROM hostels WHERE id = ?1");
        let hostel = self
            .conn
            .query_row(&sql, params![id.to_string()], hostel_from_row)
            .optional()?;
        self.with_rules(hostel)
    }

    pub fn get(&self, id: Uuid) -> Result<Hostel> {
        self.find_by_id(id)?
            .ok_or_else(|| Error::HostelNotFound(id.to_string()))
    }

    /// Find hostel by short code, ignoring case
    #[instrument(skip(self))]
    pub fn find_by_short_code(&self, short_code: &str) -> Result<Option<Hostel>> {
        let sql = format!("SELECT {HOSTEL_COLUMNS} FROM hostels WHERE short_code = upper(?1)");
        let hostel = self
            .conn
            .query_row(&sql, params![short_code.trim()], hostel_from_row)
            .optional()?;
        self.with_rules(hostel)
    }

    /// List all hostels by name
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Hostel>> {
        let sql = format!("SELECT {HOSTEL_COLUMNS} FROM hostels ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut hostels = stmt
            .query_map([], hostel_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for hostel in &mut hostels {
            hostel.rules = self.rules(hostel.id)?;
        }
        Ok(hostels)
    }

    fn with_rules(&self, hostel: Option<Hostel>) -> Result<Option<Hostel>> {
        match hostel {
            Some(mut hostel) => {
                hostel.rules = self.rules(hostel.id)?;
                Ok(Some(hostel))
            }
            None => Ok(None),
        }
    }

    /// Persist the seat projection. Only the seat ledger calls this.
    #[instrument(skip(self))]
    pub fn write_seat_summary(
        &self,
        hostel_id: Uuid,
        seats: &SeatSummary,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE hostels SET seats_total = ?1, seats_occupied = ?2, seats_available = ?3,
                 seats_maintenance = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                seats.total,
                seats.occupied,
                seats.available_for_rent,
                seats.in_maintenance,
                now.to_rfc3339(),
                hostel_id.to_string(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, suspension))]
    pub fn set_suspension(
        &self,
        hostel_id: Uuid,
        suspension: Option<&ServiceSuspension>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE hostels SET suspended_from = ?1, suspended_until = ?2, suspension_reason = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                suspension.map(|s| s.from.to_rfc3339()),
                suspension.map(|s| s.until.to_rfc3339()),
                suspension.map(|s| s.reason.clone()),
                now.to_rfc3339(),
                hostel_id.to_string(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_meal_weights(
        &self,
        hostel_id: Uuid,
        weights: &MealWeights,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE hostels SET weight_breakfast = ?1, weight_lunch = ?2, weight_dinner = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                weights.breakfast,
                weights.lunch,
                weights.dinner,
                now.to_rfc3339(),
                hostel_id.to_string(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_manager(
        &self,
        hostel_id: Uuid,
        manager_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE hostels SET manager_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                manager_id.map(|m| m.to_string()),
                now.to_rfc3339(),
                hostel_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Insert a rule at its position
    #[instrument(skip(self, rule), fields(order = rule.order))]
    pub fn insert_rule(&self, hostel_id: Uuid, rule: &Rule) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO hostel_rules (hostel_id, position, level, title, description, fine)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    hostel_id.to_string(),
                    rule.order,
                    rule.level.as_str(),
                    rule.title,
                    rule.description,
                    rule.fine,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::invalid("rule.order", format!("position {} is taken", rule.order))
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Rules ordered by position
    #[instrument(skip(self))]
    pub fn rules(&self, hostel_id: Uuid) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, level, title, description, fine
             FROM hostel_rules WHERE hostel_id = ?1 ORDER BY position",
        )?;
        let rules = stmt
            .query_map(params![hostel_id.to_string()], |row| {
                Ok(Rule {
                    order: row.get(0)?,
                    level: parse_rule_level(&row.get::<_, String>(1)?)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    fine: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

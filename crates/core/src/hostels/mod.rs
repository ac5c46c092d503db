//! Hostel registry
//!
//! Creation and manager-side settings of a hostel. The seat breakdown is not
//! writable here; it belongs to the seat ledger.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::max_weight;
use crate::error::{Error, Result};
use crate::models::{Hostel, MealWeights, NewHostel, Rule, SeatSummary, ServiceSuspension};
use crate::storage::{with_write_tx, HostelStore, UserStore};

/// Upper-case and check a join code: 2 to 10 characters of `[A-Z0-9]`
pub fn normalize_short_code(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    if !(2..=10).contains(&code.len()) {
        return Err(Error::invalid("short_code", "must be 2 to 10 characters"));
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err(Error::invalid("short_code", "only letters and digits are allowed"));
    }
    Ok(code)
}

pub struct HostelRegistry<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
    default_weights: MealWeights,
}

impl<'a> HostelRegistry<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self {
            conn,
            clock,
            default_weights: MealWeights::default(),
        }
    }

    /// Weights given to hostels created by this registry
    pub fn with_default_weights(mut self, weights: MealWeights) -> Self {
        self.default_weights = weights;
        self
    }

    #[instrument(skip(self, input), fields(short_code = %input.short_code))]
    pub fn create_hostel(&self, input: NewHostel) -> Result<Hostel> {
        let name = input.name.trim();
        if name.chars().count() < 2 {
            return Err(Error::invalid("name", "must be at least 2 characters"));
        }
        let short_code = normalize_short_code(&input.short_code)?;
        let address = input.address.trim();
        if address.chars().count() < 5 {
            return Err(Error::invalid("address", "must be at least 5 characters"));
        }
        if let Some(point) = input.location.filter(|p| !p.is_valid()) {
            return Err(Error::InvalidCoordinates {
                longitude: point.longitude,
                latitude: point.latitude,
            });
        }
        if input.total_seats == 0 {
            return Err(Error::invalid("total_seats", "must be at least 1"));
        }

        with_write_tx(self.conn, |conn| {
            let users = UserStore::new(conn);
            users.get(input.owner_id)?;
            if let Some(manager_id) = input.manager_id {
                users.get(manager_id)?;
            }

            let now = self.clock.now();
            let hostel = Hostel {
                id: Uuid::new_v4(),
                name: name.to_string(),
                short_code,
                hostel_type: input.hostel_type,
                address: Some(address.to_string()),
                location: input.location,
                rules: Vec::new(),
                owner_id: input.owner_id,
                manager_id: input.manager_id,
                seats: SeatSummary::with_total(input.total_seats),
                suspension: None,
                meal_weights: self.default_weights,
                created_at: now,
                updated_at: now,
            };
            HostelStore::new(conn).create(&hostel)?;
            info!(hostel_id = %hostel.id, short_code = %hostel.short_code, total = input.total_seats, "Hostel created");
            Ok(hostel)
        })
    }

    pub fn hostel(&self, hostel_id: Uuid) -> Result<Hostel> {
        HostelStore::new(self.conn).get(hostel_id)
    }

    /// Resolve a join code, ignoring case
    pub fn find_by_short_code(&self, short_code: &str) -> Result<Hostel> {
        HostelStore::new(self.conn)
            .find_by_short_code(short_code)?
            .ok_or_else(|| Error::HostelNotFound(short_code.trim().to_uppercase()))
    }

    pub fn list(&self) -> Result<Vec<Hostel>> {
        HostelStore::new(self.conn).list()
    }

    #[instrument(skip(self, rule), fields(order = rule.order))]
    pub fn add_rule(&self, hostel_id: Uuid, rule: Rule) -> Result<Vec<Rule>> {
        if rule.title.trim().is_empty() {
            return Err(Error::invalid("rule.title", "must not be empty"));
        }
        with_write_tx(self.conn, |conn| {
            let hostels = HostelStore::new(conn);
            hostels.get(hostel_id)?;
            hostels.insert_rule(hostel_id, &rule)?;
            hostels.rules(hostel_id)
        })
    }

    pub fn rules(&self, hostel_id: Uuid) -> Result<Vec<Rule>> {
        HostelStore::new(self.conn).rules(hostel_id)
    }

    /// Freeze meal edits and joins for `[from, until)`
    #[instrument(skip(self, reason))]
    pub fn suspend_service(
        &self,
        hostel_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<Hostel> {
        if from >= until {
            return Err(Error::invalid("suspension", "must end after it starts"));
        }
        let suspension = ServiceSuspension {
            from,
            until,
            reason: reason.trim().to_string(),
        };
        with_write_tx(self.conn, |conn| {
            let hostels = HostelStore::new(conn);
            hostels.get(hostel_id)?;
            hostels.set_suspension(hostel_id, Some(&suspension), self.clock.now())?;
            warn!(hostel_id = %hostel_id, from = %from, until = %until, reason = %suspension.reason, "Service suspended");
            hostels.get(hostel_id)
        })
    }

    #[instrument(skip(self))]
    pub fn lift_suspension(&self, hostel_id: Uuid) -> Result<Hostel> {
        with_write_tx(self.conn, |conn| {
            let hostels = HostelStore::new(conn);
            hostels.get(hostel_id)?;
            hostels.set_suspension(hostel_id, None, self.clock.now())?;
            info!(hostel_id = %hostel_id, "Service suspension lifted");
            hostels.get(hostel_id)
        })
    }

    /// Change how each meal type counts toward billing
    #[instrument(skip(self))]
    pub fn set_meal_weights(&self, hostel_id: Uuid, weights: MealWeights) -> Result<Hostel> {
        for (field, value) in [
            ("meal_weights.breakfast", weights.breakfast),
            ("meal_weights.lunch", weights.lunch),
            ("meal_weights.dinner", weights.dinner),
        ] {
            if value > max_weight() {
                return Err(Error::invalid(field, format!("{value} exceeds {}", max_weight())));
            }
        }
        if weights.breakfast == 0 && weights.lunch == 0 && weights.dinner == 0 {
            return Err(Error::invalid("meal_weights", "at least one weight must be positive"));
        }
        with_write_tx(self.conn, |conn| {
            let hostels = HostelStore::new(conn);
            hostels.get(hostel_id)?;
            hostels.set_meal_weights(hostel_id, &weights, self.clock.now())?;
            hostels.get(hostel_id)
        })
    }

    #[instrument(skip(self))]
    pub fn assign_manager(&self, hostel_id: Uuid, manager_id: Option<Uuid>) -> Result<Hostel> {
        with_write_tx(self.conn, |conn| {
            let hostels = HostelStore::new(conn);
            hostels.get(hostel_id)?;
            if let Some(manager_id) = manager_id {
                UserStore::new(conn).get(manager_id)?;
            }
            hostels.set_manager(hostel_id, manager_id, self.clock.now())?;
            info!(hostel_id = %hostel_id, manager_id = ?manager_id, "Manager assigned");
            hostels.get(hostel_id)
        })
    }
}

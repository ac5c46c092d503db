//! Hostel model - the unit that owns seats, members, meals and bazars

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who the hostel houses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostelType {
    Boys,
    Girls,
}

impl HostelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostelType::Boys => "BOYS",
            HostelType::Girls => "GIRLS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BOYS" => Some(HostelType::Boys),
            "GIRLS" => Some(HostelType::Girls),
            _ => None,
        }
    }
}

/// Geographic point as [longitude, latitude]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    pub fn is_valid(&self) -> bool {
        (-180.0..=180.0).contains(&self.longitude) && (-90.0..=90.0).contains(&self.latitude)
    }
}

/// Rule severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleLevel {
    Info,
    Moderate,
    Critical,
}

impl RuleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLevel::Critical => "CRITICAL",
            RuleLevel::Moderate => "MODERATE",
            RuleLevel::Info => "INFO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(RuleLevel::Critical),
            "MODERATE" => Some(RuleLevel::Moderate),
            "INFO" => Some(RuleLevel::Info),
            _ => None,
        }
    }
}

/// A house rule. Rules are listed by `order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub order: u32,
    pub level: RuleLevel,
    pub title: String,
    pub description: Option<String>,
    /// Fine as written by the manager, e.g. "500" or "Tk 200 per incident"
    pub fine: Option<String>,
}

/// Cached tally of a hostel's seats.
///
/// `total` is set by the manager; the other three are a projection of the
/// hostel's Seat records and are only written by the seat ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSummary {
    pub total: u32,
    pub occupied: u32,
    pub available_for_rent: u32,
    pub in_maintenance: u32,
}

impl SeatSummary {
    pub fn with_total(total: u32) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Seats accounted for in one of the three states
    pub fn assigned(&self) -> u64 {
        self.occupied as u64 + self.available_for_rent as u64 + self.in_maintenance as u64
    }

    pub fn within_capacity(&self) -> bool {
        self.assigned() <= self.total as u64
    }
}

/// Manager "panic lock": meal toggling and joining are frozen in `[from, until)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSuspension {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub reason: String,
}

impl ServiceSuspension {
    pub fn covers_instant(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.until
    }

    /// Whether any part of the UTC day `date` falls inside the window
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        let Some(start) = date.and_hms_opt(0, 0, 0) else {
            return false;
        };
        let day_start = start.and_utc();
        let day_end = day_start + Duration::days(1);
        self.from < day_end && day_start < self.until
    }
}

/// Per-meal weights in hundredths of a meal unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MealWeights {
    pub breakfast: u32,
    pub lunch: u32,
    pub dinner: u32,
}

impl Default for MealWeights {
    fn default() -> Self {
        Self {
            breakfast: 50,
            lunch: 100,
            dinner: 100,
        }
    }
}

/// A hostel and its mess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hostel {
    pub id: Uuid,
    pub name: String,
    /// Upper-case join code shared with residents
    pub short_code: String,
    pub hostel_type: HostelType,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub rules: Vec<Rule>,
    pub owner_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub seats: SeatSummary,
    pub suspension: Option<ServiceSuspension>,
    pub meal_weights: MealWeights,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hostel {
    pub fn is_suspended_at(&self, at: DateTime<Utc>) -> bool {
        self.suspension.as_ref().is_some_and(|s| s.covers_instant(at))
    }

    pub fn is_suspended_on(&self, date: NaiveDate) -> bool {
        self.suspension.as_ref().is_some_and(|s| s.covers_date(date))
    }

    pub fn rule(&self, order: u32) -> Option<&Rule> {
        self.rules.iter().find(|r| r.order == order)
    }
}

/// Input for creating a hostel
#[derive(Debug, Clone, Deserialize)]
pub struct NewHostel {
    pub name: String,
    pub short_code: String,
    pub hostel_type: HostelType,
    pub address: String,
    pub location: Option<GeoPoint>,
    pub total_seats: u32,
    pub owner_id: Uuid,
    pub manager_id: Option<Uuid>,
}

//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{GroceryCategory, GroceryUnit, HostelType, RuleLevel, SeatStatus};

fn conversion_error(
    err: impl std::error::Error + Send + Sync + 'static,
) -> SqlError {
    SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(conversion_error)
}

/// Parse an optional UUID from a database string column
pub fn parse_uuid_opt(s: Option<String>) -> Result<Option<Uuid>, SqlError> {
    s.map(|s| parse_uuid(&s)).transpose()
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_error)
}

/// Parse an optional DateTime from an RFC3339 string
pub fn parse_datetime_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>, SqlError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

/// Parse a calendar date stored as YYYY-MM-DD
pub fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(conversion_error)
}

pub fn parse_date_opt(s: Option<String>) -> Result<Option<NaiveDate>, SqlError> {
    s.map(|s| parse_date(&s)).transpose()
}

/// Format a calendar date for storage
pub fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_variant<T>(kind: &'static str, s: &str, f: impl Fn(&str) -> Option<T>) -> Result<T, SqlError> {
    f(s).ok_or_else(|| {
        conversion_error(UnknownVariant {
            kind,
            value: s.to_string(),
        })
    })
}

pub fn parse_seat_status(s: &str) -> Result<SeatStatus, SqlError> {
    parse_variant("seat status", s, SeatStatus::from_str)
}

pub fn parse_hostel_type(s: &str) -> Result<HostelType, SqlError> {
    parse_variant("hostel type", s, HostelType::from_str)
}

pub fn parse_rule_level(s: &str) -> Result<RuleLevel, SqlError> {
    parse_variant("rule level", s, RuleLevel::from_str)
}

pub fn parse_category(s: &str) -> Result<GroceryCategory, SqlError> {
    parse_variant("grocery category", s, GroceryCategory::from_str)
}

pub fn parse_unit(s: &str) -> Result<GroceryUnit, SqlError> {
    parse_variant("grocery unit", s, GroceryUnit::from_str)
}

/// True when the error is a UNIQUE/constraint violation
pub fn is_constraint_violation(err: &SqlError) -> bool {
    matches!(
        err,
        SqlError::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

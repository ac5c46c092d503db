//! Market and preset grocery item storage operations

use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    is_constraint_violation, parse_category, parse_datetime, parse_unit, parse_uuid, OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{GeoPoint, GroceryCategory, Market, PresetGroceryItem};

const MARKET_COLUMNS: &str = "id, name, longitude, latitude, description, is_active, created_at";

fn market_from_row(row: &Row<'_>) -> rusqlite::Result<Market> {
    let location = match (row.get::<_, Option<f64>>(2)?, row.get::<_, Option<f64>>(3)?) {
        (Some(longitude), Some(latitude)) => Some(GeoPoint::new(longitude, latitude)),
        _ => None,
    };
    Ok(Market {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        location,
        description: row.get(4)?,
        is_active: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?)?,
    })
}

fn preset_from_row(row: &Row<'_>) -> rusqlite::Result<PresetGroceryItem> {
    Ok(PresetGroceryItem {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        category: parse_category(&row.get::<_, String>(2)?)?,
        default_unit: parse_unit(&row.get::<_, String>(3)?)?,
        is_custom: row.get(4)?,
        is_active: row.get(5)?,
    })
}

pub struct MarketStore<'a> {
    conn: &'a Connection,
}

impl<'a> MarketStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, market), fields(name = %market.name))]
    pub fn create(&self, market: &Market) -> Result<()> {
        self.conn
            .execute(
                &format!("INSERT INTO markets ({MARKET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    market.id.to_string(),
                    market.name,
                    market.location.map(|l| l.longitude),
                    market.location.map(|l| l.latitude),
                    market.description,
                    market.is_active,
                    market.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::DuplicateName {
                        entity: "market",
                        name: market.name.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Market>> {
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id = ?1");
        let market = self
            .conn
            .query_row(&sql, params![id.to_string()], market_from_row)
            .optional()?;
        Ok(market)
    }

    pub fn get(&self, id: Uuid) -> Result<Market> {
        self.find_by_id(id)?.ok_or_else(|| Error::not_found("market", id))
    }

    #[instrument(skip(self))]
    pub fn find_by_name(&self, name: &str) -> Result<Option<Market>> {
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE name = ?1 COLLATE NOCASE");
        let market = self
            .conn
            .query_row(&sql, params![name.trim()], market_from_row)
            .optional()?;
        Ok(market)
    }

    #[instrument(skip(self))]
    pub fn list_active(&self) -> Result<Vec<Market>> {
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE is_active = 1 ORDER BY name");
        let mut stmt = self.conn.prepare(&sql)?;
        let markets = stmt
            .query_map([], market_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(markets)
    }

    #[instrument(skip(self))]
    pub fn set_active(&self, id: Uuid, is_active: bool) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE markets SET is_active = ?1 WHERE id = ?2",
            params![is_active, id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::not_found("market", id));
        }
        Ok(())
    }

    #[instrument(skip(self, preset), fields(name = %preset.name))]
    pub fn create_preset(&self, preset: &PresetGroceryItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO preset_grocery_items (id, name, category, default_unit, is_custom, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    preset.id.to_string(),
                    preset.name,
                    preset.category.as_str(),
                    preset.default_unit.as_str(),
                    preset.is_custom,
                    preset.is_active,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::DuplicateName {
                        entity: "preset item",
                        name: preset.name.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Active presets by name, optionally limited to one category
    #[instrument(skip(self))]
    pub fn list_presets(&self, category: Option<GroceryCategory>) -> Result<Vec<PresetGroceryItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, category, default_unit, is_custom, is_active
             FROM preset_grocery_items
             WHERE is_active = 1 AND (?1 IS NULL OR category = ?1)
             ORDER BY name",
        )?;
        let presets = stmt
            .query_map(params![category.map(|c| c.as_str())], preset_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(presets)
    }
}

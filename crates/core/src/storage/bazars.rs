//! Bazar and grocery item storage operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    date_str, parse_category, parse_date, parse_datetime, parse_unit, parse_uuid, parse_uuid_opt,
    OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{Bazar, GroceryItem, Money, PricePoint, Quantity};

const BAZAR_COLUMNS: &str =
    "id, hostel_id, date, added_by, grand_total, receipts, version, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, bazar_id, market_id, name, category, quantity_milli, unit,
     price_per_unit, total_cost, created_at";

/// Position of a price observation in time order, used for keyset paging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceKey {
    date: String,
    created_at: String,
    item_id: String,
}

fn bazar_from_row(row: &Row<'_>) -> rusqlite::Result<Bazar> {
    let receipts: String = row.get(5)?;
    Ok(Bazar {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        hostel_id: parse_uuid(&row.get::<_, String>(1)?)?,
        date: parse_date(&row.get::<_, String>(2)?)?,
        added_by: parse_uuid_opt(row.get(3)?)?,
        grand_total: Money(row.get(4)?),
        receipts: serde_json::from_str(&receipts).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        items: Vec::new(),
        version: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(8)?)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<GroceryItem> {
    Ok(GroceryItem {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        bazar_id: parse_uuid(&row.get::<_, String>(1)?)?,
        market_id: parse_uuid_opt(row.get(2)?)?,
        name: row.get(3)?,
        category: parse_category(&row.get::<_, String>(4)?)?,
        quantity: Quantity(row.get(5)?),
        unit: parse_unit(&row.get::<_, String>(6)?)?,
        price_per_unit: Money(row.get(7)?),
        total_cost: Money(row.get(8)?),
        created_at: parse_datetime(&row.get::<_, String>(9)?)?,
    })
}

pub struct BazarStore<'a> {
    conn: &'a Connection,
}

impl<'a> BazarStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a bazar header; items are stored separately
    #[instrument(skip(self, bazar), fields(bazar_id = %bazar.id, hostel_id = %bazar.hostel_id))]
    pub fn create(&self, bazar: &Bazar) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO bazars ({BAZAR_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                bazar.id.to_string(),
                bazar.hostel_id.to_string(),
                date_str(bazar.date),
                bazar.added_by.map(|u| u.to_string()),
                bazar.grand_total.minor(),
                serde_json::to_string(&bazar.receipts)?,
                bazar.version,
                bazar.created_at.to_rfc3339(),
                bazar.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find a bazar with its items
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Bazar>> {
        let sql = format!("SELECT {BAZAR_COLUMNS} FROM bazars WHERE id = ?1");
        let bazar = self
            .conn
            .query_row(&sql, params![id.to_string()], bazar_from_row)
            .optional()?;
        match bazar {
            Some(mut bazar) => {
                bazar.items = self.items(bazar.id)?;
                Ok(Some(bazar))
            }
            None => Ok(None),
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Bazar> {
        self.find_by_id(id)?.ok_or_else(|| Error::not_found("bazar", id))
    }

    /// Bazars of a hostel in the inclusive range, items not loaded
    #[instrument(skip(self))]
    pub fn list_for_hostel(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bazar>> {
        let sql = format!(
            "SELECT {BAZAR_COLUMNS} FROM bazars
             WHERE hostel_id = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date, created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let bazars = stmt
            .query_map(
                params![hostel_id.to_string(), date_str(start), date_str(end)],
                bazar_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bazars)
    }

    /// Sum of grand totals over the inclusive range
    #[instrument(skip(self))]
    pub fn grand_total_in_range(
        &self,
        hostel_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Money> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(grand_total), 0) FROM bazars
             WHERE hostel_id = ?1 AND date >= ?2 AND date <= ?3",
            params![hostel_id.to_string(), date_str(start), date_str(end)],
            |row| row.get(0),
        )?;
        Ok(Money(total))
    }

    /// Recompute `grand_total` from the live items and bump the version.
    ///
    /// Must run in the same transaction as the item mutation.
    #[instrument(skip(self))]
    pub fn recompute_grand_total(&self, bazar_id: Uuid, now: DateTime<Utc>) -> Result<Money> {
        let updated = self.conn.execute(
            "UPDATE bazars SET
                 grand_total = (SELECT COALESCE(SUM(total_cost), 0) FROM grocery_items WHERE bazar_id = ?1),
                 version = version + 1,
                 updated_at = ?2
             WHERE id = ?1",
            params![bazar_id.to_string(), now.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::not_found("bazar", bazar_id));
        }
        let total: i64 = self.conn.query_row(
            "SELECT grand_total FROM bazars WHERE id = ?1",
            params![bazar_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(Money(total))
    }

    #[instrument(skip(self, receipts))]
    pub fn set_receipts(&self, bazar_id: Uuid, receipts: &[String], now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE bazars SET receipts = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(receipts)?, now.to_rfc3339(), bazar_id.to_string()],
        )?;
        Ok(())
    }

    #[instrument(skip(self, item), fields(bazar_id = %item.bazar_id, name = %item.name))]
    pub fn insert_item(&self, item: &GroceryItem) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO grocery_items ({ITEM_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                item.id.to_string(),
                item.bazar_id.to_string(),
                item.market_id.map(|m| m.to_string()),
                item.name,
                item.category.as_str(),
                item.quantity.milli(),
                item.unit.as_str(),
                item.price_per_unit.minor(),
                item.total_cost.minor(),
                item.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Replace an item's fields, keeping its id and creation time
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub fn update_item(&self, item: &GroceryItem) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE grocery_items SET market_id = ?1, name = ?2, category = ?3,
                 quantity_milli = ?4, unit = ?5, price_per_unit = ?6, total_cost = ?7
             WHERE id = ?8 AND bazar_id = ?9",
            params![
                item.market_id.map(|m| m.to_string()),
                item.name,
                item.category.as_str(),
                item.quantity.milli(),
                item.unit.as_str(),
                item.price_per_unit.minor(),
                item.total_cost.minor(),
                item.id.to_string(),
                item.bazar_id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::not_found("grocery item", item.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_item(&self, bazar_id: Uuid, item_id: Uuid) -> Result<()> {
        let deleted = self.conn.execute(
            "DELETE FROM grocery_items WHERE id = ?1 AND bazar_id = ?2",
            params![item_id.to_string(), bazar_id.to_string()],
        )?;
        if deleted == 0 {
            return Err(Error::not_found("grocery item", item_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn find_item(&self, bazar_id: Uuid, item_id: Uuid) -> Result<Option<GroceryItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM grocery_items WHERE id = ?1 AND bazar_id = ?2");
        let item = self
            .conn
            .query_row(
                &sql,
                params![item_id.to_string(), bazar_id.to_string()],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Items of a bazar in insertion order
    #[instrument(skip(self))]
    pub fn items(&self, bazar_id: Uuid) -> Result<Vec<GroceryItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM grocery_items WHERE bazar_id = ?1 ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![bazar_id.to_string()], item_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// One page of unit prices for a (lowercase) item name in time order,
    /// strictly after `after` when given
    #[instrument(skip(self))]
    pub fn price_page(
        &self,
        name: &str,
        hostel_id: Option<Uuid>,
        market_id: Option<Uuid>,
        after: Option<&PriceKey>,
        limit: usize,
    ) -> Result<Vec<(PriceKey, PricePoint)>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.date, i.created_at, i.id, i.price_per_unit, i.unit, b.hostel_id, i.market_id
             FROM grocery_items i
             INNER JOIN bazars b ON b.id = i.bazar_id
             WHERE i.name = ?1
               AND (?2 IS NULL OR b.hostel_id = ?2)
               AND (?3 IS NULL OR i.market_id = ?3)
               AND (?4 IS NULL OR (b.date, i.created_at, i.id) > (?4, ?5, ?6))
             ORDER BY b.date, i.created_at, i.id
             LIMIT ?7",
        )?;
        let rows = stmt
            .query_map(
                params![
                    name,
                    hostel_id.map(|h| h.to_string()),
                    market_id.map(|m| m.to_string()),
                    after.map(|k| k.date.as_str()),
                    after.map(|k| k.created_at.as_str()),
                    after.map(|k| k.item_id.as_str()),
                    limit as i64,
                ],
                |row| {
                    let key = PriceKey {
                        date: row.get(0)?,
                        created_at: row.get(1)?,
                        item_id: row.get(2)?,
                    };
                    let point = PricePoint {
                        date: parse_date(&key.date)?,
                        price_per_unit: Money(row.get(3)?),
                        unit: parse_unit(&row.get::<_, String>(4)?)?,
                        hostel_id: parse_uuid(&row.get::<_, String>(5)?)?,
                        market_id: parse_uuid_opt(row.get(6)?)?,
                        item_id: parse_uuid(&key.item_id)?,
                    };
                    Ok((key, point))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

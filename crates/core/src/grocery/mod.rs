//! Grocery expense ledger
//!
//! Every item mutation recomputes the bazar's grand total from its stored
//! items inside the same write transaction, so concurrent edits cannot lose
//! each other's contribution.

mod history;
mod markets;

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::invariants::assert_bazar_invariants;
use crate::meals::DEFAULT_PAGE_SIZE;
use crate::models::{Bazar, GroceryItem, GroceryItemInput, Money};
use crate::storage::{with_write_tx, BazarStore, BillingStore, HostelStore, MarketStore, UserStore};

pub use history::PriceHistory;
pub use markets::MarketRegistry;

/// Lowercased, whitespace-collapsed item name used for grouping
pub fn normalize_item_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn validate_item(input: &GroceryItemInput) -> Result<String> {
    let name = normalize_item_name(&input.name);
    if name.is_empty() {
        return Err(Error::InvalidGroceryItem {
            field: "name",
            reason: "must not be empty".to_string(),
        });
    }
    if !input.quantity.is_positive() {
        return Err(Error::InvalidGroceryItem {
            field: "quantity",
            reason: format!("{} is not greater than zero", input.quantity),
        });
    }
    if input.price_per_unit.is_negative() {
        return Err(Error::InvalidGroceryItem {
            field: "price_per_unit",
            reason: format!("{} is negative", input.price_per_unit),
        });
    }
    Ok(name)
}

fn line_total(input: &GroceryItemInput) -> Result<Money> {
    input
        .price_per_unit
        .checked_times(input.quantity)
        .ok_or_else(|| Error::InvalidGroceryItem {
            field: "total_cost",
            reason: format!("{} x {} is out of range", input.quantity, input.price_per_unit),
        })
}

pub struct GroceryLedger<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
    page_size: usize,
}

impl<'a> GroceryLedger<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self {
            conn,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start an empty grocery run
    #[instrument(skip(self))]
    pub fn create_bazar(
        &self,
        hostel_id: Uuid,
        date: NaiveDate,
        added_by: Option<Uuid>,
    ) -> Result<Bazar> {
        with_write_tx(self.conn, |conn| {
            HostelStore::new(conn).get(hostel_id)?;
            if let Some(user_id) = added_by {
                UserStore::new(conn).get(user_id)?;
            }
            ensure_open(conn, hostel_id, date)?;

            let now = self.clock.now();
            let bazar = Bazar {
                id: Uuid::new_v4(),
                hostel_id,
                date,
                added_by,
                grand_total: Money::ZERO,
                receipts: Vec::new(),
                items: Vec::new(),
                version: 0,
                created_at: now,
                updated_at: now,
            };
            BazarStore::new(conn).create(&bazar)?;
            info!(bazar_id = %bazar.id, hostel_id = %hostel_id, date = %date, "Bazar created");
            Ok(bazar)
        })
    }

    /// Append an item and recompute the grand total
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub fn add_item(&self, bazar_id: Uuid, input: GroceryItemInput) -> Result<GroceryItem> {
        let name = validate_item(&input)?;
        let total_cost = line_total(&input)?;
        with_write_tx(self.conn, |conn| {
            let bazars = BazarStore::new(conn);
            let bazar = bazars.get(bazar_id)?;
            ensure_open(conn, bazar.hostel_id, bazar.date)?;
            if let Some(market_id) = input.market_id {
                MarketStore::new(conn).get(market_id)?;
            }

            let item = GroceryItem {
                id: Uuid::new_v4(),
                bazar_id,
                market_id: input.market_id,
                name,
                category: input.category,
                quantity: input.quantity,
                unit: input.unit,
                price_per_unit: input.price_per_unit,
                total_cost,
                created_at: self.clock.now(),
            };
            bazars.insert_item(&item)?;
            self.recompute(conn, bazar_id)?;
            Ok(item)
        })
    }

    /// Replace an item's fields and recompute the grand total
    #[instrument(skip(self, input))]
    pub fn update_item(
        &self,
        bazar_id: Uuid,
        item_id: Uuid,
        input: GroceryItemInput,
    ) -> Result<GroceryItem> {
        let name = validate_item(&input)?;
        let total_cost = line_total(&input)?;
        with_write_tx(self.conn, |conn| {
            let bazars = BazarStore::new(conn);
            let bazar = bazars.get(bazar_id)?;
            ensure_open(conn, bazar.hostel_id, bazar.date)?;
            if let Some(market_id) = input.market_id {
                MarketStore::new(conn).get(market_id)?;
            }

            let existing = bazars
                .find_item(bazar_id, item_id)?
                .ok_or_else(|| Error::not_found("grocery item", item_id))?;
            let item = GroceryItem {
                market_id: input.market_id,
                name,
                category: input.category,
                quantity: input.quantity,
                unit: input.unit,
                price_per_unit: input.price_per_unit,
                total_cost,
                ..existing
            };
            bazars.update_item(&item)?;
            self.recompute(conn, bazar_id)?;
            Ok(item)
        })
    }

    /// Remove an item and recompute the grand total
    #[instrument(skip(self))]
    pub fn remove_item(&self, bazar_id: Uuid, item_id: Uuid) -> Result<Bazar> {
        with_write_tx(self.conn, |conn| {
            let bazars = BazarStore::new(conn);
            let bazar = bazars.get(bazar_id)?;
            ensure_open(conn, bazar.hostel_id, bazar.date)?;
            bazars.delete_item(bazar_id, item_id)?;
            self.recompute(conn, bazar_id)
        })
    }

    /// Add a receipt reference; attaching the same one twice is a no-op
    #[instrument(skip(self))]
    pub fn attach_receipt(&self, bazar_id: Uuid, receipt: &str) -> Result<Bazar> {
        let receipt = receipt.trim();
        if receipt.is_empty() {
            return Err(Error::invalid("receipt", "must not be empty"));
        }
        with_write_tx(self.conn, |conn| {
            let bazars = BazarStore::new(conn);
            let mut bazar = bazars.get(bazar_id)?;
            if !bazar.receipts.iter().any(|r| r == receipt) {
                bazar.receipts.push(receipt.to_string());
                bazars.set_receipts(bazar_id, &bazar.receipts, self.clock.now())?;
            }
            bazars.get(bazar_id)
        })
    }

    pub fn bazar(&self, bazar_id: Uuid) -> Result<Bazar> {
        BazarStore::new(self.conn).get(bazar_id)
    }

    pub fn bazars(&self, hostel_id: Uuid, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bazar>> {
        BazarStore::new(self.conn).list_for_hostel(hostel_id, start, end)
    }

    /// Lazily iterate unit prices of an item over time, optionally limited
    /// to one hostel or one market. Each call starts a fresh cursor.
    pub fn price_history(
        &self,
        item_name: &str,
        hostel_id: Option<Uuid>,
        market_id: Option<Uuid>,
    ) -> PriceHistory<'a> {
        PriceHistory::new(
            BazarStore::new(self.conn),
            normalize_item_name(item_name),
            hostel_id,
            market_id,
            self.page_size,
        )
    }

    fn recompute(&self, conn: &Connection, bazar_id: Uuid) -> Result<Bazar> {
        let bazars = BazarStore::new(conn);
        let grand_total = bazars.recompute_grand_total(bazar_id, self.clock.now())?;
        let bazar = bazars.get(bazar_id)?;
        assert_bazar_invariants(&bazar);
        debug!(bazar_id = %bazar_id, grand_total = %grand_total, items = bazar.items.len(), version = bazar.version, "Grand total recomputed");
        Ok(bazar)
    }
}

fn ensure_open(conn: &Connection, hostel_id: Uuid, date: NaiveDate) -> Result<()> {
    if BillingStore::new(conn)
        .find_closed_containing(hostel_id, date)?
        .is_some()
    {
        return Err(Error::BillingPeriodClosed { hostel_id, date });
    }
    Ok(())
}

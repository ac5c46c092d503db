//! Grocery run (bazar), line items, markets and item presets

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GeoPoint, Money, Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroceryCategory {
    RiceGrains,
    Protein,
    Vegetable,
    SpicesOil,
    Other,
}

impl GroceryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroceryCategory::RiceGrains => "RICE_GRAINS",
            GroceryCategory::Protein => "PROTEIN",
            GroceryCategory::Vegetable => "VEGETABLE",
            GroceryCategory::SpicesOil => "SPICES_OIL",
            GroceryCategory::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RICE_GRAINS" => Some(GroceryCategory::RiceGrains),
            "PROTEIN" => Some(GroceryCategory::Protein),
            "VEGETABLE" => Some(GroceryCategory::Vegetable),
            "SPICES_OIL" => Some(GroceryCategory::SpicesOil),
            "OTHER" => Some(GroceryCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroceryUnit {
    Kg,
    Liter,
    Pcs,
    Dozen,
    Packet,
    Gm,
}

impl GroceryUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroceryUnit::Kg => "KG",
            GroceryUnit::Liter => "LITER",
            GroceryUnit::Pcs => "PCS",
            GroceryUnit::Dozen => "DOZEN",
            GroceryUnit::Packet => "PACKET",
            GroceryUnit::Gm => "GM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "KG" => Some(GroceryUnit::Kg),
            "LITER" => Some(GroceryUnit::Liter),
            "PCS" => Some(GroceryUnit::Pcs),
            "DOZEN" => Some(GroceryUnit::Dozen),
            "PACKET" => Some(GroceryUnit::Packet),
            "GM" => Some(GroceryUnit::Gm),
            _ => None,
        }
    }
}

/// One purchased line of a bazar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroceryItem {
    pub id: Uuid,
    pub bazar_id: Uuid,
    pub market_id: Option<Uuid>,
    /// Lower-cased so "Chicken" and "chicken" group together
    pub name: String,
    pub category: GroceryCategory,
    pub quantity: Quantity,
    pub unit: GroceryUnit,
    pub price_per_unit: Money,
    /// `quantity × price_per_unit`, rounded half-up
    pub total_cost: Money,
    pub created_at: DateTime<Utc>,
}

/// Input for adding or replacing a line item
#[derive(Debug, Clone, Deserialize)]
pub struct GroceryItemInput {
    pub name: String,
    pub category: GroceryCategory,
    pub quantity: Quantity,
    pub unit: GroceryUnit,
    pub price_per_unit: Money,
    pub market_id: Option<Uuid>,
}

impl GroceryItemInput {
    pub fn new(
        name: &str,
        category: GroceryCategory,
        quantity: Quantity,
        unit: GroceryUnit,
        price_per_unit: Money,
    ) -> Self {
        Self {
            name: name.to_string(),
            category,
            quantity,
            unit,
            price_per_unit,
            market_id: None,
        }
    }

    pub fn at_market(mut self, market_id: Uuid) -> Self {
        self.market_id = Some(market_id);
        self
    }
}

/// A grocery run recorded against a hostel and date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bazar {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub date: NaiveDate,
    pub added_by: Option<Uuid>,
    /// Always the sum of `items[*].total_cost`
    pub grand_total: Money,
    pub receipts: Vec<String>,
    pub items: Vec<GroceryItem>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bazar {
    pub fn items_total(&self) -> Money {
        self.items.iter().map(|i| i.total_cost).sum()
    }
}

/// A unit price observation for trend graphs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price_per_unit: Money,
    pub unit: GroceryUnit,
    pub hostel_id: Uuid,
    pub market_id: Option<Uuid>,
    pub item_id: Uuid,
}

/// A place groceries are bought from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Market {
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            location: None,
            description: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Suggested item for quick entry; never required when adding items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetGroceryItem {
    pub id: Uuid,
    pub name: String,
    pub category: GroceryCategory,
    pub default_unit: GroceryUnit,
    pub is_custom: bool,
    pub is_active: bool,
}

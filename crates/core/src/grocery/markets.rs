//! Markets and preset items for quick grocery entry

use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use super::normalize_item_name;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{GeoPoint, GroceryCategory, GroceryUnit, Market, PresetGroceryItem};
use crate::storage::{with_write_tx, MarketStore};

pub struct MarketRegistry<'a> {
    conn: &'a Connection,
    clock: &'a dyn Clock,
}

impl<'a> MarketRegistry<'a> {
    pub fn new(conn: &'a Connection, clock: &'a dyn Clock) -> Self {
        Self { conn, clock }
    }

    #[instrument(skip(self, description))]
    pub fn create_market(
        &self,
        name: &str,
        location: Option<GeoPoint>,
        description: Option<String>,
    ) -> Result<Market> {
        let name = name.trim();
        if name.chars().count() < 2 {
            return Err(Error::invalid("market.name", "must be at least 2 characters"));
        }
        if let Some(point) = location.filter(|p| !p.is_valid()) {
            return Err(Error::InvalidCoordinates {
                longitude: point.longitude,
                latitude: point.latitude,
            });
        }

        let market = Market {
            location,
            description: description.filter(|d| !d.trim().is_empty()),
            created_at: self.clock.now(),
            ..Market::new(name.to_string())
        };
        with_write_tx(self.conn, |conn| MarketStore::new(conn).create(&market))?;
        info!(market_id = %market.id, name = %market.name, "Market created");
        Ok(market)
    }

    pub fn market(&self, id: Uuid) -> Result<Market> {
        MarketStore::new(self.conn).get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Market>> {
        MarketStore::new(self.conn).find_by_name(name)
    }

    pub fn list_active(&self) -> Result<Vec<Market>> {
        MarketStore::new(self.conn).list_active()
    }

    /// Hide a market from pickers; items already bought there keep the link
    #[instrument(skip(self))]
    pub fn deactivate(&self, id: Uuid) -> Result<()> {
        with_write_tx(self.conn, |conn| MarketStore::new(conn).set_active(id, false))
    }

    #[instrument(skip(self))]
    pub fn add_preset(
        &self,
        name: &str,
        category: GroceryCategory,
        default_unit: GroceryUnit,
        is_custom: bool,
    ) -> Result<PresetGroceryItem> {
        let name = normalize_item_name(name);
        if name.is_empty() {
            return Err(Error::InvalidGroceryItem {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        let preset = PresetGroceryItem {
            id: Uuid::new_v4(),
            name,
            category,
            default_unit,
            is_custom,
            is_active: true,
        };
        with_write_tx(self.conn, |conn| MarketStore::new(conn).create_preset(&preset))?;
        Ok(preset)
    }

    pub fn list_presets(&self, category: Option<GroceryCategory>) -> Result<Vec<PresetGroceryItem>> {
        MarketStore::new(self.conn).list_presets(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grocery::GroceryLedger;
    use crate::models::{GroceryItemInput, Money, Quantity};
    use crate::storage::Database;
    use crate::testing::{clock_on, date, seed_hostel};

    #[test]
    fn test_market_names_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let markets = MarketRegistry::new(db.connection(), &clock);

        markets.create_market("Karwan Bazar", None, None).unwrap();
        let err = markets.create_market("Karwan Bazar", None, None).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { entity: "market", .. }));
        assert!(markets.find_by_name("karwan bazar").unwrap().is_some());
    }

    #[test]
    fn test_invalid_market_location_rejected() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let markets = MarketRegistry::new(db.connection(), &clock);

        let err = markets
            .create_market("Nowhere", Some(GeoPoint::new(190.0, 23.7)), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCoordinates { .. }));

        let ok = markets
            .create_market("New Market", Some(GeoPoint::new(90.38, 23.73)), Some(" ".into()))
            .unwrap();
        assert_eq!(ok.description, None);
    }

    #[test]
    fn test_deactivated_market_hidden_but_still_referenced() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let hostel = seed_hostel(&db, "MKT1", 10);
        let markets = MarketRegistry::new(db.connection(), &clock);
        let market = markets.create_market("Kaptan Bazar", None, None).unwrap();

        let grocery = GroceryLedger::new(db.connection(), &clock);
        let bazar = grocery.create_bazar(hostel.id, date(2025, 1, 1), None).unwrap();
        let input = GroceryItemInput::new(
            "Beef",
            GroceryCategory::Protein,
            Quantity::whole(2),
            GroceryUnit::Kg,
            Money::major(750),
        )
        .at_market(market.id);
        grocery.add_item(bazar.id, input).unwrap();

        markets.deactivate(market.id).unwrap();
        assert!(markets.list_active().unwrap().is_empty());

        let history: Vec<_> = grocery
            .price_history("beef", None, Some(market.id))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].market_id, Some(market.id));

        let err = grocery
            .add_item(
                bazar.id,
                GroceryItemInput::new(
                    "Beef",
                    GroceryCategory::Protein,
                    Quantity::whole(1),
                    GroceryUnit::Kg,
                    Money::major(750),
                )
                .at_market(Uuid::new_v4()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "market", .. }));
    }

    #[test]
    fn test_presets_filter_by_category() {
        let db = Database::open_in_memory().unwrap();
        let clock = clock_on(2025, 1, 1);
        let markets = MarketRegistry::new(db.connection(), &clock);

        markets
            .add_preset("Miniket Rice", GroceryCategory::RiceGrains, GroceryUnit::Kg, false)
            .unwrap();
        markets
            .add_preset("Potato", GroceryCategory::Vegetable, GroceryUnit::Kg, false)
            .unwrap();
        let err = markets
            .add_preset("potato", GroceryCategory::Vegetable, GroceryUnit::Kg, true)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));

        let veg = markets.list_presets(Some(GroceryCategory::Vegetable)).unwrap();
        assert_eq!(veg.len(), 1);
        assert_eq!(veg[0].name, "potato");
        assert_eq!(markets.list_presets(None).unwrap().len(), 2);
    }
}

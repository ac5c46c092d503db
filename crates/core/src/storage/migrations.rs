//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: users, hostels, rules, seats, memberships",
        sql: r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT UNIQUE,
                email TEXT UNIQUE,
                password_hash TEXT,
                current_hostel_id TEXT,
                created_at TEXT NOT NULL
            );

            -- Hostels table; seat columns other than total are a projection of seats
            CREATE TABLE IF NOT EXISTS hostels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                short_code TEXT NOT NULL UNIQUE,
                hostel_type TEXT NOT NULL,
                address TEXT,
                longitude REAL,
                latitude REAL,
                owner_id TEXT NOT NULL,
                manager_id TEXT,
                seats_total INTEGER NOT NULL DEFAULT 0,
                seats_occupied INTEGER NOT NULL DEFAULT 0,
                seats_available INTEGER NOT NULL DEFAULT 0,
                seats_maintenance INTEGER NOT NULL DEFAULT 0,
                suspended_from TEXT,
                suspended_until TEXT,
                suspension_reason TEXT,
                weight_breakfast INTEGER NOT NULL DEFAULT 50,
                weight_lunch INTEGER NOT NULL DEFAULT 100,
                weight_dinner INTEGER NOT NULL DEFAULT 100,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id),
                FOREIGN KEY (manager_id) REFERENCES users(id),
                CHECK (seats_occupied + seats_available + seats_maintenance <= seats_total)
            );

            -- Ordered house rules
            CREATE TABLE IF NOT EXISTS hostel_rules (
                hostel_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                level TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                fine TEXT,
                PRIMARY KEY (hostel_id, position),
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE
            );

            -- Seats are the source of truth for hostel seat counts
            CREATE TABLE IF NOT EXISTS seats (
                id TEXT PRIMARY KEY,
                hostel_id TEXT NOT NULL,
                seat_number TEXT NOT NULL,
                room_number TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'AVAILABLE_FOR_RENT',
                rent INTEGER NOT NULL DEFAULT 0,
                occupant_id TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                FOREIGN KEY (occupant_id) REFERENCES users(id),
                UNIQUE(hostel_id, seat_number),
                CHECK ((status = 'OCCUPIED') = (occupant_id IS NOT NULL))
            );

            -- Memberships cover [join_date, leaving_date)
            CREATE TABLE IF NOT EXISTS memberships (
                id TEXT PRIMARY KEY,
                hostel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                seat_id TEXT,
                join_date TEXT NOT NULL,
                leaving_date TEXT,
                security_paid INTEGER NOT NULL DEFAULT 0,
                security_amount INTEGER,
                agreed_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (seat_id) REFERENCES seats(id) ON DELETE SET NULL,
                CHECK (leaving_date IS NULL OR leaving_date >= join_date)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add meal ledger",
        sql: r#"
            -- One row per user per day; counts include guests separately
            CREATE TABLE IF NOT EXISTS meals (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                hostel_id TEXT NOT NULL,
                date TEXT NOT NULL,
                breakfast INTEGER NOT NULL DEFAULT 0 CHECK (breakfast >= 0),
                lunch INTEGER NOT NULL DEFAULT 0 CHECK (lunch >= 0),
                dinner INTEGER NOT NULL DEFAULT 0 CHECK (dinner >= 0),
                breakfast_guests INTEGER NOT NULL DEFAULT 0 CHECK (breakfast_guests >= 0),
                lunch_guests INTEGER NOT NULL DEFAULT 0 CHECK (lunch_guests >= 0),
                dinner_guests INTEGER NOT NULL DEFAULT 0 CHECK (dinner_guests >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                UNIQUE(user_id, date)
            );
        "#,
    },
    Migration {
        version: 3,
        description: "Add grocery ledger: markets, bazars, items, presets",
        sql: r#"
            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                longitude REAL,
                latitude REAL,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            -- grand_total is always recomputed from grocery_items
            CREATE TABLE IF NOT EXISTS bazars (
                id TEXT PRIMARY KEY,
                hostel_id TEXT NOT NULL,
                date TEXT NOT NULL,
                added_by TEXT,
                grand_total INTEGER NOT NULL DEFAULT 0,
                receipts TEXT NOT NULL DEFAULT '[]',
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                FOREIGN KEY (added_by) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS grocery_items (
                id TEXT PRIMARY KEY,
                bazar_id TEXT NOT NULL,
                market_id TEXT,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                quantity_milli INTEGER NOT NULL CHECK (quantity_milli > 0),
                unit TEXT NOT NULL,
                price_per_unit INTEGER NOT NULL CHECK (price_per_unit >= 0),
                total_cost INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (bazar_id) REFERENCES bazars(id) ON DELETE CASCADE,
                FOREIGN KEY (market_id) REFERENCES markets(id)
            );

            CREATE TABLE IF NOT EXISTS preset_grocery_items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                default_unit TEXT NOT NULL,
                is_custom INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );
        "#,
    },
    Migration {
        version: 4,
        description: "Add billing periods and fines",
        sql: r#"
            CREATE TABLE IF NOT EXISTS billing_periods (
                id TEXT PRIMARY KEY,
                hostel_id TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                closed_by TEXT NOT NULL,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                FOREIGN KEY (closed_by) REFERENCES users(id),
                CHECK (start_date <= end_date)
            );

            CREATE TABLE IF NOT EXISTS fines (
                id TEXT PRIMARY KEY,
                hostel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                rule_order INTEGER,
                amount INTEGER NOT NULL CHECK (amount >= 0),
                reason TEXT NOT NULL,
                assessed_on TEXT NOT NULL,
                assessed_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (hostel_id) REFERENCES hostels(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (assessed_by) REFERENCES users(id)
            );
        "#,
    },
    Migration {
        version: 5,
        description: "Add uniqueness guards and indexes for query performance",
        sql: r#"
            -- A user occupies at most one seat
            CREATE UNIQUE INDEX IF NOT EXISTS idx_seats_occupant
                ON seats(occupant_id) WHERE occupant_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_seats_hostel ON seats(hostel_id);
            CREATE INDEX IF NOT EXISTS idx_seats_status ON seats(status);

            -- At most one open-ended membership per user
            CREATE UNIQUE INDEX IF NOT EXISTS idx_memberships_open
                ON memberships(user_id) WHERE leaving_date IS NULL;
            CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id);
            CREATE INDEX IF NOT EXISTS idx_memberships_hostel ON memberships(hostel_id);

            -- Meal indexes
            CREATE INDEX IF NOT EXISTS idx_meals_hostel_date ON meals(hostel_id, date);

            -- Grocery indexes (price graphs group by name over time)
            CREATE INDEX IF NOT EXISTS idx_bazars_hostel_date ON bazars(hostel_id, date);
            CREATE INDEX IF NOT EXISTS idx_grocery_items_bazar ON grocery_items(bazar_id);
            CREATE INDEX IF NOT EXISTS idx_grocery_items_name ON grocery_items(name, created_at);
            CREATE INDEX IF NOT EXISTS idx_grocery_items_market_name
                ON grocery_items(market_id, name, created_at);
            CREATE INDEX IF NOT EXISTS idx_markets_active ON markets(is_active);

            -- Billing indexes
            CREATE INDEX IF NOT EXISTS idx_billing_periods_hostel
                ON billing_periods(hostel_id, start_date);
            CREATE INDEX IF NOT EXISTS idx_fines_hostel_date ON fines(hostel_id, assessed_on);
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version
fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            conn.execute_batch(migration.sql)?;
            record_migration(conn, migration)?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Get the latest migration version (test helper)
    fn latest_version() -> u32 {
        MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
    }

    #[test]
    fn test_migrations_run() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, latest_version());
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run twice
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, latest_version());
    }

    #[test]
    fn test_migrations_sequential() {
        // Verify migrations are numbered sequentially
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(
                migration.version as usize,
                i + 1,
                "Migration {} should have version {}",
                migration.description,
                i + 1
            );
        }
    }
}

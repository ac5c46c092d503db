//! SQLite storage layer for the mess ledger

mod bazars;
mod billing;
mod hostels;
mod markets;
mod meals;
mod memberships;
mod migrations;
pub(crate) mod parse;
mod seats;
mod users;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::instrument;

use crate::error::Result;

pub use bazars::{BazarStore, PriceKey};
pub use billing::BillingStore;
pub use hostels::HostelStore;
pub use markets::MarketStore;
pub use meals::{MealKey, MealStore};
pub use memberships::MembershipStore;
pub use seats::SeatStore;
pub use users::UserStore;

/// How long a writer waits for another connection's write lock
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Raw connection, for components that compose several stores in one transaction
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(&self.conn)
    }

    pub fn hostels(&self) -> HostelStore<'_> {
        HostelStore::new(&self.conn)
    }

    pub fn seats(&self) -> SeatStore<'_> {
        SeatStore::new(&self.conn)
    }

    pub fn memberships(&self) -> MembershipStore<'_> {
        MembershipStore::new(&self.conn)
    }

    pub fn meals(&self) -> MealStore<'_> {
        MealStore::new(&self.conn)
    }

    pub fn bazars(&self) -> BazarStore<'_> {
        BazarStore::new(&self.conn)
    }

    pub fn markets(&self) -> MarketStore<'_> {
        MarketStore::new(&self.conn)
    }

    pub fn billing(&self) -> BillingStore<'_> {
        BillingStore::new(&self.conn)
    }
}

/// Run `f` inside a write transaction.
///
/// Opens a `BEGIN IMMEDIATE` transaction when `conn` is in autocommit mode,
/// so the SQLite write lock is taken before any reads. When a transaction is
/// already open on `conn`, `f` joins it and the outer owner commits. The
/// transaction rolls back if `f` returns an error.
pub fn with_write_tx<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Run `f` inside a deferred read transaction so every query sees one snapshot.
/// Joins an enclosing transaction like `with_write_tx`.
pub fn with_read_tx<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.schema_version() >= 5);
    }

    #[test]
    fn test_write_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        conn.execute_batch("CREATE TABLE scratch (v INTEGER)").unwrap();

        let result: Result<()> = with_write_tx(conn, |conn| {
            conn.execute("INSERT INTO scratch (v) VALUES (1)", [])?;
            Err(Error::invalid("v", "forced failure"))
        });
        assert!(result.is_err());
        assert!(conn.is_autocommit());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_nested_write_tx_joins_outer() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        conn.execute_batch("CREATE TABLE scratch (v INTEGER)").unwrap();

        let result: Result<()> = with_write_tx(conn, |outer| {
            with_write_tx(outer, |inner| {
                inner.execute("INSERT INTO scratch (v) VALUES (1)", [])?;
                Ok(())
            })?;
            Err(Error::invalid("v", "outer failure"))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_immediate_transactions_serialize_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mess.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();
        second.set_busy_timeout(Duration::from_millis(0)).unwrap();

        let tx = Transaction::new_unchecked(first.connection(), TransactionBehavior::Immediate)
            .unwrap();

        let err = with_write_tx(second.connection(), |_| Ok(())).unwrap_err();
        assert!(err.is_retryable(), "expected busy error, got {err:?}");

        tx.commit().unwrap();
        with_write_tx(second.connection(), |_| Ok(())).unwrap();
    }
}

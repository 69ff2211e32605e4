//! SQLite Platform Repository
//!
//! Creation transactions start with `BEGIN IMMEDIATE`, taking the write lock
//! before the first read. Overlapping creations then queue on the busy timeout
//! instead of failing with `SQLITE_BUSY_SNAPSHOT` when a deferred read
//! transaction tries to upgrade after another writer committed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ps_common::OutboxItem;
use ps_outbox::sqlite::SqliteOutboxRepository;
use ps_outbox::OutboxRepository;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{info, warn};

use super::{PlatformRepository, RepositoryTransaction, StorageError, StorageResult};
use crate::customer::{Customer, NewCustomer};
use crate::platform::{NewPlatform, Platform};

/// How long a creation waits for another writer to finish
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool with the settings the service runs with: WAL journaling so
/// reads proceed next to a writer, and a busy timeout for queued writers.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS platforms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        publisher TEXT NOT NULL,
        cost TEXT NOT NULL,
        customer_id INTEGER NOT NULL REFERENCES customers(id)
    );
    CREATE INDEX IF NOT EXISTS idx_platforms_customer_id ON platforms(customer_id);
"#;

pub struct SqlitePlatformRepository {
    pool: SqlitePool,
}

impl SqlitePlatformRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the customer, platform and outbox tables if missing.
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        SqliteOutboxRepository::new(self.pool.clone()).init_schema().await?;

        info!("Initialized SQLite platform schema");
        Ok(())
    }

    fn parse_customer(row: &SqliteRow) -> Customer {
        Customer {
            id: row.get("id"),
            email: row.get("email"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
        }
    }

    fn parse_platform(row: &SqliteRow) -> Platform {
        Platform {
            id: row.get("id"),
            name: row.get("name"),
            publisher: row.get("publisher"),
            cost: row.get("cost"),
            customer_id: row.get("customer_id"),
        }
    }
}

#[async_trait]
impl PlatformRepository for SqlitePlatformRepository {
    async fn begin(&self) -> StorageResult<Box<dyn RepositoryTransaction>> {
        Ok(Box::new(SqliteTransaction::begin_immediate(&self.pool).await?))
    }

    async fn find_platform_by_id(&self, id: i64) -> StorageResult<Option<Platform>> {
        let row = sqlx::query("SELECT id, name, publisher, cost, customer_id FROM platforms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::parse_platform))
    }

    async fn find_all_platforms(&self) -> StorageResult<Vec<Platform>> {
        let rows = sqlx::query("SELECT id, name, publisher, cost, customer_id FROM platforms ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::parse_platform).collect())
    }
}

/// A write transaction on a connection held for its whole lifetime.
///
/// The transaction is driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` statements
/// so a failed `COMMIT` leaves the connection in hand for the rollback that
/// follows it.
struct SqliteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SqliteTransaction {
    async fn begin_immediate(pool: &SqlitePool) -> StorageResult<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn open(&mut self) -> StorageResult<&mut PoolConnection<Sqlite>> {
        self.conn.as_mut().ok_or(StorageError::TransactionClosed)
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        // Never hand a connection with an open transaction back to the pool;
        // closing it makes SQLite discard the transaction.
        if let Some(conn) = self.conn.take() {
            warn!("Transaction dropped while open, closing its connection");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl RepositoryTransaction for SqliteTransaction {
    async fn find_customer_by_email(&mut self, email: &str) -> StorageResult<Option<Customer>> {
        let conn = self.open()?;
        let row = sqlx::query("SELECT id, email, first_name, last_name FROM customers WHERE email = ?")
            .bind(email)
            .fetch_optional(&mut **conn)
            .await?;

        Ok(row.as_ref().map(SqlitePlatformRepository::parse_customer))
    }

    async fn create_customer(&mut self, customer: &NewCustomer) -> StorageResult<Customer> {
        let conn = self.open()?;
        let inserted = sqlx::query(
            "INSERT INTO customers (email, first_name, last_name) VALUES (?, ?, ?) \
             ON CONFLICT(email) DO NOTHING \
             RETURNING id, email, first_name, last_name",
        )
        .bind(&customer.email)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .fetch_optional(&mut **conn)
        .await?;

        if let Some(row) = inserted {
            return Ok(SqlitePlatformRepository::parse_customer(&row));
        }

        let existing = sqlx::query("SELECT id, email, first_name, last_name FROM customers WHERE email = ?")
            .bind(&customer.email)
            .fetch_one(&mut **conn)
            .await?;

        Ok(SqlitePlatformRepository::parse_customer(&existing))
    }

    async fn create_platform(&mut self, customer_id: i64, platform: &NewPlatform) -> StorageResult<Platform> {
        let conn = self.open()?;
        let row = sqlx::query(
            "INSERT INTO platforms (name, publisher, cost, customer_id) VALUES (?, ?, ?, ?) \
             RETURNING id, name, publisher, cost, customer_id",
        )
        .bind(&platform.name)
        .bind(&platform.publisher)
        .bind(&platform.cost)
        .bind(customer_id)
        .fetch_one(&mut **conn)
        .await?;

        Ok(SqlitePlatformRepository::parse_platform(&row))
    }

    async fn enqueue_event(&mut self, item: &OutboxItem) -> StorageResult<()> {
        let conn = self.open()?;
        ps_outbox::sqlite::enqueue(&mut **conn, item).await?;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        let conn = self.open()?;
        sqlx::query("COMMIT").execute(&mut **conn).await?;

        // Back to the pool only once the commit went through
        self.conn = None;
        Ok(())
    }

    /// No-op once committed. After a failed commit this issues a real
    /// `ROLLBACK`; if that fails too the connection is discarded.
    async fn rollback(&mut self) -> StorageResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        match sqlx::query("ROLLBACK").execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(e) => {
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}

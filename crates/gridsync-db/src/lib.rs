//! gridsync-db: SQLite persistence and change fan-out for gridsync.
//!
//! `Db` wraps a single connection and applies the schema migrations embedded
//! at build time. The repositories are thin typed views over one table each;
//! `SqliteStore` combines them into a `RemoteStore` for the sync core.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use gridsync_core::error::StoreError;

pub mod cell_repository;
pub mod note_repository;
pub mod sheet_repository;
pub mod store;

pub use store::SqliteStore;

include!(concat!(env!("OUT_DIR"), "/migrations.rs"));

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl Config {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Open(#[from] rusqlite::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("sheet {0:?} not found")]
    SheetNotFound(String),
    #[error("checked items: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid stored timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("unknown migration version {0}")]
    UnknownMigration(i32),
    #[error("migration {version} failed: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },
}

impl DbError {
    /// Busy or locked database: the caller may try again.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Open(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_busy() {
            return StoreError::unavailable(err.to_string());
        }
        match err {
            DbError::Validation(message) => StoreError::Validation { message },
            DbError::SheetNotFound(id) => StoreError::not_found("sheet", id),
            other => StoreError::Backend {
                message: other.to_string(),
            },
        }
    }
}

/// Current time in the fixed-width RFC 3339 form stored in every table.
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp(value.to_string()))
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(config: Config) -> Result<Self, DbError> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        debug!(path = %config.path.display(), "database opened");
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Highest applied migration version, 0 for a fresh database.
    pub fn schema_version(&self) -> Result<i32, DbError> {
        self.ensure_migrations_table()?;
        let version: Option<i32> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    /// Apply every embedded migration not yet applied. Returns how many ran.
    pub fn migrate_up(&mut self) -> Result<usize, DbError> {
        let latest = MIGRATIONS.last().map_or(0, |m| m.version);
        self.migrate_to(latest)
    }

    /// Migrate up or down to exactly `target`. Returns how many steps ran.
    pub fn migrate_to(&mut self, target: i32) -> Result<usize, DbError> {
        if target != 0 && !MIGRATIONS.iter().any(|m| m.version == target) {
            return Err(DbError::UnknownMigration(target));
        }
        let current = self.schema_version()?;
        let mut steps = 0;

        if target > current {
            for migration in MIGRATIONS
                .iter()
                .filter(|m| m.version > current && m.version <= target)
            {
                self.transaction(|tx| {
                    tx.execute_batch(migration.up_sql)
                        .map_err(|source| DbError::Migration {
                            version: migration.version,
                            source,
                        })?;
                    tx.execute(
                        "INSERT INTO schema_migrations (version, description, applied_at)
                         VALUES (?1, ?2, ?3)",
                        params![migration.version, migration.description, now_rfc3339()],
                    )?;
                    Ok(())
                })?;
                info!(version = migration.version, description = migration.description, "migration applied");
                steps += 1;
            }
        } else {
            for migration in MIGRATIONS
                .iter()
                .rev()
                .filter(|m| m.version <= current && m.version > target)
            {
                self.transaction(|tx| {
                    tx.execute_batch(migration.down_sql)
                        .map_err(|source| DbError::Migration {
                            version: migration.version,
                            source,
                        })?;
                    tx.execute(
                        "DELETE FROM schema_migrations WHERE version = ?1",
                        params![migration.version],
                    )?;
                    Ok(())
                })?;
                info!(version = migration.version, description = migration.description, "migration rolled back");
                steps += 1;
            }
        }
        Ok(steps)
    }

    /// Run `f` inside a transaction, committing only when it returns `Ok`.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DbError>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn ensure_migrations_table(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        Ok(())
    }
}

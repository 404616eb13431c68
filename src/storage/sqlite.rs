//! SQLite store opener
//!
//! The store owns exactly one physical connection. Opening validates the
//! store identity tag before anything writes to the file, applies pragmas,
//! runs migrations and compacts the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::migrate::{self, MigrationReport, MigrationSource};
use super::transaction::Transaction;
use crate::{APPLICATION_ID, Error, Result};

/// `journal_mode` pragma values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Truncate,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
        }
    }
}

/// `synchronous` pragma values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    #[default]
    Normal,
}

impl SyncMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Full => "FULL",
            SyncMode::Normal => "NORMAL",
        }
    }
}

/// Store settings, the `[store]` table of `barbell.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub migrations_dir: PathBuf,
    pub journal_mode: JournalMode,
    pub synchronous: SyncMode,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("barbell.db"),
            migrations_dir: PathBuf::from("migrations"),
            journal_mode: JournalMode::default(),
            synchronous: SyncMode::default(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Snapshot of store metadata
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub path: Option<PathBuf>,
    pub application_id: i32,
    pub schema_version: u32,
    pub journal_mode: String,
}

/// SQLite-backed store with a single write connection.
///
/// Cloning shares the same connection. Callers obtain access only through
/// [`SqliteStore::begin`]; a second `begin` waits until the current
/// transaction finishes.
#[derive(Clone)]
pub struct SqliteStore {
    pub(super) conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    migration: Arc<MigrationReport>,
    next_tx_id: Arc<AtomicU64>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist) and migrate it
    pub fn open(config: &StoreConfig, source: &dyn MigrationSource) -> Result<Self> {
        let path = config.path.as_path();
        if path.is_dir() {
            return Err(Error::Config(format!(
                "store path {} is a directory",
                path.display()
            )));
        }

        let is_new = !path.exists();
        if is_new {
            ensure_parent_dir(path)?;
        }

        tracing::info!(path = %path.display(), new = is_new, "Opening store");
        let mut conn = Connection::open(path)?;
        let report = initialize(&mut conn, config, source, is_new)?;

        Ok(Self::from_connection(conn, Some(path.to_path_buf()), report))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(source: &dyn MigrationSource) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        let report = initialize(&mut conn, &StoreConfig::default(), source, true)?;
        Ok(Self::from_connection(conn, None, report))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>, migration: MigrationReport) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            migration: Arc::new(migration),
            next_tx_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Migrations applied while opening this store
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Start a transaction, waiting for the connection if another one is active
    pub async fn begin(&self) -> Result<Transaction> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        Transaction::begin(Arc::clone(&self.conn), id).await
    }

    /// Read identity tag, schema version and journal mode
    pub async fn status(&self) -> Result<StoreStatus> {
        let tx = self.begin().await?;
        let path = self.path.clone();
        let status = tx
            .run(move |conn| {
                Ok(StoreStatus {
                    path,
                    application_id: conn.pragma_query_value(None, "application_id", |row| row.get(0))?,
                    schema_version: migrate::schema_version(conn)?,
                    journal_mode: conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?,
                })
            })
            .await;
        tx.rollback().await?;
        status
    }

    /// Close the physical connection.
    ///
    /// If other clones are still alive the connection closes when the last
    /// one drops.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => {
                conn.into_inner().close().map_err(|(_, err)| Error::Storage(err))?;
                tracing::info!("Store closed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Store still shared at shutdown, deferring close");
                Ok(())
            }
        }
    }
}

// ========== Initialization ==========

fn initialize(
    conn: &mut Connection,
    config: &StoreConfig,
    source: &dyn MigrationSource,
    is_new: bool,
) -> Result<MigrationReport> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    // Must run before anything that can write to the file
    verify_application_id(conn, is_new)?;
    apply_pragmas(conn, config)?;

    let report = migrate::migrate(conn, source)?;
    tracing::info!(
        version = report.current_version,
        applied = report.applied.len(),
        "Schema up to date"
    );

    vacuum(conn);
    tracing::info!("Database initialized successfully");
    Ok(report)
}

/// Check or stamp the `application_id` pragma
fn verify_application_id(conn: &Connection, is_new: bool) -> Result<()> {
    let current: i32 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;

    match current {
        APPLICATION_ID => {
            tracing::info!("Verified application_id: 0x{:08X}", current);
        }
        0 => {
            if is_new {
                tracing::info!("Set application_id to 0x{:08X} for new database", APPLICATION_ID);
            } else {
                tracing::warn!(
                    "Existing database has no application_id, stamping 0x{:08X}",
                    APPLICATION_ID
                );
            }
            conn.pragma_update(None, "application_id", APPLICATION_ID)?;
        }
        found => {
            tracing::error!(
                "Database application_id mismatch: expected 0x{:08X}, got 0x{:08X}",
                APPLICATION_ID,
                found
            );
            return Err(Error::ForeignStore {
                expected: APPLICATION_ID,
                found,
            });
        }
    }
    Ok(())
}

/// Applies SQLite pragmas required for durability and integrity
fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    let journal_mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        config.journal_mode.pragma_value(),
        |row| row.get(0),
    )?;
    conn.pragma_update(None, "synchronous", config.synchronous.pragma_value())?;

    let foreign_keys: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    if !foreign_keys {
        return Err(Error::Config(
            "foreign key enforcement could not be enabled".to_string(),
        ));
    }

    tracing::info!(journal_mode = %journal_mode, foreign_keys, "Database pragmas applied");
    Ok(())
}

/// Rebuild the file into minimal space; failure is not fatal
fn vacuum(conn: &Connection) {
    tracing::debug!("Running VACUUM to optimize database...");
    match conn.execute_batch("VACUUM") {
        Ok(()) => tracing::debug!("Database vacuumed successfully"),
        Err(err) => tracing::warn!("VACUUM failed, continuing: {}", err),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

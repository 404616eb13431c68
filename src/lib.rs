//! # Barbell - workout catalog server
//!
//! Exposes catalog entities (anatomy, muscles, exercises) and user-owned records
//! (workouts) over HTTP, backed by a single embedded SQLite store.
//!
//! Barbell provides:
//! - A store opener enforcing single-writer access and a store identity tag
//! - A versioned migration engine driven by `<version>_<name>.sql` files
//! - A request-scoped transaction coordinator (commit on success, rollback otherwise)
//! - Bearer credential verification and identity loading per request

pub mod storage;
pub mod identity;
pub mod catalog;
pub mod workout;
pub mod server;
pub mod config;

// Re-exports for convenient access
pub use storage::{SqliteStore, Transaction, TxState};
pub use storage::migrate::{DirectorySource, MigrationReport, MigrationSource, StaticSource};
pub use identity::{Identity, Role};

/// Persisted `application_id` marking a store as created by Barbell ("Barb").
pub const APPLICATION_ID: i32 = 0x4261_7262;

/// Result type alias for Barbell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Barbell operations
///
/// Every variant maps to exactly one HTTP status in `server::error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store was not created by this application: expected application_id 0x{expected:08X}, found 0x{found:08X}")]
    ForeignStore { expected: i32, found: i32 },

    #[error("Migration {version}_{name} failed: {source}")]
    Migration {
        version: u32,
        name: String,
        source: rusqlite::Error,
    },

    #[error("Duplicate migration version: {0}")]
    DuplicateMigration(u32),

    #[error("Migration source error: {0}")]
    MigrationSource(String),

    #[error("Database transaction required in request context")]
    TransactionRequired,

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Failed to commit database transaction: {0}")]
    CommitFailed(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Name already exists: {0}")]
    DuplicateName(String),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

//! Storage Layer - single-writer SQLite persistence
//!
//! One physical connection is shared by the whole process:
//! - `sqlite`: opening, identity tag, pragmas, compaction
//! - `migrate`: versioned schema migrations tracked in `user_version`
//! - `transaction`: request-scoped units of work holding the connection

pub mod migrate;
pub mod sqlite;
pub mod transaction;

pub use sqlite::{JournalMode, StoreConfig, StoreStatus, SqliteStore, SyncMode};
pub use transaction::{Transaction, TxState};

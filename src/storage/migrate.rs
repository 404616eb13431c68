//! Versioned schema migrations
//!
//! Migrations are identified as `<version>_<name>` and tracked through
//! `PRAGMA user_version`. A run applies every unit newer than the persisted
//! version in ascending order, inside one outer transaction with a savepoint
//! per unit: either the whole run lands or the store is left untouched.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;

use crate::{Error, Result};

/// A migration as discovered, before its identifier has been validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMigration {
    pub identifier: String,
    pub body: String,
}

/// Somewhere migrations can be discovered from
pub trait MigrationSource {
    /// Human-readable location, used in logs
    fn describe(&self) -> String;

    /// List raw migrations in discovery order
    fn discover(&self) -> Result<Vec<RawMigration>>;
}

/// A validated migration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub version: u32,
    pub name: String,
    pub body: String,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)_(.+)$").expect("static migration pattern"))
}

impl MigrationUnit {
    /// Parse a `<version>_<name>` identifier.
    ///
    /// Returns the reason on failure so callers can log it.
    pub fn parse(identifier: &str, body: impl Into<String>) -> std::result::Result<Self, String> {
        let captures = identifier_pattern()
            .captures(identifier)
            .ok_or_else(|| "name does not match <version>_<name>".to_string())?;

        let version: u32 = captures[1]
            .parse()
            .map_err(|e| format!("invalid version number {:?}: {}", &captures[1], e))?;

        // user_version is a signed 32-bit integer
        if version == 0 || version > i32::MAX as u32 {
            return Err(format!("version {} out of range", version));
        }

        Ok(Self {
            version,
            name: captures[2].to_string(),
            body: body.into(),
        })
    }

    /// `<version>_<name>` label for logs
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

/// Outcome of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub starting_version: u32,
    pub current_version: u32,
    pub applied: Vec<u32>,
    pub skipped: Vec<u32>,
}

// ========== Sources ==========

/// Loads `<version>_<name>.sql` files from a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for DirectorySource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn discover(&self) -> Result<Vec<RawMigration>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::MigrationSource(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::MigrationSource(format!("failed to read {}: {}", self.dir.display(), e))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                tracing::warn!("Skipping migration file with non UTF-8 name: {:?}", file_name);
                continue;
            };

            let Some(identifier) = file_name.strip_suffix(".sql") else {
                tracing::warn!("Skipping file with invalid name format: {}", file_name);
                continue;
            };

            let body = fs::read_to_string(entry.path()).map_err(|e| {
                Error::MigrationSource(format!("failed to read migration file {}: {}", file_name, e))
            })?;

            migrations.push(RawMigration {
                identifier: identifier.to_string(),
                body,
            });
        }

        Ok(migrations)
    }
}

/// Migrations held in memory (tests, embedded schemas)
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    migrations: Vec<RawMigration>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration; discovery order is insertion order
    pub fn with(mut self, identifier: impl Into<String>, body: impl Into<String>) -> Self {
        self.migrations.push(RawMigration {
            identifier: identifier.into(),
            body: body.into(),
        });
        self
    }
}

impl MigrationSource for StaticSource {
    fn describe(&self) -> String {
        "<static>".to_string()
    }

    fn discover(&self) -> Result<Vec<RawMigration>> {
        Ok(self.migrations.clone())
    }
}

// ========== Engine ==========

/// Validate and order discovered migrations.
///
/// Malformed identifiers are skipped with a warning. Two units sharing a
/// version is a configuration error.
pub fn plan(raw: Vec<RawMigration>) -> Result<Vec<MigrationUnit>> {
    let mut units: Vec<MigrationUnit> = raw
        .into_iter()
        .filter_map(|m| match MigrationUnit::parse(&m.identifier, m.body) {
            Ok(unit) => Some(unit),
            Err(reason) => {
                tracing::warn!("Skipping migration {}: {}", m.identifier, reason);
                None
            }
        })
        .collect();

    units.sort_by_key(|u| u.version);

    if let Some(pair) = units.windows(2).find(|pair| pair[0].version == pair[1].version) {
        tracing::error!(
            "Migrations {} and {} share a version",
            pair[0].label(),
            pair[1].label()
        );
        return Err(Error::DuplicateMigration(pair[0].version));
    }

    Ok(units)
}

/// Read the persisted schema version (0 on a fresh store)
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version)
        .map_err(|_| Error::MigrationSource(format!("invalid persisted schema version {}", version)))
}

/// Apply every migration newer than the persisted schema version
pub fn migrate(conn: &mut Connection, source: &dyn MigrationSource) -> Result<MigrationReport> {
    let starting_version = schema_version(conn)?;
    tracing::info!(version = starting_version, "Current database version");

    let units = plan(source.discover()?)?;
    tracing::info!("Loaded {} migration(s) from {}", units.len(), source.describe());

    let mut report = MigrationReport {
        starting_version,
        current_version: starting_version,
        ..Default::default()
    };

    if units.is_empty() {
        tracing::info!("No migrations found");
        return Ok(report);
    }

    let (done, pending): (Vec<_>, Vec<_>) = units
        .into_iter()
        .partition(|u| u.version <= starting_version);

    for unit in &done {
        tracing::debug!("Skipping migration {} (already applied)", unit.label());
        report.skipped.push(unit.version);
    }

    if pending.is_empty() {
        return Ok(report);
    }

    // Dropping `tx` on any error rolls back every unit of this run
    let mut tx = conn.transaction()?;
    for unit in &pending {
        tracing::info!("Applying migration {}...", unit.label());
        apply_unit(&mut tx, unit)?;
        report.applied.push(unit.version);
    }
    tx.commit()?;

    report.current_version = pending.last().map(|u| u.version).unwrap_or(starting_version);
    tracing::info!(
        from = starting_version,
        to = report.current_version,
        applied = report.applied.len(),
        "Schema migrated"
    );
    Ok(report)
}

fn apply_unit(tx: &mut rusqlite::Transaction<'_>, unit: &MigrationUnit) -> Result<()> {
    let failed = |source| Error::Migration {
        version: unit.version,
        name: unit.name.clone(),
        source,
    };

    let sp = tx.savepoint().map_err(failed)?;
    sp.execute_batch(&unit.body).map_err(failed)?;
    sp.pragma_update(None, "user_version", unit.version).map_err(failed)?;
    sp.commit().map_err(failed)?;
    Ok(())
}

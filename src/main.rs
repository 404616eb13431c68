//! Barbell CLI - serve the workout catalog and manage its store

use barbell::config::{self, BarbellConfig};
use barbell::identity::{self, NewIdentity, Role};
use barbell::server;
use barbell::storage::SqliteStore;
use barbell::DirectorySource;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "barbell")]
#[command(version)]
#[command(about = "Workout catalog server on a single-writer SQLite store")]
#[command(long_about = r#"
Barbell serves muscles, exercises and workouts over HTTP. Every request runs
inside one transaction on the embedded store: committed when the handler
succeeds, rolled back otherwise.

Example usage:
  barbell init
  barbell hash-token my-secret-token
  barbell user add --subject auth0|123 --email me@example.com --role admin
  barbell serve --port 8080
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the store, apply migrations and serve HTTP
    Serve {
        /// Port to listen on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Apply pending migrations and exit
    Migrate {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show store identity tag, schema version and journal mode
    Status {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Manage local identities
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Print the SHA-256 digest of a bearer token for `[[auth.tokens]]`
    HashToken {
        token: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register an identity for a verified subject
    Add {
        #[arg(long)]
        subject: String,

        #[arg(long)]
        email: String,

        /// USER or ADMIN
        #[arg(long, default_value = "USER")]
        role: String,
    },
}

fn open_store(config: &BarbellConfig) -> anyhow::Result<SqliteStore> {
    let source = DirectorySource::new(config.store.migrations_dir.clone());
    Ok(SqliteStore::open(&config.store, &source)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port, database } => {
            if let Some(port) = port {
                cfg.server.port = port;
            }
            if let Some(database) = database {
                cfg.store.path = database;
            }
            server::start_server(cfg).await?;
        }

        Commands::Migrate { database } => {
            if let Some(database) = database {
                cfg.store.path = database;
            }
            let store = open_store(&cfg)?;
            let report = store.migration_report().clone();

            println!("🗄️  Database: {}", cfg.store.path.display());
            if report.applied.is_empty() {
                println!("✅ Schema already at version {}", report.current_version);
            } else {
                println!(
                    "✅ Migrated from version {} to {} ({} applied)",
                    report.starting_version,
                    report.current_version,
                    report.applied.len()
                );
            }
            store.close()?;
        }

        Commands::Status { database } => {
            if let Some(database) = database {
                cfg.store.path = database;
            }
            let store = open_store(&cfg)?;
            let status = store.status().await?;

            println!("📊 Barbell Store ({})", cfg.store.path.display());
            println!("------------------------------------");
            println!("application_id: 0x{:08X}", status.application_id);
            println!("schema version: {}", status.schema_version);
            println!("journal mode:   {}", status.journal_mode);
            store.close()?;
        }

        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            config::write_config(&path, &BarbellConfig::default(), force)?;
            println!("✅ Wrote {}", path.display());
        }

        Commands::User { command: UserCommands::Add { subject, email, role } } => {
            let role: Role = role.parse()?;
            let store = open_store(&cfg)?;

            let tx = store.begin().await?;
            let input = NewIdentity {
                subject_id: subject,
                email,
                role,
            };
            match identity::create(&tx, input).await {
                Ok(created) => {
                    tx.commit().await?;
                    println!("✅ Added {} ({}) as {}", created.email, created.subject_id, created.role);
                }
                Err(err) => {
                    tx.rollback().await?;
                    return Err(err.into());
                }
            }
            store.close()?;
        }

        Commands::HashToken { token } => {
            println!("{}", server::auth::hash_token(&token));
        }
    }

    Ok(())
}

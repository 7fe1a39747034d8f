use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Opens the database, creating the file and its parent directory if needed.
///
/// Used by `init`; every other command goes through [`connect_existing`].
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    open(config, true).await
}

/// Opens an existing database. A missing file is an error.
pub async fn connect_existing(config: &Config) -> Result<SqlitePool> {
    if !config.db.path.exists() {
        bail!(
            "Database not found at {} (run `copilot init` first)",
            config.db.path.display()
        );
    }
    open(config, false).await
}

async fn open(config: &Config, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db.path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the billing and resources tables and their indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create billing table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS billing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_month TEXT NOT NULL,
            account_id TEXT NOT NULL DEFAULT '',
            subscription TEXT NOT NULL DEFAULT '',
            service TEXT NOT NULL DEFAULT 'unknown',
            resource_group TEXT NOT NULL DEFAULT 'unknown',
            resource_id TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            usage_qty REAL NOT NULL DEFAULT 0,
            unit_cost REAL NOT NULL DEFAULT 0,
            cost REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create resources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            resource_id TEXT PRIMARY KEY,
            owner TEXT,
            env TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_billing_month ON billing(invoice_month)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_billing_resource ON billing(resource_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_billing_service ON billing(service)")
        .execute(pool)
        .await?;

    Ok(())
}

//! KPI, trend, recommendation and status reports for the CLI.
//!
//! Each `run_*` function opens the existing database, runs the store
//! queries and prints a plain-text table to stdout.

use anyhow::{bail, Result};

use finops_copilot_core::models::is_invoice_month;
use finops_copilot_core::store::CostStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteCostStore;
use crate::text_index::TextIndex;

async fn open_store(config: &Config) -> Result<SqliteCostStore> {
    let pool = db::connect_existing(config).await?;
    Ok(SqliteCostStore::new(pool))
}

fn check_month(month: &str) -> Result<()> {
    if !is_invoice_month(month) {
        bail!("month must be YYYY-MM, got '{}'", month);
    }
    Ok(())
}

/// Prints the KPI summary and per-owner costs for one month.
pub async fn run_kpi(config: &Config, month: &str) -> Result<()> {
    check_month(month)?;
    let store = open_store(config).await?;
    let kpi = store.monthly_kpi(month).await?;
    let owners = store.cost_by_owner(month).await?;

    println!("KPI {}", kpi.month);
    println!("  total cost: {:.2}", kpi.total_cost);

    print_breakdown("by service", kpi.by_service.iter());
    print_breakdown("by resource group", kpi.by_resource_group.iter());
    print_breakdown("by owner", owners.iter().map(|r| (&r.owner, &r.cost)));
    Ok(())
}

fn print_breakdown<'a>(title: &str, rows: impl Iterator<Item = (&'a String, &'a f64)>) {
    let rows: Vec<_> = rows.collect();
    println!();
    println!("  {}:", title);
    if rows.is_empty() {
        println!("    (none)");
    }
    for (name, cost) in rows {
        println!("    {:<24} {:>12.2}", name, cost);
    }
}

pub async fn run_trend(config: &Config, owner: &str) -> Result<()> {
    let store = open_store(config).await?;
    let points = store.monthly_trend(owner).await?;

    println!("trend for {}", owner);
    if points.is_empty() {
        println!("  No data.");
    }
    for p in &points {
        println!("  {}  {:>12.2}", p.month, p.total_cost);
    }
    Ok(())
}

/// Prints idle resources and rows missing service or group tags.
pub async fn run_recommend(config: &Config, month: Option<&str>, threshold: f64) -> Result<()> {
    if let Some(m) = month {
        check_month(m)?;
    }
    if !threshold.is_finite() || threshold < 0.0 {
        bail!("threshold must be a non-negative number");
    }
    let store = open_store(config).await?;
    let idle = store.detect_idle_resources(threshold, month).await?;
    let untagged = store.missing_owner_tags(month).await?;

    println!(
        "recommendations ({}, usage <= {})",
        month.unwrap_or("all months"),
        threshold
    );
    println!();
    println!("  idle resources: {}", idle.len());
    for r in &idle {
        println!(
            "    {:<20} cost {:>10.2}  saving {:>10.2}  [{}]",
            r.resource_id, r.cost, r.estimated_saving, r.source
        );
    }
    let saving: f64 = idle.iter().map(|r| r.estimated_saving).sum();
    println!("  estimated saving: {:.2}", saving);

    println!();
    println!("  missing tags: {}", untagged.len());
    for r in &untagged {
        println!("    {:<20} cost {:>10.2}  [{}]", r.resource_id, r.cost, r.source);
    }
    Ok(())
}

/// Prints row counts, database size and index state.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let counts = store.counts().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let index = TextIndex::open(config)?;

    println!("FinOps Copilot status");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Billing rows:  {}", counts.billing_rows);
    println!("  Resources:     {}", counts.resources);
    println!();
    println!("  Index:         {}", config.index.dir.display());
    println!(
        "  Index state:   {}",
        if index.is_ready() {
            format!("ready ({} documents)", index.len())
        } else {
            "not ready (fallback documents)".to_string()
        }
    );
    println!("  Embeddings:    {}", config.embedding.provider);

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

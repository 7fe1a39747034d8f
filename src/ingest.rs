//! CSV ingestion for billing exports and resource inventories.
//!
//! Billing rows get defaults for missing values (numbers → `0.0`,
//! service/resource group → `"unknown"`) and are appended. Resource rows
//! are upserted on `resource_id`. Loading billing also runs the data
//! quality checks and, when a billing row carries a `tags_json` object with
//! an `owner` key, inserts a resource row for resources not yet known.

use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use finops_copilot_core::models::{normalize_owner, BillingRecord, ResourceRecord, UNKNOWN};
use finops_copilot_core::store::CostStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteCostStore;

/// A data quality problem found in a billing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityCheck {
    NullResourceId,
    NegativeCost,
    DuplicateResourceIds,
}

impl QualityCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCheck::NullResourceId => "null_resource_id",
            QualityCheck::NegativeCost => "negative_cost",
            QualityCheck::DuplicateResourceIds => "duplicate_resource_ids",
        }
    }
}

impl fmt::Display for QualityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct BillingCsvRow {
    invoice_month: String,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    resource_group: Option<String>,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    usage_qty: Option<f64>,
    #[serde(default)]
    unit_cost: Option<f64>,
    #[serde(default)]
    cost: Option<f64>,
    #[serde(default)]
    tags_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceCsvRow {
    resource_id: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    env: Option<String>,
    #[serde(default)]
    tags_json: Option<String>,
}

/// A parsed billing file.
#[derive(Debug, Default)]
pub struct ParsedBilling {
    pub records: Vec<BillingRecord>,
    /// Resources named by an `owner` tag on a billing row.
    pub tagged_resources: Vec<ResourceRecord>,
    pub checks: Vec<QualityCheck>,
}

/// Summary of one billing load.
#[derive(Debug)]
pub struct BillingLoadReport {
    pub rows: u64,
    pub resources_from_tags: u64,
    pub checks: Vec<QualityCheck>,
}

fn text_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn owner_from_tags(tags_json: &str) -> Option<String> {
    let tags: serde_json::Value = serde_json::from_str(tags_json).ok()?;
    normalize_owner(tags.get("owner")?.as_str())
}

/// Parses a billing CSV, applying defaults and quality checks.
pub fn read_billing_csv<R: Read>(reader: R) -> Result<ParsedBilling> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut parsed = ParsedBilling::default();
    let mut seen = HashSet::new();
    let mut tagged = HashSet::new();
    let (mut null_id, mut negative, mut duplicate) = (false, false, false);

    for (line, row) in rdr.deserialize::<BillingCsvRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid billing row {}", line + 2))?;

        let resource_id = row.resource_id.unwrap_or_default();
        if resource_id.is_empty() {
            null_id = true;
        } else if !seen.insert(resource_id.clone()) {
            duplicate = true;
        }

        let cost = row.cost.unwrap_or(0.0);
        if cost < 0.0 {
            negative = true;
        }

        if let Some(tags) = row.tags_json.as_deref() {
            if let Some(owner) = owner_from_tags(tags) {
                if !resource_id.is_empty() && tagged.insert(resource_id.clone()) {
                    parsed.tagged_resources.push(ResourceRecord {
                        resource_id: resource_id.clone(),
                        owner: Some(owner),
                        env: String::new(),
                        tags_json: tags.to_string(),
                    });
                }
            }
        }

        parsed.records.push(BillingRecord {
            invoice_month: row.invoice_month,
            account_id: row.account_id.unwrap_or_default(),
            subscription: row.subscription.unwrap_or_default(),
            service: text_or(row.service, UNKNOWN),
            resource_group: text_or(row.resource_group, UNKNOWN),
            resource_id,
            region: row.region.unwrap_or_default(),
            usage_qty: row.usage_qty.unwrap_or(0.0),
            unit_cost: row.unit_cost.unwrap_or(0.0),
            cost,
        });
    }

    if null_id {
        parsed.checks.push(QualityCheck::NullResourceId);
    }
    if negative {
        parsed.checks.push(QualityCheck::NegativeCost);
    }
    if duplicate {
        parsed.checks.push(QualityCheck::DuplicateResourceIds);
    }
    Ok(parsed)
}

/// Parses a resources CSV. Owners are normalized; missing tags become `{}`.
pub fn read_resources_csv<R: Read>(reader: R) -> Result<Vec<ResourceRecord>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut records = Vec::new();
    for (line, row) in rdr.deserialize::<ResourceCsvRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid resource row {}", line + 2))?;
        records.push(ResourceRecord {
            resource_id: row.resource_id,
            owner: normalize_owner(row.owner.as_deref()),
            env: row.env.unwrap_or_default(),
            tags_json: text_or(row.tags_json, "{}"),
        });
    }
    Ok(records)
}

/// Loads a billing CSV into the store.
pub async fn load_billing(store: &dyn CostStore, path: &Path) -> Result<BillingLoadReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open billing file: {}", path.display()))?;
    let parsed = read_billing_csv(file)?;

    let rows = store.insert_billing(&parsed.records).await?;
    let resources_from_tags = store
        .insert_missing_resources(&parsed.tagged_resources)
        .await?;

    tracing::info!(
        path = %path.display(),
        rows,
        resources_from_tags,
        "billing loaded"
    );
    if !parsed.checks.is_empty() {
        tracing::warn!(checks = ?parsed.checks, "billing quality checks failed");
    }

    Ok(BillingLoadReport {
        rows,
        resources_from_tags,
        checks: parsed.checks,
    })
}

/// Loads a resources CSV into the store. Returns the number of rows upserted.
pub async fn load_resources(store: &dyn CostStore, path: &Path) -> Result<u64> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open resources file: {}", path.display()))?;
    let records = read_resources_csv(file)?;
    let upserted = store.upsert_resources(&records).await?;
    tracing::info!(path = %path.display(), upserted, "resources loaded");
    Ok(upserted)
}

pub async fn run_load_billing(config: &Config, path: &Path) -> Result<()> {
    let pool = db::connect_existing(config).await?;
    let store = SqliteCostStore::new(pool);
    let report = load_billing(&store, path).await?;

    println!("load billing {}", path.display());
    println!("  rows inserted: {}", report.rows);
    println!("  resources from tags: {}", report.resources_from_tags);
    let checks: Vec<&str> = report.checks.iter().map(QualityCheck::as_str).collect();
    if checks.is_empty() {
        println!("  quality checks: ok");
    } else {
        println!("  quality checks: {}", checks.join(", "));
    }
    Ok(())
}

pub async fn run_load_resources(config: &Config, path: &Path) -> Result<()> {
    let pool = db::connect_existing(config).await?;
    let store = SqliteCostStore::new(pool);
    let upserted = load_resources(&store, path).await?;

    println!("load resources {}", path.display());
    println!("  resources upserted: {}", upserted);
    Ok(())
}

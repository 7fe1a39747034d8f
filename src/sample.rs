//! Synthetic billing and resource data.
//!
//! Writes `billing.csv` and `resources.csv` in the ingestion format. The
//! generator is seeded, so the same options always produce the same files.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Months, NaiveDate};

const SERVICES: [&str; 6] = ["Compute", "Storage", "DB", "Networking", "AI", "Analytics"];
const RESOURCE_GROUPS: [&str; 4] = ["rg-prod", "rg-dev", "rg-test", "rg-unknown"];
const REGIONS: [&str; 3] = ["eastus", "westus", "centralindia"];
const ENVS: [&str; 3] = ["prod", "staging", "dev"];
const OWNERS: [Option<&str>; 4] = [Some("alice"), Some("bob"), Some("carol"), None];

#[derive(Debug, Clone)]
pub struct SampleOptions {
    pub dir: PathBuf,
    pub resources: usize,
    pub months: usize,
    /// First invoice month, `YYYY-MM`.
    pub start_month: String,
    pub seed: u64,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            resources: 50,
            months: 6,
            start_month: "2025-04".to_string(),
            seed: 42,
        }
    }
}

/// Paths and row counts of a generated sample.
#[derive(Debug)]
pub struct SampleFiles {
    pub billing: PathBuf,
    pub resources: PathBuf,
    pub billing_rows: usize,
    pub resource_rows: usize,
}

/// Seeded splitmix64 generator.
struct SampleRng(u64);

impl SampleRng {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next_u64() % items.len() as u64) as usize]
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn month_list(start: &str, count: usize) -> Result<Vec<String>> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", start), "%Y-%m-%d")
        .with_context(|| format!("Invalid start month: {}", start))?;
    (0..count)
        .map(|i| {
            first
                .checked_add_months(Months::new(i as u32))
                .map(|d| d.format("%Y-%m").to_string())
                .ok_or_else(|| anyhow::anyhow!("month out of range"))
        })
        .collect()
}

/// Writes the sample CSV files into `options.dir`.
pub fn generate_sample(options: &SampleOptions) -> Result<SampleFiles> {
    if options.resources == 0 || options.months == 0 {
        bail!("sample needs at least one resource and one month");
    }
    std::fs::create_dir_all(&options.dir)
        .with_context(|| format!("Failed to create {}", options.dir.display()))?;

    let months = month_list(&options.start_month, options.months)?;
    let mut rng = SampleRng(options.seed);

    let resources_path = options.dir.join("resources.csv");
    let mut resources = csv::Writer::from_path(&resources_path)?;
    resources.write_record(["resource_id", "owner", "env", "tags_json"])?;

    let mut owners = Vec::with_capacity(options.resources);
    for i in 0..options.resources {
        let resource_id = format!("res-{:04}", i);
        let owner = rng.pick(&OWNERS);
        let tags = serde_json::json!({
            "app": format!("app-{}", rng.next_u64() % 50 + 1),
            "size": rng.pick(&["S", "M", "L"]),
        })
        .to_string();
        resources.write_record([
            resource_id.as_str(),
            owner.unwrap_or(""),
            rng.pick(&ENVS),
            tags.as_str(),
        ])?;
        owners.push((resource_id, owner));
    }
    resources.flush()?;

    let billing_path = options.dir.join("billing.csv");
    let mut billing = csv::Writer::from_path(&billing_path)?;
    billing.write_record([
        "invoice_month",
        "account_id",
        "subscription",
        "service",
        "resource_group",
        "resource_id",
        "region",
        "usage_qty",
        "unit_cost",
        "cost",
        "tags_json",
    ])?;

    let mut billing_rows = 0;
    for month in &months {
        for (resource_id, owner) in &owners {
            let usage = round_to(rng.unit() * 100.0, 3);
            let unit_cost = round_to(rng.unit() * 2.5, 3);
            let cost = round_to(usage * unit_cost, 3);
            let tags = match owner {
                Some(o) => serde_json::json!({ "owner": o }),
                None => serde_json::json!({}),
            }
            .to_string();
            let (usage, unit_cost, cost) =
                (usage.to_string(), unit_cost.to_string(), cost.to_string());
            billing.write_record([
                month.as_str(),
                "acct-1",
                "sub-1",
                rng.pick(&SERVICES),
                rng.pick(&RESOURCE_GROUPS),
                resource_id.as_str(),
                rng.pick(&REGIONS),
                usage.as_str(),
                unit_cost.as_str(),
                cost.as_str(),
                tags.as_str(),
            ])?;
            billing_rows += 1;
        }
    }
    billing.flush()?;

    Ok(SampleFiles {
        billing: billing_path,
        resources: resources_path,
        billing_rows,
        resource_rows: owners.len(),
    })
}

pub fn run_generate_sample(options: &SampleOptions) -> Result<()> {
    let files = generate_sample(options)?;
    tracing::info!(dir = %options.dir.display(), seed = options.seed, "sample generated");
    println!("sample generated");
    println!(
        "  billing:   {} ({} rows)",
        files.billing.display(),
        files.billing_rows
    );
    println!(
        "  resources: {} ({} rows)",
        files.resources.display(),
        files.resource_rows
    );
    Ok(())
}

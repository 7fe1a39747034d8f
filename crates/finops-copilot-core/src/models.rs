//! Core data models used throughout FinOps Copilot.
//!
//! These types represent the billing and resource rows held by the tabular
//! store, the aggregate rows its queries return, and the documents held by
//! the text index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Literal used at every read boundary for a missing owner, service or
/// resource group.
pub const UNKNOWN: &str = "unknown";

/// One cost line from a billing export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub invoice_month: String,
    pub account_id: String,
    pub subscription: String,
    pub service: String,
    pub resource_group: String,
    pub resource_id: String,
    pub region: String,
    pub usage_qty: f64,
    pub unit_cost: f64,
    pub cost: f64,
}

/// Ownership and environment metadata for one resource.
///
/// `owner` is `None` when no owner is recorded; [`normalize_owner`] is the
/// single place that decides what counts as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: String,
    pub owner: Option<String>,
    pub env: String,
    pub tags_json: String,
}

/// A billing row joined with its resource metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingWithOwner {
    pub billing: BillingRecord,
    pub owner: Option<String>,
    pub env: Option<String>,
    pub tags_json: Option<String>,
}

/// A text document stored in the text index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub text: String,
    pub source: String,
}

impl IndexedDocument {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Total cost attributed to one owner. Serialized as `[owner, cost]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "(String, f64)", from = "(String, f64)")]
pub struct OwnerCost {
    pub owner: String,
    pub cost: f64,
}

impl From<OwnerCost> for (String, f64) {
    fn from(row: OwnerCost) -> Self {
        (row.owner, row.cost)
    }
}

impl From<(String, f64)> for OwnerCost {
    fn from((owner, cost): (String, f64)) -> Self {
        Self { owner, cost }
    }
}

/// Total cost of one owner in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub month: String,
    pub total_cost: f64,
}

/// A ranked (service, resource, owner) spend row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceExpenditure {
    pub service: String,
    pub resource_id: String,
    pub owner: String,
    pub total_cost: f64,
}

/// Total cost of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    pub service: String,
    pub cost: f64,
}

/// Service data attached to an answer: either the single most used service
/// or a ranked expenditure list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopService {
    MostUsed(ServiceCost),
    Ranked(Vec<ServiceExpenditure>),
}

/// A billing row whose usage is at or below the idle threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleResource {
    pub resource_id: String,
    pub cost: f64,
    /// Heuristic: half of the row's cost.
    pub estimated_saving: f64,
    /// `billing:<row id>`
    pub source: String,
}

/// A billing row whose service or resource group is unrecorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UntaggedCost {
    pub resource_id: String,
    pub cost: f64,
    pub source: String,
}

/// Headline numbers for one invoice month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyKpi {
    pub month: String,
    pub total_cost: f64,
    pub by_service: BTreeMap<String, f64>,
    pub by_resource_group: BTreeMap<String, f64>,
}

/// Row counts of the two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreCounts {
    pub billing_rows: i64,
    pub resources: i64,
}

/// Fraction of a resource's cost assumed recoverable by shutting it down.
pub const IDLE_SAVING_RATIO: f64 = 0.5;

/// Maps the various spellings of "no owner" to `None` and trims the rest.
pub fn normalize_owner(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "unknown" | "none" | "nan" | "null" => None,
        _ => Some(value.to_string()),
    }
}

/// Display form of an optional owner.
pub fn owner_label(owner: Option<&str>) -> String {
    owner.unwrap_or(UNKNOWN).to_string()
}

/// Builds the `billing:<id>` citation for a billing row.
pub fn billing_source(row_id: i64) -> String {
    format!("billing:{}", row_id)
}

/// Returns `true` for strings of the form `YYYY-MM`.
pub fn is_invoice_month(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    let digits = bytes[..4].iter().chain(&bytes[5..]).all(u8::is_ascii_digit);
    let month = value[5..].parse::<u8>().unwrap_or(0);
    digits && (1..=12).contains(&month)
}

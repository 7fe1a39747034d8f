//! Storage abstraction for FinOps Copilot.
//!
//! The [`CostStore`] trait defines every billing and resource query needed
//! by the answer pipeline, the HTTP surface and the CLI, so that the SQLite
//! backend and the in-memory backend are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! Month arguments are matched as a prefix of `invoice_month`, so
//! `"2025-04"` matches rows stored as `"2025-04"` and `"2025-04-01"`.
//! Owners are reported as [`UNKNOWN`](crate::models::UNKNOWN) when a
//! billing row has no resource row or the resource has no owner.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    BillingRecord, BillingWithOwner, IdleResource, MonthlyKpi, OwnerCost, ResourceRecord,
    ServiceCost, ServiceExpenditure, StoreCounts, TrendPoint, UntaggedCost,
};

/// Abstract billing store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`total_cost_for_month`](CostStore::total_cost_for_month) | Sum of cost in a month |
/// | [`cost_by_service_for_month`](CostStore::cost_by_service_for_month) | Cost per service |
/// | [`cost_by_resource_group_for_month`](CostStore::cost_by_resource_group_for_month) | Cost per resource group |
/// | [`cost_by_owner`](CostStore::cost_by_owner) | Cost per owner |
/// | [`cost_for_owner`](CostStore::cost_for_owner) | Cost per matching owner |
/// | [`highest_paid_owner`](CostStore::highest_paid_owner) | Largest owner total |
/// | [`most_used_service`](CostStore::most_used_service) | Largest service total |
/// | [`monthly_trend`](CostStore::monthly_trend) | One owner's cost per month |
/// | [`top_service_expenditures`](CostStore::top_service_expenditures) | Ranked spend for a service keyword |
/// | [`detect_idle_resources`](CostStore::detect_idle_resources) | Low-usage rows |
/// | [`missing_owner_tags`](CostStore::missing_owner_tags) | Rows without service or group |
#[async_trait]
pub trait CostStore: Send + Sync {
    /// Total cost of all rows in `month`; `0.0` when there are none.
    async fn total_cost_for_month(&self, month: &str) -> Result<f64>;

    async fn cost_by_service_for_month(&self, month: &str) -> Result<BTreeMap<String, f64>>;

    async fn cost_by_resource_group_for_month(&self, month: &str)
        -> Result<BTreeMap<String, f64>>;

    /// Total, per-service and per-group cost of one month.
    async fn monthly_kpi(&self, month: &str) -> Result<MonthlyKpi> {
        Ok(MonthlyKpi {
            month: month.to_string(),
            total_cost: self.total_cost_for_month(month).await?,
            by_service: self.cost_by_service_for_month(month).await?,
            by_resource_group: self.cost_by_resource_group_for_month(month).await?,
        })
    }

    /// Cost per owner in `month`, ordered by owner ascending.
    async fn cost_by_owner(&self, month: &str) -> Result<Vec<OwnerCost>>;

    /// Like [`cost_by_owner`](CostStore::cost_by_owner), restricted to owners
    /// containing `owner` (case-insensitive).
    async fn cost_for_owner(&self, month: &str, owner: &str) -> Result<Vec<OwnerCost>> {
        let needle = owner.to_lowercase();
        Ok(self
            .cost_by_owner(month)
            .await?
            .into_iter()
            .filter(|row| row.owner.to_lowercase().contains(&needle))
            .collect())
    }

    /// Owner with the largest total in `month`. Ties go to the owner that
    /// sorts first.
    async fn highest_paid_owner(&self, month: &str) -> Result<Option<OwnerCost>> {
        let rows = self.cost_by_owner(month).await?;
        Ok(rows
            .into_iter()
            .reduce(|best, row| if row.cost > best.cost { row } else { best }))
    }

    /// Service with the largest total, optionally filtered by owner and
    /// month. Ties go to the service that sorts first.
    async fn most_used_service(
        &self,
        owner: Option<&str>,
        month: Option<&str>,
    ) -> Result<Option<ServiceCost>>;

    /// Total cost of `owner` per month, ascending by month. Owner matching
    /// ignores case.
    ///
    /// `"unknown"` selects rows without an owner.
    async fn monthly_trend(&self, owner: &str) -> Result<Vec<TrendPoint>>;

    /// Spend grouped by (service, resource, owner) for services containing
    /// `keyword` (case-insensitive), highest first, at most `n` rows.
    async fn top_service_expenditures(
        &self,
        keyword: &str,
        n: usize,
    ) -> Result<Vec<ServiceExpenditure>>;

    /// Billing rows with `usage_qty <= usage_threshold`.
    async fn detect_idle_resources(
        &self,
        usage_threshold: f64,
        month: Option<&str>,
    ) -> Result<Vec<IdleResource>>;

    /// Billing rows whose service or resource group is `"unknown"`.
    async fn missing_owner_tags(&self, month: Option<&str>) -> Result<Vec<UntaggedCost>>;

    /// Every billing row joined with its resource metadata, in row order.
    async fn billing_with_owners(&self) -> Result<Vec<BillingWithOwner>>;

    /// Appends billing rows. Returns the number inserted.
    async fn insert_billing(&self, records: &[BillingRecord]) -> Result<u64>;

    /// Inserts or replaces resource rows keyed by `resource_id`.
    async fn upsert_resources(&self, records: &[ResourceRecord]) -> Result<u64>;

    /// Inserts resource rows whose `resource_id` is not yet present.
    /// Returns the number inserted.
    async fn insert_missing_resources(&self, records: &[ResourceRecord]) -> Result<u64>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// Orders service expenditures highest total first, then by resource id
/// and service.
pub fn rank_expenditures(rows: &mut Vec<ServiceExpenditure>, n: usize) {
    rows.sort_by(|a, b| {
        b.total_cost
            .total_cmp(&a.total_cost)
            .then_with(|| a.resource_id.cmp(&b.resource_id))
            .then_with(|| a.service.cmp(&b.service))
    });
    rows.truncate(n);
}

/// Returns `true` when `value` belongs to `month` (prefix match), or when no
/// month filter is given.
pub fn month_matches(value: &str, month: Option<&str>) -> bool {
    month.is_none_or(|m| value.starts_with(m))
}

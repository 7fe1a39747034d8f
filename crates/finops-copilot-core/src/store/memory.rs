//! In-memory [`CostStore`] implementation for tests and embedding.
//!
//! Billing rows live in a `Vec` (row id = position + 1) and resources in a
//! `HashMap`, each behind `std::sync::RwLock`. Every query is a scan over
//! the billing rows with the resource join done per row.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    billing_source, owner_label, BillingRecord, BillingWithOwner, IdleResource, OwnerCost,
    ResourceRecord, ServiceCost, ServiceExpenditure, StoreCounts, TrendPoint, UntaggedCost,
    IDLE_SAVING_RATIO, UNKNOWN,
};

use super::{month_matches, rank_expenditures, CostStore};

/// In-memory store for tests.
pub struct InMemoryCostStore {
    billing: RwLock<Vec<BillingRecord>>,
    resources: RwLock<HashMap<String, ResourceRecord>>,
}

impl InMemoryCostStore {
    pub fn new() -> Self {
        Self {
            billing: RwLock::new(Vec::new()),
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Runs `f` over `(billing row, owner label)` pairs.
    fn with_rows<T>(&self, f: impl FnOnce(Vec<(&BillingRecord, String)>) -> T) -> T {
        let billing = self.billing.read().unwrap();
        let resources = self.resources.read().unwrap();
        let rows = billing
            .iter()
            .map(|b| {
                let owner = resources
                    .get(&b.resource_id)
                    .and_then(|r| r.owner.as_deref());
                (b, owner_label(owner))
            })
            .collect();
        f(rows)
    }
}

impl Default for InMemoryCostStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_by<'a>(items: impl Iterator<Item = (&'a str, f64)>) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for (key, cost) in items {
        *totals.entry(key.to_string()).or_insert(0.0) += cost;
    }
    totals
}

#[async_trait]
impl CostStore for InMemoryCostStore {
    async fn total_cost_for_month(&self, month: &str) -> Result<f64> {
        let billing = self.billing.read().unwrap();
        Ok(billing
            .iter()
            .filter(|b| month_matches(&b.invoice_month, Some(month)))
            .map(|b| b.cost)
            .sum())
    }

    async fn cost_by_service_for_month(&self, month: &str) -> Result<BTreeMap<String, f64>> {
        let billing = self.billing.read().unwrap();
        Ok(sum_by(
            billing
                .iter()
                .filter(|b| month_matches(&b.invoice_month, Some(month)))
                .map(|b| (b.service.as_str(), b.cost)),
        ))
    }

    async fn cost_by_resource_group_for_month(
        &self,
        month: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let billing = self.billing.read().unwrap();
        Ok(sum_by(
            billing
                .iter()
                .filter(|b| month_matches(&b.invoice_month, Some(month)))
                .map(|b| (b.resource_group.as_str(), b.cost)),
        ))
    }

    async fn cost_by_owner(&self, month: &str) -> Result<Vec<OwnerCost>> {
        let totals = self.with_rows(|rows| {
            let mut totals: BTreeMap<String, f64> = BTreeMap::new();
            for (b, owner) in rows {
                if month_matches(&b.invoice_month, Some(month)) {
                    *totals.entry(owner).or_insert(0.0) += b.cost;
                }
            }
            totals
        });
        Ok(totals
            .into_iter()
            .map(|(owner, cost)| OwnerCost { owner, cost })
            .collect())
    }

    async fn most_used_service(
        &self,
        owner: Option<&str>,
        month: Option<&str>,
    ) -> Result<Option<ServiceCost>> {
        let owner = owner.map(str::to_lowercase);
        let totals = self.with_rows(|rows| {
            let mut totals: BTreeMap<String, f64> = BTreeMap::new();
            for (b, label) in rows {
                let owner_ok = owner
                    .as_deref()
                    .is_none_or(|o| label.to_lowercase().contains(o));
                if owner_ok && month_matches(&b.invoice_month, month) {
                    *totals.entry(b.service.clone()).or_insert(0.0) += b.cost;
                }
            }
            totals
        });
        Ok(totals
            .into_iter()
            .map(|(service, cost)| ServiceCost { service, cost })
            .reduce(|best, row| if row.cost > best.cost { row } else { best }))
    }

    async fn monthly_trend(&self, owner: &str) -> Result<Vec<TrendPoint>> {
        let owner = owner.to_lowercase();
        let totals = self.with_rows(|rows| {
            let mut totals: BTreeMap<String, f64> = BTreeMap::new();
            for (b, label) in rows {
                if label.to_lowercase() == owner {
                    *totals.entry(b.invoice_month.clone()).or_insert(0.0) += b.cost;
                }
            }
            totals
        });
        Ok(totals
            .into_iter()
            .map(|(month, total_cost)| TrendPoint { month, total_cost })
            .collect())
    }

    async fn top_service_expenditures(
        &self,
        keyword: &str,
        n: usize,
    ) -> Result<Vec<ServiceExpenditure>> {
        let needle = keyword.to_lowercase();
        let mut ranked = self.with_rows(|rows| {
            let mut totals: BTreeMap<(String, String, String), f64> = BTreeMap::new();
            for (b, owner) in rows {
                if b.service.to_lowercase().contains(&needle) {
                    let key = (b.service.clone(), b.resource_id.clone(), owner);
                    *totals.entry(key).or_insert(0.0) += b.cost;
                }
            }
            totals
                .into_iter()
                .map(|((service, resource_id, owner), total_cost)| ServiceExpenditure {
                    service,
                    resource_id,
                    owner,
                    total_cost,
                })
                .collect::<Vec<_>>()
        });
        rank_expenditures(&mut ranked, n);
        Ok(ranked)
    }

    async fn detect_idle_resources(
        &self,
        usage_threshold: f64,
        month: Option<&str>,
    ) -> Result<Vec<IdleResource>> {
        let billing = self.billing.read().unwrap();
        Ok(billing
            .iter()
            .enumerate()
            .filter(|(_, b)| b.usage_qty <= usage_threshold)
            .filter(|(_, b)| month_matches(&b.invoice_month, month))
            .map(|(i, b)| IdleResource {
                resource_id: b.resource_id.clone(),
                cost: b.cost,
                estimated_saving: b.cost * IDLE_SAVING_RATIO,
                source: billing_source(i as i64 + 1),
            })
            .collect())
    }

    async fn missing_owner_tags(&self, month: Option<&str>) -> Result<Vec<UntaggedCost>> {
        let billing = self.billing.read().unwrap();
        Ok(billing
            .iter()
            .enumerate()
            .filter(|(_, b)| b.service == UNKNOWN || b.resource_group == UNKNOWN)
            .filter(|(_, b)| month_matches(&b.invoice_month, month))
            .map(|(i, b)| UntaggedCost {
                resource_id: b.resource_id.clone(),
                cost: b.cost,
                source: billing_source(i as i64 + 1),
            })
            .collect())
    }

    async fn billing_with_owners(&self) -> Result<Vec<BillingWithOwner>> {
        let billing = self.billing.read().unwrap();
        let resources = self.resources.read().unwrap();
        Ok(billing
            .iter()
            .map(|b| {
                let resource = resources.get(&b.resource_id);
                BillingWithOwner {
                    billing: b.clone(),
                    owner: resource.and_then(|r| r.owner.clone()),
                    env: resource.map(|r| r.env.clone()),
                    tags_json: resource.map(|r| r.tags_json.clone()),
                }
            })
            .collect())
    }

    async fn insert_billing(&self, records: &[BillingRecord]) -> Result<u64> {
        let mut billing = self.billing.write().unwrap();
        billing.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn upsert_resources(&self, records: &[ResourceRecord]) -> Result<u64> {
        let mut resources = self.resources.write().unwrap();
        for r in records {
            resources.insert(r.resource_id.clone(), r.clone());
        }
        Ok(records.len() as u64)
    }

    async fn insert_missing_resources(&self, records: &[ResourceRecord]) -> Result<u64> {
        let mut resources = self.resources.write().unwrap();
        let mut inserted = 0;
        for r in records {
            if !resources.contains_key(&r.resource_id) {
                resources.insert(r.resource_id.clone(), r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            billing_rows: self.billing.read().unwrap().len() as i64,
            resources: self.resources.read().unwrap().len() as i64,
        })
    }
}

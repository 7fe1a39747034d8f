//! SQLite-backed [`CostStore`] implementation.
//!
//! Maps each [`CostStore`] operation to one SQL statement over the
//! `billing` and `resources` tables. Owners are resolved with a LEFT JOIN
//! and `COALESCE(owner, 'unknown')`, so billing rows without a resource row
//! report the `"unknown"` owner.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use finops_copilot_core::models::{
    billing_source, BillingRecord, BillingWithOwner, IdleResource, OwnerCost, ResourceRecord,
    ServiceCost, ServiceExpenditure, StoreCounts, TrendPoint, UntaggedCost, IDLE_SAVING_RATIO,
};
use finops_copilot_core::store::CostStore;

/// Owner expression shared by every owner-reporting query.
const OWNER: &str = "COALESCE(r.owner, 'unknown')";

/// SQLite implementation of the [`CostStore`] trait.
pub struct SqliteCostStore {
    pool: SqlitePool,
}

impl SqliteCostStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn sum_by_column(&self, column: &str, month: &str) -> Result<BTreeMap<String, f64>> {
        let sql = format!(
            "SELECT {col}, SUM(cost) FROM billing \
             WHERE invoice_month LIKE ? || '%' GROUP BY {col}",
            col = column
        );
        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(month)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl CostStore for SqliteCostStore {
    async fn total_cost_for_month(&self, month: &str) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0.0) FROM billing WHERE invoice_month LIKE ? || '%'",
        )
        .bind(month)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn cost_by_service_for_month(&self, month: &str) -> Result<BTreeMap<String, f64>> {
        self.sum_by_column("service", month).await
    }

    async fn cost_by_resource_group_for_month(
        &self,
        month: &str,
    ) -> Result<BTreeMap<String, f64>> {
        self.sum_by_column("resource_group", month).await
    }

    async fn cost_by_owner(&self, month: &str) -> Result<Vec<OwnerCost>> {
        let sql = format!(
            r#"
            SELECT {owner} AS owner, SUM(b.cost) AS cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE b.invoice_month LIKE ? || '%'
            GROUP BY {owner}
            ORDER BY owner ASC
            "#,
            owner = OWNER
        );
        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(month)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(OwnerCost::from).collect())
    }

    async fn cost_for_owner(&self, month: &str, owner: &str) -> Result<Vec<OwnerCost>> {
        let sql = format!(
            r#"
            SELECT {owner} AS owner, SUM(b.cost) AS cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE b.invoice_month LIKE ? || '%'
              AND instr(lower({owner}), lower(?)) > 0
            GROUP BY {owner}
            ORDER BY owner ASC
            "#,
            owner = OWNER
        );
        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(month)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(OwnerCost::from).collect())
    }

    async fn highest_paid_owner(&self, month: &str) -> Result<Option<OwnerCost>> {
        let sql = format!(
            r#"
            SELECT {owner} AS owner, SUM(b.cost) AS cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE b.invoice_month LIKE ? || '%'
            GROUP BY {owner}
            ORDER BY cost DESC, owner ASC
            LIMIT 1
            "#,
            owner = OWNER
        );
        let row: Option<(String, f64)> = sqlx::query_as(&sql)
            .bind(month)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(OwnerCost::from))
    }

    async fn most_used_service(
        &self,
        owner: Option<&str>,
        month: Option<&str>,
    ) -> Result<Option<ServiceCost>> {
        let sql = format!(
            r#"
            SELECT b.service, SUM(b.cost) AS cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE (? IS NULL OR instr(lower({owner}), lower(?)) > 0)
              AND (? IS NULL OR b.invoice_month LIKE ? || '%')
            GROUP BY b.service
            ORDER BY cost DESC, b.service ASC
            LIMIT 1
            "#,
            owner = OWNER
        );
        let row: Option<(String, f64)> = sqlx::query_as(&sql)
            .bind(owner)
            .bind(owner)
            .bind(month)
            .bind(month)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(service, cost)| ServiceCost { service, cost }))
    }

    async fn monthly_trend(&self, owner: &str) -> Result<Vec<TrendPoint>> {
        let sql = format!(
            r#"
            SELECT b.invoice_month, SUM(b.cost) AS total_cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE lower({owner}) = lower(?)
            GROUP BY b.invoice_month
            ORDER BY b.invoice_month ASC
            "#,
            owner = OWNER
        );
        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(month, total_cost)| TrendPoint { month, total_cost })
            .collect())
    }

    async fn top_service_expenditures(
        &self,
        keyword: &str,
        n: usize,
    ) -> Result<Vec<ServiceExpenditure>> {
        let sql = format!(
            r#"
            SELECT b.service, b.resource_id, {owner} AS owner, SUM(b.cost) AS total_cost
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            WHERE instr(lower(b.service), lower(?)) > 0
            GROUP BY b.service, b.resource_id, {owner}
            ORDER BY total_cost DESC, b.resource_id ASC, b.service ASC
            LIMIT ?
            "#,
            owner = OWNER
        );
        let rows: Vec<(String, String, String, f64)> = sqlx::query_as(&sql)
            .bind(keyword)
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(
                |(service, resource_id, owner, total_cost)| ServiceExpenditure {
                    service,
                    resource_id,
                    owner,
                    total_cost,
                },
            )
            .collect())
    }

    async fn detect_idle_resources(
        &self,
        usage_threshold: f64,
        month: Option<&str>,
    ) -> Result<Vec<IdleResource>> {
        let rows: Vec<(i64, String, f64)> = sqlx::query_as(
            r#"
            SELECT id, resource_id, cost FROM billing
            WHERE usage_qty <= ?
              AND (? IS NULL OR invoice_month LIKE ? || '%')
            ORDER BY id ASC
            "#,
        )
        .bind(usage_threshold)
        .bind(month)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, resource_id, cost)| IdleResource {
                resource_id,
                cost,
                estimated_saving: cost * IDLE_SAVING_RATIO,
                source: billing_source(id),
            })
            .collect())
    }

    async fn missing_owner_tags(&self, month: Option<&str>) -> Result<Vec<UntaggedCost>> {
        let rows: Vec<(i64, String, f64)> = sqlx::query_as(
            r#"
            SELECT id, resource_id, cost FROM billing
            WHERE (resource_group = 'unknown' OR service = 'unknown')
              AND (? IS NULL OR invoice_month LIKE ? || '%')
            ORDER BY id ASC
            "#,
        )
        .bind(month)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, resource_id, cost)| UntaggedCost {
                resource_id,
                cost,
                source: billing_source(id),
            })
            .collect())
    }

    async fn billing_with_owners(&self) -> Result<Vec<BillingWithOwner>> {
        let rows = sqlx::query(
            r#"
            SELECT b.invoice_month, b.account_id, b.subscription, b.service,
                   b.resource_group, b.resource_id, b.region, b.usage_qty,
                   b.unit_cost, b.cost, r.owner, r.env, r.tags_json
            FROM billing b
            LEFT JOIN resources r ON r.resource_id = b.resource_id
            ORDER BY b.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(BillingWithOwner {
                billing: BillingRecord {
                    invoice_month: row.get("invoice_month"),
                    account_id: row.get("account_id"),
                    subscription: row.get("subscription"),
                    service: row.get("service"),
                    resource_group: row.get("resource_group"),
                    resource_id: row.get("resource_id"),
                    region: row.get("region"),
                    usage_qty: row.get("usage_qty"),
                    unit_cost: row.get("unit_cost"),
                    cost: row.get("cost"),
                },
                owner: row.get("owner"),
                env: row.get("env"),
                tags_json: row.get("tags_json"),
            });
        }
        Ok(out)
    }

    async fn insert_billing(&self, records: &[BillingRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for b in records {
            sqlx::query(
                r#"
                INSERT INTO billing (invoice_month, account_id, subscription, service,
                                     resource_group, resource_id, region, usage_qty,
                                     unit_cost, cost)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&b.invoice_month)
            .bind(&b.account_id)
            .bind(&b.subscription)
            .bind(&b.service)
            .bind(&b.resource_group)
            .bind(&b.resource_id)
            .bind(&b.region)
            .bind(b.usage_qty)
            .bind(b.unit_cost)
            .bind(b.cost)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn upsert_resources(&self, records: &[ResourceRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO resources (resource_id, owner, env, tags_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(resource_id) DO UPDATE SET
                    owner = excluded.owner,
                    env = excluded.env,
                    tags_json = excluded.tags_json
                "#,
            )
            .bind(&r.resource_id)
            .bind(&r.owner)
            .bind(&r.env)
            .bind(&r.tags_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn insert_missing_resources(&self, records: &[ResourceRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for r in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO resources (resource_id, owner, env, tags_json) VALUES (?, ?, ?, ?)",
            )
            .bind(&r.resource_id)
            .bind(&r.owner)
            .bind(&r.env)
            .bind(&r.tags_json)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let billing_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing")
            .fetch_one(&self.pool)
            .await?;
        let resources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreCounts {
            billing_rows,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteCostStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteCostStore::new(pool)
    }

    fn bill(
        month: &str,
        service: &str,
        group: &str,
        resource: &str,
        usage: f64,
        cost: f64,
    ) -> BillingRecord {
        BillingRecord {
            invoice_month: month.into(),
            account_id: "acct-1".into(),
            subscription: "sub-1".into(),
            service: service.into(),
            resource_group: group.into(),
            resource_id: resource.into(),
            region: "eastus".into(),
            usage_qty: usage,
            unit_cost: 1.0,
            cost,
        }
    }

    fn resource(id: &str, owner: Option<&str>) -> ResourceRecord {
        ResourceRecord {
            resource_id: id.into(),
            owner: owner.map(String::from),
            env: "prod".into(),
            tags_json: "{}".into(),
        }
    }

    async fn seeded() -> SqliteCostStore {
        let store = memory_store().await;
        store
            .insert_billing(&[
                bill("2025-04", "Compute", "rg-prod", "res-1", 10.0, 100.0),
                bill("2025-04-01", "Storage", "unknown", "res-2", 0.5, 40.0),
                bill("2025-05", "Compute", "rg-prod", "res-1", 12.0, 120.0),
                bill("2025-05", "Networking", "rg-dev", "res-3", 3.0, 30.0),
            ])
            .await
            .unwrap();
        store
            .upsert_resources(&[resource("res-1", Some("alice")), resource("res-2", None)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_cost_by_owner_scenario() {
        let store = memory_store().await;
        store
            .insert_billing(&[bill("2025-04", "Compute", "rg-prod", "res-1", 1.0, 100.0)])
            .await
            .unwrap();
        store
            .upsert_resources(&[resource("res-1", Some("alice"))])
            .await
            .unwrap();
        assert_eq!(
            store.cost_by_owner("2025-04").await.unwrap(),
            vec![OwnerCost {
                owner: "alice".into(),
                cost: 100.0
            }]
        );
    }

    #[tokio::test]
    async fn test_month_prefix_and_unknown_owner() {
        let store = seeded().await;
        let rows = store.cost_by_owner("2025-04").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].owner, "alice");
        assert_eq!(rows[1].owner, "unknown");
        assert_eq!(rows[1].cost, 40.0);
        assert!(store.cost_by_owner("2019-01").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kpis() {
        let store = seeded().await;
        assert_eq!(store.total_cost_for_month("2025-04").await.unwrap(), 140.0);
        assert_eq!(store.total_cost_for_month("2019-01").await.unwrap(), 0.0);
        let kpi = store.monthly_kpi("2025-05").await.unwrap();
        assert_eq!(kpi.by_service.get("Networking"), Some(&30.0));
        assert_eq!(kpi.by_resource_group.get("rg-prod"), Some(&120.0));
    }

    #[tokio::test]
    async fn test_trend_and_rankings() {
        let store = seeded().await;
        let trend = store.monthly_trend("ALICE").await.unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].month, "2025-04");

        let top = store.highest_paid_owner("2025-05").await.unwrap().unwrap();
        assert_eq!(top.owner, "alice");

        let svc = store.most_used_service(None, None).await.unwrap().unwrap();
        assert_eq!(svc.service, "Compute");
        let svc = store
            .most_used_service(Some("unknown"), Some("2025-05"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(svc.service, "Networking");

        let ranked = store.top_service_expenditures("comp", 5).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].total_cost, 220.0);
        assert!(store.top_service_expenditures("comp", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recommendations() {
        let store = seeded().await;
        let idle = store.detect_idle_resources(1.0, None).await.unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].source, "billing:2");
        assert_eq!(idle[0].estimated_saving, 20.0);

        let untagged = store.missing_owner_tags(Some("2025-04")).await.unwrap();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].resource_id, "res-2");
        assert!(store.missing_owner_tags(Some("2025-05")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upserts_and_counts() {
        let store = seeded().await;
        store
            .upsert_resources(&[resource("res-2", Some("bob"))])
            .await
            .unwrap();
        let inserted = store
            .insert_missing_resources(&[
                resource("res-1", Some("mallory")),
                resource("res-3", Some("carol")),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.billing_rows, 4);
        assert_eq!(counts.resources, 3);

        let joined = store.billing_with_owners().await.unwrap();
        let owners: Vec<Option<&str>> = joined.iter().map(|j| j.owner.as_deref()).collect();
        assert_eq!(
            owners,
            vec![Some("alice"), Some("bob"), Some("alice"), Some("carol")]
        );
    }
}

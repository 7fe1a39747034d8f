//! The question-answering pipeline.
//!
//! [`ask`] runs one question through
//! sanitize → retrieve → parse → lookup → prompt → complete, in that order.
//! Every call to the store, the index or the completion backend is guarded
//! with a timeout (see [`crate::external`]) and degrades instead of failing:
//!
//! | Dependency | On failure |
//! |------------|------------|
//! | text index | fallback tip documents |
//! | cost store | dataset left empty (logged at `warn`) |
//! | completion | [`APOLOGY`] as the answer |
//!
//! so an answer is always produced.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use finops_copilot_core::intent::{parse_question, ParsedIntent, QueryKind};
use finops_copilot_core::models::{IndexedDocument, OwnerCost, TopService, TrendPoint};
use finops_copilot_core::prompt::{build_prompt, StructuredData, APOLOGY};
use finops_copilot_core::sanitize::sanitize_question;
use finops_copilot_core::store::CostStore;

use crate::completion::{create_backend, CompletionBackend};
use crate::config::Config;
use crate::db;
use crate::external::{guarded, guarded_or_warn, Dependency};
use crate::sqlite_store::SqliteCostStore;
use crate::text_index::{documents_from_store, fallback_documents, TextIndex};

/// Process-wide adapters shared by every request.
///
/// Built once at startup and handed to axum handlers as `State`.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn CostStore>,
    pub index: Arc<TextIndex>,
    pub completion: Arc<dyn CompletionBackend>,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn CostStore>,
        index: Arc<TextIndex>,
        completion: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            config,
            store,
            index,
            completion,
        }
    }

    /// Opens the database, loads the persisted index and creates the
    /// completion backend.
    ///
    /// # Errors
    ///
    /// Fails when the database file is missing, the embedding provider
    /// cannot be created, or the completion API key is not set.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect_existing(&config).await?;
        let store: Arc<dyn CostStore> = Arc::new(SqliteCostStore::new(pool));
        let index = Arc::new(TextIndex::open(&config)?);
        let completion: Arc<dyn CompletionBackend> = Arc::from(create_backend(&config.completion)?);
        Ok(Self::new(config, store, index, completion))
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.store_secs)
    }

    fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.index_secs)
    }

    fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeouts.completion_secs)
    }

    /// Rebuilds the index from the store. Returns the document count.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let documents = documents_from_store(self.store.as_ref()).await?;
        self.index.rebuild(documents).await
    }
}

/// The answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    /// `source` of every retrieved document, nearest first.
    pub sources: Vec<String>,
    pub table: Option<Vec<OwnerCost>>,
    pub trend: Option<Vec<TrendPoint>>,
    pub top_service: Option<TopService>,
    pub suggestions: Vec<String>,
}

/// Answers a free-text question. Never fails.
pub async fn ask(ctx: &AppContext, question: &str) -> AskResponse {
    let question = sanitize_question(question, ctx.config.sanitize.max_len);

    let documents = retrieve(ctx, &question).await;
    let context = documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let sources = documents.into_iter().map(|d| d.source).collect();

    let intent = parse_question(&question, ctx.config.parser.default_year);
    tracing::debug!(kind = ?intent.query_kind, matched = ?intent.matched, month = ?intent.month, owner = ?intent.owner, "parsed question");

    let data = lookup(ctx, &intent).await;
    let prompt = build_prompt(&context, &data, &question);

    let completion = &ctx.config.completion;
    let answer = match guarded(
        Dependency::Completion,
        ctx.completion_timeout(),
        ctx.completion
            .complete(&prompt, completion.max_tokens, completion.temperature),
    )
    .await
    {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(backend = ctx.completion.name(), error = %e, "completion failed, answering with apology");
            APOLOGY.to_string()
        }
    };

    AskResponse {
        answer,
        sources,
        table: data.table,
        trend: data.trend,
        top_service: data.top_service,
        suggestions: Vec::new(),
    }
}

async fn retrieve(ctx: &AppContext, question: &str) -> Vec<IndexedDocument> {
    let k = ctx.config.retrieval.top_k;
    match guarded(Dependency::Index, ctx.index_timeout(), async {
        Ok::<_, anyhow::Error>(ctx.index.search(question, k).await)
    })
    .await
    {
        Ok(documents) => documents,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed, using fallback documents");
            fallback_documents()
        }
    }
}

/// Runs the structured lookups for every matched rule, in precedence order.
///
/// A later rule overwrites the dataset an earlier rule filled. Rules whose
/// data requirements are missing (a month for cost-by-owner and
/// highest-paid, an owner for trend) are skipped.
pub async fn lookup(ctx: &AppContext, intent: &ParsedIntent) -> StructuredData {
    let store = ctx.store.as_ref();
    let timeout = ctx.store_timeout();
    let month = intent.month.as_deref();
    let owner = intent.owner.as_deref();

    let mut data = StructuredData::default();
    for kind in &intent.matched {
        match kind {
            QueryKind::CostByOwner => {
                let Some(month) = month else { continue };
                let rows = match owner {
                    Some(owner) => {
                        guarded_or_warn(
                            Dependency::Store,
                            timeout,
                            "cost_for_owner",
                            store.cost_for_owner(month, owner),
                        )
                        .await
                    }
                    None => {
                        guarded_or_warn(
                            Dependency::Store,
                            timeout,
                            "cost_by_owner",
                            store.cost_by_owner(month),
                        )
                        .await
                    }
                };
                if let Some(rows) = rows {
                    data.table = Some(rows);
                }
            }
            QueryKind::Trend => {
                let Some(owner) = owner else { continue };
                if let Some(points) = guarded_or_warn(
                    Dependency::Store,
                    timeout,
                    "monthly_trend",
                    store.monthly_trend(owner),
                )
                .await
                {
                    data.trend = Some(points);
                }
            }
            QueryKind::HighestPaid => {
                let Some(month) = month else { continue };
                if let Some(best) = guarded_or_warn(
                    Dependency::Store,
                    timeout,
                    "highest_paid_owner",
                    store.highest_paid_owner(month),
                )
                .await
                {
                    data.table = Some(best.into_iter().collect());
                }
            }
            QueryKind::MostUsedService => {
                if let Some(Some(service)) = guarded_or_warn(
                    Dependency::Store,
                    timeout,
                    "most_used_service",
                    store.most_used_service(owner, month),
                )
                .await
                {
                    data.top_service = Some(TopService::MostUsed(service));
                }
            }
            QueryKind::TopNService => {
                let (Some(n), Some(keyword)) = (intent.top_n, intent.service_keyword.as_deref())
                else {
                    continue;
                };
                if let Some(rows) = guarded_or_warn(
                    Dependency::Store,
                    timeout,
                    "top_service_expenditures",
                    store.top_service_expenditures(keyword, n),
                )
                .await
                {
                    data.top_service = Some(TopService::Ranked(rows));
                }
            }
            QueryKind::None => {}
        }
    }
    data
}

pub async fn run_ask(config: Config, question: &str) -> Result<()> {
    let ctx = AppContext::from_config(config).await?;
    let response = ask(&ctx, question).await;

    println!("{}", response.answer);
    println!();
    println!("sources: {}", response.sources.join(", "));
    if let Some(table) = &response.table {
        println!("table: {}", serde_json::to_string(table)?);
    }
    if let Some(trend) = &response.trend {
        println!("trend: {}", serde_json::to_string(trend)?);
    }
    if let Some(top) = &response.top_service {
        println!("top_service: {}", serde_json::to_string(top)?);
    }
    Ok(())
}

//! Persisted nearest-neighbour index over billing documents.
//!
//! The index is a derived cache: it is rebuilt from the cost store plus a
//! few static FinOps tips, embedded with the configured provider, and
//! written to two files in `[index].dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `vector_store.index` | binary vectors (see [`finops_copilot_core::index`]) |
//! | `vector_store.index.json` | `{model, dims, documents}` |
//!
//! Both files are written to uniquely named temporaries and renamed into
//! place, vectors first. The metadata records a checksum of the vector file,
//! so a pair from different builds (a crash between the renames, or two
//! writers interleaving) fails to load instead of pairing documents with
//! the wrong vectors. Rebuilds within a process are serialized. The live
//! snapshot sits behind `RwLock<Option<Arc<Snapshot>>>`: readers clone the
//! `Arc` and drop the lock before searching, and a rebuild swaps in a fully
//! built snapshot, so a search sees either the old or the new index.
//!
//! When the index is not ready (never built, unreadable files, zero
//! documents, or embeddings disabled) [`TextIndex::search`] returns the
//! fixed [`fallback_documents`] instead of failing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use finops_copilot_core::index::{checksum, decode_vectors, VectorIndex};
use finops_copilot_core::models::{owner_label, BillingWithOwner, IndexedDocument};
use finops_copilot_core::store::CostStore;

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::{create_provider, embed_query, embed_texts, EmbeddingProvider};
use crate::sqlite_store::SqliteCostStore;

pub const VECTOR_FILE: &str = "vector_store.index";
pub const META_FILE: &str = "vector_store.index.json";

/// Source label of the static tip documents.
pub const TIPS_SOURCE: &str = "finops_tips.md";
/// Source label of documents built from billing rows.
pub const BILLING_SOURCE: &str = "billing+resources";

const TIPS: [&str; 3] = [
    "Monitor Azure cost anomalies using Cost Explorer.",
    "May often has spikes due to fiscal year-end workloads.",
    "Always tag resources properly to track cost allocation.",
];

/// The documents returned while the index is not ready.
pub fn fallback_documents() -> Vec<IndexedDocument> {
    TIPS.iter()
        .map(|tip| IndexedDocument::new(*tip, TIPS_SOURCE))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    model: String,
    dims: usize,
    /// [`checksum`] of the vector file written with these documents.
    vectors_checksum: u64,
    documents: Vec<IndexedDocument>,
}

/// An immutable, searchable generation of the index.
#[derive(Debug)]
pub struct Snapshot {
    pub model: String,
    pub index: VectorIndex,
}

/// A search hit with its Euclidean distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: IndexedDocument,
    pub distance: f32,
}

pub struct TextIndex {
    dir: PathBuf,
    embedding: EmbeddingConfig,
    provider: Box<dyn EmbeddingProvider>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl TextIndex {
    /// Creates an empty (not ready) index using the provider named in
    /// `embedding`.
    pub fn new(dir: impl Into<PathBuf>, embedding: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(embedding)?;
        Ok(Self::with_provider(dir, embedding, provider))
    }

    pub fn with_provider(
        dir: impl Into<PathBuf>,
        embedding: &EmbeddingConfig,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            dir: dir.into(),
            embedding: embedding.clone(),
            provider,
            snapshot: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates the index from config and loads any persisted snapshot.
    pub fn open(config: &Config) -> Result<Self> {
        let index = Self::new(&config.index.dir, &config.embedding)?;
        index.load();
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the persisted snapshot. Absent, unreadable or mismatched files
    /// leave the index not ready; returns whether a snapshot was loaded.
    pub fn load(&self) -> bool {
        if !self.dir.join(VECTOR_FILE).exists() || !self.dir.join(META_FILE).exists() {
            tracing::info!(dir = %self.dir.display(), "no persisted index, using fallback documents");
            return false;
        }
        match read_snapshot(&self.dir) {
            Ok(snapshot) if !self.matches_provider(&snapshot) => {
                tracing::warn!(
                    built_with = %snapshot.model,
                    configured = %self.provider.model_name(),
                    "persisted index was built with a different embedding model; rebuild it"
                );
                false
            }
            Ok(snapshot) => {
                tracing::info!(documents = snapshot.index.len(), "index loaded");
                self.publish(snapshot);
                true
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "persisted index is unreadable");
                false
            }
        }
    }

    fn matches_provider(&self, snapshot: &Snapshot) -> bool {
        snapshot.model == self.provider.model_name() && snapshot.index.dims() == self.provider.dims()
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().unwrap().clone()
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap() = Some(Arc::new(snapshot));
    }

    /// `true` when searches are answered from embedded documents.
    pub fn is_ready(&self) -> bool {
        self.embedding.is_enabled() && self.current().is_some_and(|s| !s.index.is_empty())
    }

    /// Number of documents in the live snapshot.
    pub fn len(&self) -> usize {
        self.current().map_or(0, |s| s.index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` nearest documents with distances.
    ///
    /// # Errors
    ///
    /// Fails when the index is not ready or the query cannot be embedded.
    pub async fn search_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        let snapshot = match self.current() {
            Some(s) if self.is_ready() => s,
            _ => bail!("text index is not ready"),
        };
        let vector = embed_query(self.provider.as_ref(), &self.embedding, query).await?;
        Ok(snapshot
            .index
            .search(&vector, k)
            .into_iter()
            .map(|n| ScoredDocument {
                document: n.document.clone(),
                distance: n.distance,
            })
            .collect())
    }

    /// Up to `k` nearest documents, nearest first, or the fallback set when
    /// the index cannot answer.
    pub async fn search(&self, query: &str, k: usize) -> Vec<IndexedDocument> {
        if !self.is_ready() {
            return fallback_documents();
        }
        match self.search_scored(query, k).await {
            Ok(hits) => hits.into_iter().map(|h| h.document).collect(),
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "index search failed, using fallback documents");
                fallback_documents()
            }
        }
    }

    /// Embeds `documents`, persists the result and publishes it.
    ///
    /// The live snapshot is replaced only after the files are written, so a
    /// failed rebuild leaves the previous index in service.
    pub async fn rebuild(&self, documents: Vec<IndexedDocument>) -> Result<usize> {
        if !self.embedding.is_enabled() {
            bail!("Cannot rebuild the index: embedding provider is disabled");
        }
        let _guard = self.rebuild_lock.lock().await;
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embed_texts(self.provider.as_ref(), &self.embedding, &texts).await?
        };

        let index = VectorIndex::new(self.provider.dims(), documents, vectors)?;
        let snapshot = Snapshot {
            model: self.provider.model_name().to_string(),
            index,
        };
        write_snapshot(&self.dir, &snapshot)?;

        let count = snapshot.index.len();
        self.publish(snapshot);
        tracing::info!(documents = count, dir = %self.dir.display(), "index rebuilt");
        Ok(count)
    }
}

fn read_snapshot(dir: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(dir.join(VECTOR_FILE)).context("Failed to read vector file")?;
    let (dims, vectors) = decode_vectors(&bytes)?;

    let meta_text =
        std::fs::read_to_string(dir.join(META_FILE)).context("Failed to read index metadata")?;
    let meta: IndexMeta = serde_json::from_str(&meta_text).context("Invalid index metadata")?;
    if meta.vectors_checksum != checksum(&bytes) {
        bail!("index metadata and vector file come from different builds");
    }
    if meta.dims != dims {
        bail!(
            "index metadata says {} dimensions, vector file has {}",
            meta.dims,
            dims
        );
    }

    Ok(Snapshot {
        model: meta.model,
        index: VectorIndex::new(dims, meta.documents, vectors)?,
    })
}

fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

    let vectors = snapshot.index.encode_vectors();
    let meta = IndexMeta {
        model: snapshot.model.clone(),
        dims: snapshot.index.dims(),
        vectors_checksum: checksum(&vectors),
        documents: snapshot.index.documents().to_vec(),
    };
    write_atomic(dir, VECTOR_FILE, &vectors)?;
    write_atomic(dir, META_FILE, &serde_json::to_vec(&meta)?)?;
    Ok(())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    let path = dir.join(name);
    tmp.persist(&path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Renders one joined billing row as index text.
pub fn billing_document(row: &BillingWithOwner) -> IndexedDocument {
    let b = &row.billing;
    let text = format!(
        "Invoice Month: {}, Account: {}, Subscription: {}, Service: {}, Resource Group: {}, \
         Resource ID: {}, Region: {}, Usage Qty: {}, Unit Cost: {}, Cost: {}, Owner: {}, \
         Environment: {}, Tags: {}",
        b.invoice_month,
        b.account_id,
        b.subscription,
        b.service,
        b.resource_group,
        b.resource_id,
        b.region,
        b.usage_qty,
        b.unit_cost,
        b.cost,
        owner_label(row.owner.as_deref()),
        row.env.as_deref().filter(|e| !e.is_empty()).unwrap_or("N/A"),
        row.tags_json.as_deref().unwrap_or("{}"),
    );
    IndexedDocument::new(text, BILLING_SOURCE)
}

/// Every billing row as a document, followed by the tip documents.
pub async fn documents_from_store(store: &dyn CostStore) -> Result<Vec<IndexedDocument>> {
    let rows = store.billing_with_owners().await?;
    let mut documents: Vec<IndexedDocument> = rows.iter().map(billing_document).collect();
    documents.extend(fallback_documents());
    Ok(documents)
}

pub async fn run_index_rebuild(config: &Config) -> Result<()> {
    let pool = db::connect_existing(config).await?;
    let store = SqliteCostStore::new(pool);
    let index = TextIndex::new(&config.index.dir, &config.embedding)?;

    let documents = documents_from_store(&store).await?;
    let count = index.rebuild(documents).await?;

    println!("index rebuild");
    println!("  documents: {}", count);
    println!("  provider: {}", config.embedding.provider);
    println!("  dir: {}", index.dir().display());
    Ok(())
}

pub async fn run_index_search(config: &Config, query: &str, k: usize) -> Result<()> {
    let index = TextIndex::open(config)?;

    if !index.is_ready() {
        println!("index not ready; showing fallback documents");
        for doc in index.search(query, k).await {
            println!("  [{}] {}", doc.source, doc.text);
        }
        return Ok(());
    }

    let hits = index.search_scored(query, k).await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] ({}) {}",
            i + 1,
            hit.distance,
            hit.document.source,
            hit.document.text
        );
    }
    Ok(())
}

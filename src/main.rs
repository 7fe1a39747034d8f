//! # FinOps Copilot CLI (`copilot`)
//!
//! The `copilot` binary loads billing exports, prints cost reports,
//! manages the text index, answers questions, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! copilot --config ./config/copilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `copilot init` | Create the SQLite database and run schema migrations |
//! | `copilot generate-sample` | Write synthetic billing and resource CSVs |
//! | `copilot load billing <csv>` | Append billing rows |
//! | `copilot load resources <csv>` | Upsert resource rows |
//! | `copilot kpi <month>` | Cost summary for one month |
//! | `copilot trend <owner>` | One owner's cost per month |
//! | `copilot recommend` | Idle resources and untagged spend |
//! | `copilot index rebuild` | Rebuild the text index from the database |
//! | `copilot index search "<query>"` | Nearest index documents |
//! | `copilot ask "<question>"` | Answer a question |
//! | `copilot status` | Row counts and index state |
//! | `copilot serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! copilot generate-sample --dir ./data
//! copilot init
//! copilot load resources ./data/resources.csv
//! copilot load billing ./data/billing.csv
//! copilot index rebuild
//! copilot ask "What was cost by owner alice in 2025-04?"
//! copilot serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use finops_copilot::sample::SampleOptions;
use finops_copilot::{answer, config, ingest, migrate, report, sample, server, text_index};

/// FinOps Copilot: cost analytics and question answering over cloud
/// billing data.
///
/// All commands except `generate-sample` read a TOML configuration file.
/// See `config/copilot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "copilot",
    about = "FinOps Copilot: cost analytics and question answering over cloud billing data",
    version,
    long_about = "FinOps Copilot ingests billing and resource CSV exports into SQLite, reports \
    KPIs (cost by owner, service, resource group and month), and answers free-text questions by \
    combining structured lookups with retrieved context and an LLM completion."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/copilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the billing and resources
    /// tables. Running it again is safe.
    Init,

    /// Write synthetic `billing.csv` and `resources.csv` files.
    GenerateSample {
        /// Output directory.
        #[arg(long, default_value = "./data")]
        dir: PathBuf,

        /// Number of resources.
        #[arg(long, default_value_t = 50)]
        resources: usize,

        /// Number of invoice months.
        #[arg(long, default_value_t = 6)]
        months: usize,

        /// First invoice month (YYYY-MM).
        #[arg(long, default_value = "2025-04")]
        start_month: String,

        /// Random seed; the same seed always yields the same files.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Load a CSV export into the database.
    Load {
        #[command(subcommand)]
        target: LoadTarget,
    },

    /// Print the cost summary for one month.
    Kpi {
        /// Invoice month (YYYY-MM).
        month: String,
    },

    /// Print one owner's cost per month.
    Trend {
        /// Owner name; `unknown` selects resources without an owner.
        owner: String,
    },

    /// List idle resources and spend missing service or group tags.
    Recommend {
        /// Restrict to one invoice month (YYYY-MM).
        #[arg(long)]
        month: Option<String>,

        /// Rows with `usage_qty` at or below this value count as idle.
        #[arg(long, default_value_t = server::DEFAULT_IDLE_THRESHOLD)]
        threshold: f64,
    },

    /// Manage the text index used for retrieval.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Answer a free-text question.
    Ask {
        /// The question.
        question: String,
    },

    /// Show row counts, database size and index state.
    Status,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind`. Requires the completion API key unless
    /// `[completion].provider = "disabled"`.
    Serve,
}

#[derive(Subcommand)]
enum LoadTarget {
    /// Append rows from a billing CSV.
    Billing {
        /// Path to the CSV file.
        path: PathBuf,
    },
    /// Upsert rows from a resources CSV.
    Resources {
        /// Path to the CSV file.
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Embed every billing row plus the tip documents and replace the index.
    Rebuild,
    /// Print the documents nearest to a query.
    Search {
        query: String,

        /// Number of documents (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::GenerateSample {
        dir,
        resources,
        months,
        start_month,
        seed,
    } = &cli.command
    {
        return sample::run_generate_sample(&SampleOptions {
            dir: dir.clone(),
            resources: *resources,
            months: *months,
            start_month: start_month.clone(),
            seed: *seed,
        });
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { target } => match target {
            LoadTarget::Billing { path } => ingest::run_load_billing(&cfg, &path).await?,
            LoadTarget::Resources { path } => ingest::run_load_resources(&cfg, &path).await?,
        },
        Commands::Kpi { month } => report::run_kpi(&cfg, &month).await?,
        Commands::Trend { owner } => report::run_trend(&cfg, &owner).await?,
        Commands::Recommend { month, threshold } => {
            report::run_recommend(&cfg, month.as_deref(), threshold).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Rebuild => text_index::run_index_rebuild(&cfg).await?,
            IndexAction::Search { query, k } => {
                let k = k.unwrap_or(cfg.retrieval.top_k);
                text_index::run_index_search(&cfg, &query, k).await?;
            }
        },
        Commands::Ask { question } => answer::run_ask(cfg, &question).await?,
        Commands::Status => report::run_status(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::GenerateSample { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

//! # FinOps Copilot
//!
//! Cost analytics and question answering over cloud billing exports.
//!
//! FinOps Copilot loads billing and resource CSVs into SQLite, reports KPIs
//! (cost by owner, service, resource group and month), and answers
//! free-text questions by combining structured lookups, nearest-neighbour
//! retrieval over billing documents, and an LLM completion. Everything is
//! available from a CLI and a JSON HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  CSV files  │──▶│   Ingest    │──▶│    SQLite    │
//! │ billing/res │   │ + checks    │   │ billing/res  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                 ┌──────────────────────────┤
//!                 ▼                          ▼
//!          ┌─────────────┐           ┌──────────────┐
//!          │ Text index  │──────────▶│    Answer    │──▶ completion API
//!          │ (embedded)  │           │   pipeline   │
//!          └─────────────┘           └──────┬───────┘
//!                                           │
//!                              ┌────────────┴───────┐
//!                              ▼                    ▼
//!                         ┌──────────┐        ┌──────────┐
//!                         │   CLI    │        │   HTTP   │
//!                         │(copilot) │        │  (axum)  │
//!                         └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! copilot generate-sample           # write data/billing.csv, data/resources.csv
//! copilot init                      # create database
//! copilot load resources data/resources.csv
//! copilot load billing data/billing.csv
//! copilot index rebuild             # embed billing rows
//! copilot ask "What was cost by owner alice in 2025-04?"
//! copilot serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `CostStore` backend |
//! | [`ingest`] | CSV loading and quality checks |
//! | [`sample`] | Synthetic data generator |
//! | [`embedding`] | Embedding providers |
//! | [`text_index`] | Persisted retrieval index |
//! | [`completion`] | Chat-completion backends |
//! | [`external`] | Timeout-guarded dependency calls |
//! | [`answer`] | Question-answering pipeline |
//! | [`report`] | CLI reports |
//! | [`server`] | HTTP server |

pub mod answer;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod external;
pub mod ingest;
pub mod migrate;
pub mod report;
pub mod sample;
pub mod server;
pub mod sqlite_store;
pub mod text_index;

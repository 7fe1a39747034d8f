//! # FinOps Copilot Core
//!
//! Runtime-free logic for FinOps Copilot: data models, the question parser,
//! the input sanitizer, prompt assembly, the embedding trait with vector
//! utilities, the exact nearest-neighbour index, and the store abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! The `finops-copilot` app crate supplies the SQLite store, embedding
//! providers, the completion backend and the HTTP/CLI surfaces.

pub mod embedding;
pub mod index;
pub mod intent;
pub mod models;
pub mod prompt;
pub mod sanitize;
pub mod store;

//! # Repo Harness
//!
//! Ingests a hosted repository's files and commit history into a knowledge
//! store, and keeps the commit history in sync as new commits land.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐   ┌──────────┐
//! │   GitHub     │──▶│   Loader     │──▶│ Embedding       │──▶│          │
//! │  (github)    │   │  (loader)    │   │ Pipeline        │   │  SQLite  │
//! │              │   └──────────────┘   └────────┬────────┘   │  store   │
//! │              │                               │ SummaryClient (llm)   │
//! │              │──────────────────▶ Commit Sync Engine ─────▶│          │
//! └──────────────┘                                            └──────────┘
//!                     Engine facade ◀── CLI (rh) / HTTP (server)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rh init
//! rh estimate https://github.com/acme/widgets
//! rh project add --name widgets --repo https://github.com/acme/widgets --branch main
//! rh sync <project-id>
//! rh serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`github`] | Source-control provider client |
//! | [`loader`] | Content loading and cost estimation |
//! | [`llm`] | Summaries and embeddings |
//! | [`pipeline`] | Batched embedding pipeline |
//! | [`commit_sync`] | Commit discovery and summarization |
//! | [`credentials`] | Provider token resolution |
//! | [`tasks`] | Bounded background task queue |
//! | [`engine`] | Facade over all operations |
//! | [`sqlite_store`] | SQLite knowledge store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod commit_sync;
pub mod config;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod error;
pub mod github;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
pub mod tasks;

//! # Repo Harness Core
//!
//! Shared, I/O-free logic for Repo Harness: data models, the knowledge
//! store abstraction with an in-memory implementation, text sanitization,
//! and vector encoding helpers.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The
//! application crate supplies the SQLite store and the provider clients.

pub mod models;
pub mod store;
pub mod text;
pub mod vector;

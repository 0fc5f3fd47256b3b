//! Knowledge store abstraction for Repo Harness.
//!
//! The [`KnowledgeStore`] trait defines every read and write the ingestion
//! and commit-sync engines perform, enabling pluggable backends (SQLite in
//! the application crate, [`memory::InMemoryStore`] for tests).
//!
//! Embedding rows and commit rows are append-only. The only other writes
//! attach a vector to a freshly inserted embedding row, or remove that row
//! again when the attach fails.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{BranchTarget, CommitRecord, EmbeddingRecord, NewEmbedding, Project};

/// Abstract storage backend for Repo Harness.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](KnowledgeStore::create_project) | Register a project and its branch targets |
/// | [`get_project`](KnowledgeStore::get_project) | Look up a project by ID |
/// | [`active_branches`](KnowledgeStore::active_branches) | Branch targets with `is_active = true` |
/// | [`user_token`](KnowledgeStore::user_token) | Per-user provider token, if stored |
/// | [`insert_embedding`](KnowledgeStore::insert_embedding) | Create an embedding row (no vector yet) |
/// | [`attach_embedding_vector`](KnowledgeStore::attach_embedding_vector) | Set the vector on an existing row |
/// | [`delete_embedding`](KnowledgeStore::delete_embedding) | Remove a row whose vector could not be attached |
/// | [`commit_hashes`](KnowledgeStore::commit_hashes) | All commit hashes stored for a project |
/// | [`insert_commits`](KnowledgeStore::insert_commits) | Bulk-insert commit records |
/// | [`list_commits`](KnowledgeStore::list_commits) | Stored commits, newest first |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert a project together with its branch sync targets.
    async fn create_project(&self, project: &Project, branches: &[BranchTarget]) -> Result<()>;

    /// Retrieve a project by ID.
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Branch targets for a project that are currently active.
    async fn active_branches(&self, project_id: &str) -> Result<Vec<BranchTarget>>;

    /// Store (or replace) a user's provider access token.
    async fn set_user_token(&self, user_id: &str, token: &str) -> Result<()>;

    /// The provider access token stored for a user, if any.
    async fn user_token(&self, user_id: &str) -> Result<Option<String>>;

    /// Create an embedding row carrying the summary and source code.
    ///
    /// Returns the new row's identifier. No duplicate detection is
    /// performed against existing rows for the same file.
    async fn insert_embedding(&self, row: &NewEmbedding) -> Result<String>;

    /// Attach an embedding vector to a row created by
    /// [`insert_embedding`](KnowledgeStore::insert_embedding).
    async fn attach_embedding_vector(&self, id: &str, vector: &[f32]) -> Result<()>;

    /// Remove an embedding row. Deleting an unknown ID is not an error.
    async fn delete_embedding(&self, id: &str) -> Result<()>;

    /// All embedding records for a project.
    async fn list_embeddings(&self, project_id: &str) -> Result<Vec<EmbeddingRecord>>;

    /// Every commit hash recorded for the project, across all branches.
    async fn commit_hashes(&self, project_id: &str) -> Result<HashSet<String>>;

    /// Bulk-insert commit records in input order.
    ///
    /// Rows whose `(project_id, commit_hash)` already exists are skipped.
    /// Returns the records that were actually inserted.
    async fn insert_commits(&self, commits: &[CommitRecord]) -> Result<Vec<CommitRecord>>;

    /// All commit records for a project, newest commit date first.
    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>>;
}

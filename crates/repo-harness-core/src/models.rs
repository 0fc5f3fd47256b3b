//! Core data models used throughout Repo Harness.
//!
//! These types describe what flows from the source-control provider,
//! through the summarization pipeline, and into the knowledge store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file's path and raw content, as loaded from a repository tree.
///
/// Produced by the content loader and discarded after an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: String,
    pub raw_content: String,
}

/// A project known to the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_url: String,
}

/// A project-configured branch the commit sync engine may poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchTarget {
    pub project_id: String,
    pub name: String,
    pub is_active: bool,
}

/// Row contents for a new embedding record, before its vector is attached.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub project_id: String,
    pub file_name: String,
    pub source_code: String,
    pub summary: String,
}

/// A persisted per-file summary and its embedding vector.
///
/// The row is written in two steps, so `summary_embedding` is `None`
/// between the insert and the vector attach. If the attach fails the
/// pipeline deletes the row before returning the error. A `None` is only
/// observable while a run is in flight, or if that delete also failed
/// (logged at ERROR).
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub project_id: String,
    pub file_name: String,
    pub source_code: String,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
}

/// Commit metadata as reported by the source-control provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCommit {
    pub hash: String,
    pub message: String,
    pub author_name: String,
    pub author_avatar: String,
    pub date: DateTime<Utc>,
}

/// A summarized commit stored for a project.
///
/// At most one record exists per `(project_id, commit_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub project_id: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_author_name: String,
    pub commit_author_avatar: String,
    pub commit_date: DateTime<Utc>,
    pub branch_name: String,
    pub summary: String,
}

impl CommitRecord {
    /// Build a record from provider metadata, tagged with the branch that
    /// discovered it.
    pub fn from_provider(
        project_id: &str,
        branch: &str,
        commit: ProviderCommit,
        summary: String,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            commit_hash: commit.hash,
            commit_message: commit.message,
            commit_author_name: commit.author_name,
            commit_author_avatar: commit.author_avatar,
            commit_date: commit.date,
            branch_name: branch.to_string(),
            summary,
        }
    }
}

/// Price of ingesting a repository, expressed as a file count.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QuotaQuote {
    pub file_count: u64,
}

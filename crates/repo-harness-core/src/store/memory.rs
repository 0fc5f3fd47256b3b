//! In-memory [`KnowledgeStore`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Commit inserts honour the `(project_id, commit_hash)` uniqueness the
//! SQLite schema enforces.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{BranchTarget, CommitRecord, EmbeddingRecord, NewEmbedding, Project};

use super::KnowledgeStore;

/// In-memory store for tests and embedding in other tools.
pub struct InMemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    branches: RwLock<Vec<BranchTarget>>,
    tokens: RwLock<HashMap<String, String>>,
    embeddings: RwLock<Vec<EmbeddingRecord>>,
    commits: RwLock<Vec<CommitRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            branches: RwLock::new(Vec::new()),
            tokens: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(Vec::new()),
            commits: RwLock::new(Vec::new()),
        }
    }

    /// Number of embedding rows, including any still missing a vector.
    pub fn embedding_row_count(&self) -> usize {
        self.embeddings.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn create_project(&self, project: &Project, branches: &[BranchTarget]) -> Result<()> {
        let mut projects = self.projects.write().unwrap();
        if projects.contains_key(&project.id) {
            bail!("project already exists: {}", project.id);
        }
        projects.insert(project.id.clone(), project.clone());
        self.branches
            .write()
            .unwrap()
            .extend(branches.iter().cloned());
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.projects.read().unwrap().get(project_id).cloned())
    }

    async fn active_branches(&self, project_id: &str) -> Result<Vec<BranchTarget>> {
        Ok(self
            .branches
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.project_id == project_id && b.is_active)
            .cloned()
            .collect())
    }

    async fn set_user_token(&self, user_id: &str, token: &str) -> Result<()> {
        self.tokens
            .write()
            .unwrap()
            .insert(user_id.to_string(), token.to_string());
        Ok(())
    }

    async fn user_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.read().unwrap().get(user_id).cloned())
    }

    async fn insert_embedding(&self, row: &NewEmbedding) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.embeddings.write().unwrap().push(EmbeddingRecord {
            id: id.clone(),
            project_id: row.project_id.clone(),
            file_name: row.file_name.clone(),
            source_code: row.source_code.clone(),
            summary: row.summary.clone(),
            summary_embedding: None,
        });
        Ok(id)
    }

    async fn attach_embedding_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut rows = self.embeddings.write().unwrap();
        match rows.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.summary_embedding = Some(vector.to_vec());
                Ok(())
            }
            None => bail!("embedding row not found: {}", id),
        }
    }

    async fn delete_embedding(&self, id: &str) -> Result<()> {
        self.embeddings.write().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn list_embeddings(&self, project_id: &str) -> Result<Vec<EmbeddingRecord>> {
        Ok(self
            .embeddings
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn commit_hashes(&self, project_id: &str) -> Result<HashSet<String>> {
        Ok(self
            .commits
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.project_id == project_id)
            .map(|c| c.commit_hash.clone())
            .collect())
    }

    async fn insert_commits(&self, commits: &[CommitRecord]) -> Result<Vec<CommitRecord>> {
        let mut stored = self.commits.write().unwrap();
        let mut inserted = Vec::new();
        for commit in commits {
            let exists = stored
                .iter()
                .any(|c| c.project_id == commit.project_id && c.commit_hash == commit.commit_hash);
            if exists {
                continue;
            }
            stored.push(commit.clone());
            inserted.push(commit.clone());
        }
        Ok(inserted)
    }

    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>> {
        let mut commits: Vec<CommitRecord> = self
            .commits
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        commits.sort_by(|a, b| b.commit_date.cmp(&a.commit_date));
        Ok(commits)
    }
}

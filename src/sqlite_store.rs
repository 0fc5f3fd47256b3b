//! SQLite-backed [`KnowledgeStore`] implementation.
//!
//! Maps each store operation onto the schema created by
//! [`crate::migrate`]. Vectors are stored as little-endian `f32` BLOBs.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use repo_harness_core::models::{
    BranchTarget, CommitRecord, EmbeddingRecord, NewEmbedding, Project,
};
use repo_harness_core::store::KnowledgeStore;
use repo_harness_core::vector::{blob_to_vec, vec_to_blob};

/// SQLite implementation of the [`KnowledgeStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn create_project(&self, project: &Project, branches: &[BranchTarget]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO projects (id, name, repo_url, created_at) VALUES (?, ?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.repo_url)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert project {}", project.id))?;

        for branch in branches {
            sqlx::query(
                r#"
                INSERT INTO branch_targets (project_id, name, is_active) VALUES (?, ?, ?)
                ON CONFLICT(project_id, name) DO UPDATE SET is_active = excluded.is_active
                "#,
            )
            .bind(&branch.project_id)
            .bind(&branch.name)
            .bind(branch.is_active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, repo_url FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            repo_url: r.get("repo_url"),
        }))
    }

    async fn active_branches(&self, project_id: &str) -> Result<Vec<BranchTarget>> {
        let rows = sqlx::query(
            "SELECT project_id, name, is_active FROM branch_targets WHERE project_id = ? AND is_active = 1 ORDER BY rowid",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| BranchTarget {
                project_id: r.get("project_id"),
                name: r.get("name"),
                is_active: r.get::<i64, _>("is_active") != 0,
            })
            .collect())
    }

    async fn set_user_token(&self, user_id: &str, token: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, github_token, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                github_token = excluded.github_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_token(&self, user_id: &str) -> Result<Option<String>> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT github_token FROM user_credentials WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token)
    }

    async fn insert_embedding(&self, row: &NewEmbedding) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO source_code_embeddings (id, project_id, file_name, source_code, summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&row.project_id)
        .bind(&row.file_name)
        .bind(&row.source_code)
        .bind(&row.summary)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert embedding row for {}", row.file_name))?;

        Ok(id)
    }

    async fn attach_embedding_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let blob = vec_to_blob(vector);
        let result = sqlx::query("UPDATE source_code_embeddings SET summary_embedding = ? WHERE id = ?")
            .bind(&blob)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("embedding row not found: {}", id);
        }
        Ok(())
    }

    async fn delete_embedding(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM source_code_embeddings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete embedding row {}", id))?;
        Ok(())
    }

    async fn list_embeddings(&self, project_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, file_name, source_code, summary, summary_embedding
            FROM source_code_embeddings
            WHERE project_id = ?
            ORDER BY created_at, file_name
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let blob: Option<Vec<u8>> = r.get("summary_embedding");
                EmbeddingRecord {
                    id: r.get("id"),
                    project_id: r.get("project_id"),
                    file_name: r.get("file_name"),
                    source_code: r.get("source_code"),
                    summary: r.get("summary"),
                    summary_embedding: blob.map(|b| blob_to_vec(&b)),
                }
            })
            .collect())
    }

    async fn commit_hashes(&self, project_id: &str) -> Result<HashSet<String>> {
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT commit_hash FROM commits WHERE project_id = ?")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(hashes.into_iter().collect())
    }

    async fn insert_commits(&self, commits: &[CommitRecord]) -> Result<Vec<CommitRecord>> {
        if commits.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now().timestamp();
        let mut inserted = Vec::with_capacity(commits.len());
        let mut tx = self.pool.begin().await?;

        for commit in commits {
            let result = sqlx::query(
                r#"
                INSERT INTO commits (id, project_id, commit_hash, commit_message, commit_author_name,
                                     commit_author_avatar, commit_date, branch_name, summary, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(project_id, commit_hash) DO NOTHING
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&commit.project_id)
            .bind(&commit.commit_hash)
            .bind(&commit.commit_message)
            .bind(&commit.commit_author_name)
            .bind(&commit.commit_author_avatar)
            .bind(commit.commit_date.timestamp())
            .bind(&commit.branch_name)
            .bind(&commit.summary)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted.push(commit.clone());
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_commits(&self, project_id: &str) -> Result<Vec<CommitRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, commit_hash, commit_message, commit_author_name,
                   commit_author_avatar, commit_date, branch_name, summary
            FROM commits
            WHERE project_id = ?
            ORDER BY commit_date DESC, created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let ts: i64 = r.get("commit_date");
                CommitRecord {
                    project_id: r.get("project_id"),
                    commit_hash: r.get("commit_hash"),
                    commit_message: r.get("commit_message"),
                    commit_author_name: r.get("commit_author_name"),
                    commit_author_avatar: r.get("commit_author_avatar"),
                    commit_date: Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
                    branch_name: r.get("branch_name"),
                    summary: r.get("summary"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn test_store(tmp: &TempDir) -> SqliteStore {
        let config = Config::minimal(tmp.path().join("rh.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        store
            .create_project(
                &Project {
                    id: "p1".to_string(),
                    name: "demo".to_string(),
                    repo_url: "https://github.com/acme/demo".to_string(),
                },
                &[
                    BranchTarget {
                        project_id: "p1".to_string(),
                        name: "main".to_string(),
                        is_active: true,
                    },
                    BranchTarget {
                        project_id: "p1".to_string(),
                        name: "legacy".to_string(),
                        is_active: false,
                    },
                ],
            )
            .await
            .unwrap();
        store
    }

    fn commit(hash: &str, branch: &str, ts: i64) -> CommitRecord {
        CommitRecord {
            project_id: "p1".to_string(),
            commit_hash: hash.to_string(),
            commit_message: format!("change {}", hash),
            commit_author_name: "Ada".to_string(),
            commit_author_avatar: "https://avatars.example/ada".to_string(),
            commit_date: Utc.timestamp_opt(ts, 0).unwrap(),
            branch_name: branch.to_string(),
            summary: format!("summary of {}", hash),
        }
    }

    #[tokio::test]
    async fn test_project_and_branches() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let project = store.get_project("p1").await.unwrap().unwrap();
        assert_eq!(project.repo_url, "https://github.com/acme/demo");
        assert!(store.get_project("nope").await.unwrap().is_none());

        let active = store.active_branches("p1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "main");
    }

    #[tokio::test]
    async fn test_user_token_upsert() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        assert!(store.user_token("u1").await.unwrap().is_none());
        store.set_user_token("u1", "first").await.unwrap();
        store.set_user_token("u1", "second").await.unwrap();
        assert_eq!(store.user_token("u1").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_embedding_vector_attached_in_second_write() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let id = store
            .insert_embedding(&NewEmbedding {
                project_id: "p1".to_string(),
                file_name: "README.md".to_string(),
                source_code: "# demo".to_string(),
                summary: "project readme".to_string(),
            })
            .await
            .unwrap();

        let before = store.list_embeddings("p1").await.unwrap();
        assert!(before[0].summary_embedding.is_none());

        store
            .attach_embedding_vector(&id, &[0.1, 0.2, 0.3])
            .await
            .unwrap();
        let after = store.list_embeddings("p1").await.unwrap();
        assert_eq!(after[0].summary_embedding, Some(vec![0.1, 0.2, 0.3]));

        assert!(store.attach_embedding_vector("missing", &[1.0]).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_embedding() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let id = store
            .insert_embedding(&NewEmbedding {
                project_id: "p1".to_string(),
                file_name: "lib.rs".to_string(),
                source_code: "pub fn f() {}".to_string(),
                summary: "a function".to_string(),
            })
            .await
            .unwrap();
        store.delete_embedding(&id).await.unwrap();
        assert!(store.list_embeddings("p1").await.unwrap().is_empty());

        store.delete_embedding(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_commits_unique_per_project() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let first = store
            .insert_commits(&[commit("aaa", "main", 100), commit("bbb", "main", 200)])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = store
            .insert_commits(&[commit("bbb", "feature", 200), commit("ccc", "feature", 300)])
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].commit_hash, "ccc");

        let hashes = store.commit_hashes("p1").await.unwrap();
        assert_eq!(hashes.len(), 3);

        let listed = store.list_commits("p1").await.unwrap();
        assert_eq!(listed[0].commit_hash, "ccc");
        let bbb = listed.iter().find(|c| c.commit_hash == "bbb").unwrap();
        assert_eq!(bbb.branch_name, "main");
        assert_eq!(bbb.commit_date.timestamp(), 200);
    }

    #[tokio::test]
    async fn test_nul_free_text_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;
        let source = repo_harness_core::text::strip_nul("bin\0ary\0");
        store
            .insert_embedding(&NewEmbedding {
                project_id: "p1".to_string(),
                file_name: "blob.dat".to_string(),
                source_code: source,
                summary: "data".to_string(),
            })
            .await
            .unwrap();
        let rows = store.list_embeddings("p1").await.unwrap();
        assert_eq!(rows[0].source_code, "binary");
    }
}

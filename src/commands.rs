//! CLI command implementations.
//!
//! Each `run_*` function opens the knowledge store, builds an [`Engine`]
//! and prints a human-readable result to stdout.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::task::JoinHandle;

use repo_harness_core::store::KnowledgeStore;

use crate::config::Config;
use crate::db;
use crate::engine::Engine;
use crate::error::IngestError;
use crate::migrate;
use crate::server;
use crate::sqlite_store::SqliteStore;

/// Open the database (applying the schema if needed) and build an engine.
pub async fn open_engine(config: &Config) -> Result<(Engine, JoinHandle<()>)> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store: Arc<dyn KnowledgeStore> = Arc::new(SqliteStore::new(pool));
    Engine::from_config(config, store)
}

pub async fn run_estimate(config: &Config, repo_url: &str, token: Option<&str>) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    let quote = engine.estimate_cost(repo_url, token).await?;
    println!("{} files", quote.file_count);
    Ok(())
}

pub async fn run_load(
    config: &Config,
    repo_url: &str,
    branch: &str,
    token: Option<&str>,
) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    let mut documents = engine.load_repository(repo_url, branch, token).await?;

    let mut count = 0usize;
    let mut bytes = 0usize;
    while let Some(doc) = documents.next().await {
        println!("{:>8}  {}", doc.raw_content.len(), doc.path);
        count += 1;
        bytes += doc.raw_content.len();
    }
    println!("{} documents, {} bytes", count, bytes);
    Ok(())
}

pub async fn run_index(config: &Config, project_id: &str, token: Option<&str>) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    let project = engine
        .store()
        .get_project(project_id)
        .await?
        .ok_or_else(|| IngestError::ProjectNotFound(project_id.to_string()))?;

    let report = engine
        .index_repository(&project.id, &project.repo_url, token)
        .await?;
    println!(
        "Indexed {}: {} documents in {} batches, {} embedded, {} skipped",
        project.name, report.documents, report.batches, report.embedded, report.skipped
    );
    Ok(())
}

pub async fn run_sync(config: &Config, project_id: &str, user_id: &str) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    let outcome = engine.sync_commits(project_id, user_id).await?;

    for branch in &outcome.branches {
        match &branch.error {
            Some(err) => println!("  {}: failed ({})", branch.branch, err),
            None => println!(
                "  {}: {} fetched, {} new, {} inserted",
                branch.branch, branch.fetched, branch.new, branch.inserted
            ),
        }
    }
    println!("{} new commits stored", outcome.inserted.len());
    Ok(())
}

pub async fn run_branches(config: &Config, repo_url: &str, user_id: &str) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    for branch in engine.list_branches(repo_url, user_id).await? {
        println!("{}", branch);
    }
    Ok(())
}

pub async fn run_project_add(
    config: &Config,
    name: &str,
    repo_url: &str,
    branches: &[String],
    user_id: &str,
) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    let created = engine
        .create_project(name, repo_url, branches, user_id)
        .await?;
    println!("Created project {} ({})", created.project.name, created.project.id);
    println!("{} commits synced", created.commits_synced);

    if created.index_queued {
        println!("Indexing repository...");
        engine.flush_tasks().await;
        let stats = engine.task_stats();
        if stats.failed > 0 {
            println!("Indexing failed; see log output for details.");
        } else {
            let rows = engine.store().list_embeddings(&created.project.id).await?;
            println!("{} files indexed", rows.len());
        }
    }
    Ok(())
}

pub async fn run_token_set(config: &Config, user_id: &str, token: &str) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    engine.store().set_user_token(user_id, token).await?;
    println!("Stored token for {}", user_id);
    Ok(())
}

pub async fn run_serve(config: &Config) -> Result<()> {
    let (engine, _worker) = open_engine(config).await?;
    server::run_server(config, engine).await
}

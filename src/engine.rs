//! Entry point for the rest of the application.
//!
//! [`Engine`] owns the injected collaborators (knowledge store, provider
//! factory, model client, background queue) and exposes the ingestion and
//! sync operations:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`estimate_cost`](Engine::estimate_cost) | File count used to price ingestion |
//! | [`load_repository`](Engine::load_repository) | Stream of the branch's documents |
//! | [`index_repository`](Engine::index_repository) | Summaries and embeddings persisted |
//! | [`sync_commits`](Engine::sync_commits) | New commits summarized and persisted |
//! | [`list_branches`](Engine::list_branches) | Branch names from the provider |
//! | [`create_project`](Engine::create_project) | Project stored, synced once, indexing queued |
//! | [`read_commits`](Engine::read_commits) | Stored commits, background refresh queued |
//!
//! The engine is cheap to clone; queued work holds its own clone.

use std::sync::Arc;

use anyhow::Result;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::task::JoinHandle;

use repo_harness_core::models::{BranchTarget, CommitRecord, Project, QuotaQuote, SourceDocument};
use repo_harness_core::store::KnowledgeStore;

use crate::commit_sync::{self, CommitSyncEngine, SyncOutcome};
use crate::config::Config;
use crate::credentials;
use crate::error::IngestError;
use crate::github::{GitHubClient, ProviderFactory, RepoProvider, RepoRef};
use crate::llm::{create_model, LanguageModel, SummaryClient};
use crate::loader::ContentLoader;
use crate::pipeline::{EmbeddingPipeline, IndexReport};
use crate::tasks::{TaskQueue, TaskStats};

/// Result of [`Engine::create_project`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectCreated {
    pub project: Project,
    /// Commits stored by the initial sync; zero if it failed.
    pub commits_synced: usize,
    pub index_queued: bool,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn KnowledgeStore>,
    providers: Arc<dyn ProviderFactory>,
    shared_token: Option<String>,
    loader: Arc<ContentLoader>,
    pipeline: Arc<EmbeddingPipeline>,
    commits: Arc<CommitSyncEngine>,
    tasks: TaskQueue,
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: &Config,
        store: Arc<dyn KnowledgeStore>,
        providers: Arc<dyn ProviderFactory>,
        model: Arc<dyn LanguageModel>,
        tasks: TaskQueue,
    ) -> Result<Self> {
        let summaries = Arc::new(SummaryClient::new(
            model,
            config.pipeline.summary_max_chars,
            config.llm.trace_io,
        ));

        Ok(Self {
            pipeline: Arc::new(EmbeddingPipeline::new(
                Arc::clone(&store),
                Arc::clone(&summaries),
                config.pipeline.batch_size,
            )),
            commits: Arc::new(CommitSyncEngine::new(
                Arc::clone(&store),
                summaries,
                config.pipeline.commits_per_branch,
            )),
            loader: Arc::new(ContentLoader::new(&config.github)?),
            shared_token: config.github.token.clone(),
            store,
            providers,
            tasks,
        })
    }

    /// Build the GitHub client, model provider and task queue from config.
    ///
    /// Must be called inside a Tokio runtime; the returned handle is the
    /// background worker.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn KnowledgeStore>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let providers: Arc<dyn ProviderFactory> = Arc::new(GitHubClient::new(&config.github)?);
        let model = create_model(&config.llm)?;
        let (tasks, worker) = TaskQueue::start(config.tasks.queue_capacity);
        Ok((Self::new(config, store, providers, model, tasks)?, worker))
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn task_stats(&self) -> TaskStats {
        self.tasks.stats()
    }

    /// Wait for queued background work to finish.
    pub async fn flush_tasks(&self) {
        self.tasks.flush().await;
    }

    fn provider(&self, token: Option<&str>) -> Arc<dyn RepoProvider> {
        self.providers
            .for_token(token.or(self.shared_token.as_deref()))
    }

    async fn provider_for_user(&self, user_id: &str) -> Result<Arc<dyn RepoProvider>> {
        let token =
            credentials::resolve_token(self.store.as_ref(), user_id, self.shared_token.as_deref())
                .await?;
        Ok(self.providers.for_token(token.as_deref()))
    }

    /// Number of files the repository would cost to ingest.
    pub async fn estimate_cost(&self, repo_url: &str, token: Option<&str>) -> Result<QuotaQuote> {
        let provider = self.provider(token);
        self.loader.estimate_cost(provider.as_ref(), repo_url).await
    }

    /// Documents on `branch`, fetched lazily. A fresh call re-fetches.
    pub async fn load_repository(
        &self,
        repo_url: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<BoxStream<'static, SourceDocument>> {
        let provider = self.provider(token);
        self.loader.load_repository(provider, repo_url, branch).await
    }

    /// Ingest the default branch of `repo_url` into `project_id`.
    pub async fn index_repository(
        &self,
        project_id: &str,
        repo_url: &str,
        token: Option<&str>,
    ) -> Result<IndexReport> {
        let provider = self.provider(token);
        let repo = RepoRef::parse(repo_url)?;
        let branch = provider.default_branch(&repo).await?;

        let documents = self
            .loader
            .load_repository(provider, repo_url, &branch)
            .await?;
        self.pipeline.run(project_id, documents).await
    }

    /// Discover and store new commits on the project's branches, acting as
    /// `user_id`.
    pub async fn sync_commits(&self, project_id: &str, user_id: &str) -> Result<SyncOutcome> {
        let provider = self.provider_for_user(user_id).await?;
        self.commits.sync(provider.as_ref(), project_id).await
    }

    pub async fn list_branches(&self, repo_url: &str, user_id: &str) -> Result<Vec<String>> {
        let provider = self.provider_for_user(user_id).await?;
        commit_sync::list_branches(provider.as_ref(), repo_url).await
    }

    /// Register a project, sync its commits once, and queue indexing.
    ///
    /// Neither the sync nor the indexing run can fail the call: sync errors
    /// are logged and indexing errors surface through the task queue.
    pub async fn create_project(
        &self,
        name: &str,
        repo_url: &str,
        branches: &[String],
        user_id: &str,
    ) -> Result<ProjectCreated> {
        RepoRef::parse(repo_url)?;

        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            repo_url: repo_url.to_string(),
        };
        let targets: Vec<BranchTarget> = branches
            .iter()
            .map(|b| BranchTarget {
                project_id: project.id.clone(),
                name: b.clone(),
                is_active: true,
            })
            .collect();
        self.store.create_project(&project, &targets).await?;
        tracing::info!(project_id = %project.id, repo_url, "project created");

        let commits_synced = match self.sync_commits(&project.id, user_id).await {
            Ok(outcome) => outcome.inserted.len(),
            Err(e) => {
                tracing::warn!(project_id = %project.id, error = %e, "initial commit sync failed");
                0
            }
        };

        let token =
            credentials::resolve_token(self.store.as_ref(), user_id, self.shared_token.as_deref())
                .await?;
        let engine = self.clone();
        let project_id = project.id.clone();
        let url = repo_url.to_string();
        let index_queued = self.tasks.submit(format!("index:{}", project.id), async move {
            engine
                .index_repository(&project_id, &url, token.as_deref())
                .await
                .map(|_| ())
        });

        Ok(ProjectCreated {
            project,
            commits_synced,
            index_queued,
        })
    }

    /// Stored commits for the project, newest first. A commit sync is queued
    /// in the background and does not delay the answer.
    pub async fn read_commits(&self, project_id: &str, user_id: &str) -> Result<Vec<CommitRecord>> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(IngestError::ProjectNotFound(project_id.to_string()).into());
        }
        let commits = self.store.list_commits(project_id).await?;

        let engine = self.clone();
        let project = project_id.to_string();
        let user = user_id.to_string();
        self.tasks.submit(format!("sync:{}", project_id), async move {
            engine.sync_commits(&project, &user).await.map(|_| ())
        });

        Ok(commits)
    }
}

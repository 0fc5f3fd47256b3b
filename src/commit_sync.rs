//! Commit sync engine.
//!
//! For each active branch target (or the repository's default branch when
//! there are none) the engine lists the newest commits, drops every hash
//! the project already stores on *any* branch, summarizes the remaining
//! diffs concurrently, and bulk-inserts the result tagged with the branch
//! name.
//!
//! Branches run one after another, so a commit reachable from several
//! branches is attributed to the first branch that sees it. A failing diff
//! or summary only empties that commit's summary; a failing branch is
//! reported and the next branch still runs.

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;

use repo_harness_core::models::{CommitRecord, ProviderCommit};
use repo_harness_core::store::KnowledgeStore;
use repo_harness_core::text::strip_nul;

use crate::error::IngestError;
use crate::github::{RepoProvider, RepoRef};
use crate::llm::{SummaryClient, SummaryKind};

/// Per-branch totals for one sync run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BranchSyncReport {
    pub branch: String,
    /// Commits returned by the provider.
    pub fetched: usize,
    /// Commits not yet stored for the project.
    pub new: usize,
    pub inserted: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncOutcome {
    /// Records inserted by this run, in branch order then provider order.
    pub inserted: Vec<CommitRecord>,
    pub branches: Vec<BranchSyncReport>,
}

/// Outcome of fetching and summarizing one commit's diff.
#[derive(Debug)]
pub enum CommitSummary {
    Summarized(String),
    Failed { reason: String },
}

impl CommitSummary {
    /// The summary to store; failures store an empty summary.
    pub fn into_text(self) -> String {
        match self {
            CommitSummary::Summarized(text) => text,
            CommitSummary::Failed { .. } => String::new(),
        }
    }
}

pub struct CommitSyncEngine {
    store: Arc<dyn KnowledgeStore>,
    summaries: Arc<SummaryClient>,
    commits_per_branch: usize,
}

impl CommitSyncEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        summaries: Arc<SummaryClient>,
        commits_per_branch: usize,
    ) -> Self {
        Self {
            store,
            summaries,
            commits_per_branch,
        }
    }

    /// Sync every target branch of `project_id` through `provider`.
    ///
    /// Fails only when the project is unknown, its URL does not parse, or
    /// the default branch cannot be resolved. Branch-level failures are
    /// carried in [`SyncOutcome::branches`].
    pub async fn sync(&self, provider: &dyn RepoProvider, project_id: &str) -> Result<SyncOutcome> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| IngestError::ProjectNotFound(project_id.to_string()))?;
        let repo = RepoRef::parse(&project.repo_url)?;

        let mut branches: Vec<String> = self
            .store
            .active_branches(project_id)
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect();
        if branches.is_empty() {
            let default = provider.default_branch(&repo).await?;
            tracing::debug!(project_id, branch = %default, "no active branch targets, using default branch");
            branches.push(default);
        }

        let mut outcome = SyncOutcome::default();
        for branch in branches {
            match self.sync_branch(provider, &repo, project_id, &branch).await {
                Ok((report, mut inserted)) => {
                    outcome.branches.push(report);
                    outcome.inserted.append(&mut inserted);
                }
                Err(e) => {
                    tracing::warn!(project_id, branch = %branch, error = %e, "branch sync failed");
                    outcome.branches.push(BranchSyncReport {
                        branch,
                        fetched: 0,
                        new: 0,
                        inserted: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            project_id,
            branches = outcome.branches.len(),
            inserted = outcome.inserted.len(),
            "commit sync complete"
        );
        Ok(outcome)
    }

    async fn sync_branch(
        &self,
        provider: &dyn RepoProvider,
        repo: &RepoRef,
        project_id: &str,
        branch: &str,
    ) -> Result<(BranchSyncReport, Vec<CommitRecord>)> {
        let commits = provider
            .list_commits(repo, branch, self.commits_per_branch)
            .await?;
        let fetched = commits.len();

        // Project-wide, and re-read per branch so earlier branches count.
        let mut known = self.store.commit_hashes(project_id).await?;
        let fresh: Vec<ProviderCommit> = commits
            .into_iter()
            .filter(|c| known.insert(c.hash.clone()))
            .collect();

        let mut report = BranchSyncReport {
            branch: branch.to_string(),
            fetched,
            new: fresh.len(),
            inserted: 0,
            error: None,
        };
        if fresh.is_empty() {
            return Ok((report, Vec::new()));
        }

        let summaries = join_all(
            fresh
                .iter()
                .map(|c| self.summarize_commit(provider, repo, &c.hash)),
        )
        .await;

        let records: Vec<CommitRecord> = fresh
            .into_iter()
            .zip(summaries)
            .map(|(commit, summary)| {
                if let CommitSummary::Failed { reason } = &summary {
                    tracing::warn!(commit = %commit.hash, reason = %reason, "storing commit without summary");
                }
                CommitRecord::from_provider(project_id, branch, commit, strip_nul(&summary.into_text()))
            })
            .collect();

        let inserted = self.store.insert_commits(&records).await?;
        report.inserted = inserted.len();
        Ok((report, inserted))
    }

    async fn summarize_commit(
        &self,
        provider: &dyn RepoProvider,
        repo: &RepoRef,
        sha: &str,
    ) -> CommitSummary {
        let diff = match provider.commit_diff(repo, sha).await {
            Ok(diff) => diff,
            Err(e) => {
                return CommitSummary::Failed {
                    reason: format!("diff unavailable: {}", e),
                }
            }
        };
        let summary = self.summaries.summarize(&diff, SummaryKind::CommitDiff).await;
        if summary.is_empty() {
            CommitSummary::Failed {
                reason: "empty summary".to_string(),
            }
        } else {
            CommitSummary::Summarized(summary)
        }
    }
}

/// Branch names of the repository behind `repo_url`.
pub async fn list_branches(provider: &dyn RepoProvider, repo_url: &str) -> Result<Vec<String>> {
    let repo = RepoRef::parse(repo_url)?;
    provider.list_branches(&repo).await
}

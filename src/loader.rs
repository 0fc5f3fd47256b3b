//! Repository content loading and ingestion cost estimation.
//!
//! Both walk the provider's contents API. Estimation fans out one request
//! per subdirectory with no bound and counts every file; loading bounds the
//! fan-out to `github.loader_concurrency`, drops paths matching
//! `github.ignore_globs` (lockfiles by default) and yields documents lazily.

use std::sync::Arc;

use anyhow::Result;
use futures::future::{join_all, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};

use repo_harness_core::models::{QuotaQuote, SourceDocument};

use crate::config::GithubConfig;
use crate::github::{EntryKind, Listing, RepoProvider, RepoRef};

pub struct ContentLoader {
    concurrency: usize,
    ignore: GlobSet,
}

impl ContentLoader {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        Ok(Self {
            concurrency: config.loader_concurrency.max(1),
            ignore: build_globset(&config.ignore_globs)?,
        })
    }

    /// Count every file reachable from the repository root.
    ///
    /// A URL without an owner/repo pair prices at zero. Provider errors
    /// propagate.
    pub async fn estimate_cost(
        &self,
        provider: &dyn RepoProvider,
        repo_url: &str,
    ) -> Result<QuotaQuote> {
        let repo = match RepoRef::parse(repo_url) {
            Ok(repo) => repo,
            Err(_) => return Ok(QuotaQuote { file_count: 0 }),
        };
        let file_count = count_files(provider, &repo, String::new()).await?;
        Ok(QuotaQuote { file_count })
    }

    /// Resolve the file tree on `branch` and return a stream of its
    /// documents.
    ///
    /// The root listing must succeed; a failing subtree or file is logged
    /// and omitted. Contents are fetched as the stream is polled, so a
    /// fresh call is needed to read the repository again.
    pub async fn load_repository(
        &self,
        provider: Arc<dyn RepoProvider>,
        repo_url: &str,
        branch: &str,
    ) -> Result<BoxStream<'static, SourceDocument>> {
        let repo = RepoRef::parse(repo_url)?;
        let paths = self.collect_paths(provider.as_ref(), &repo, branch).await?;

        tracing::info!(repo = %repo, branch, files = paths.len(), "resolved repository tree");

        let branch = branch.to_string();
        let documents = stream::iter(paths)
            .map(move |path| {
                let provider = Arc::clone(&provider);
                let repo = repo.clone();
                let branch = branch.clone();
                async move {
                    match provider.file_content(&repo, &path, &branch).await {
                        Ok(raw_content) => Some(SourceDocument { path, raw_content }),
                        Err(e) => {
                            tracing::warn!(path = %path, error = %e, "skipping unreadable file");
                            None
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .filter_map(|doc| async move { doc })
            .boxed();

        Ok(documents)
    }

    /// Breadth-first walk, at most `concurrency` listings in flight.
    async fn collect_paths(
        &self,
        provider: &dyn RepoProvider,
        repo: &RepoRef,
        branch: &str,
    ) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        let root = provider.list_contents(repo, "", Some(branch)).await?;
        self.classify(root, &mut files, &mut dirs);

        while !dirs.is_empty() {
            let listings: Vec<(String, Result<Listing>)> = stream::iter(std::mem::take(&mut dirs))
                .map(|dir| async move {
                    let listing = provider.list_contents(repo, &dir, Some(branch)).await;
                    (dir, listing)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (dir, listing) in listings {
                match listing {
                    Ok(listing) => self.classify(listing, &mut files, &mut dirs),
                    Err(e) => tracing::warn!(dir = %dir, error = %e, "skipping unreadable directory"),
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn classify(&self, listing: Listing, files: &mut Vec<String>, dirs: &mut Vec<String>) {
        let entries = match listing {
            Listing::File(entry) => vec![entry],
            Listing::Dir(entries) => entries,
        };
        for entry in entries {
            match entry.kind {
                EntryKind::File if self.ignore.is_match(&entry.path) => {
                    tracing::debug!(path = %entry.path, "ignored by pattern");
                }
                EntryKind::File => files.push(entry.path),
                EntryKind::Dir => dirs.push(entry.path),
                EntryKind::Other => {
                    tracing::warn!(path = %entry.path, kind = %entry.type_name, "skipping unsupported entry type");
                }
            }
        }
    }
}

fn count_files<'a>(
    provider: &'a dyn RepoProvider,
    repo: &'a RepoRef,
    path: String,
) -> BoxFuture<'a, Result<u64>> {
    async move {
        match provider.list_contents(repo, &path, None).await? {
            Listing::File(_) => Ok(1),
            Listing::Dir(entries) => {
                let (dirs, rest): (Vec<_>, Vec<_>) =
                    entries.into_iter().partition(|e| e.kind == EntryKind::Dir);
                let mut total = rest.iter().filter(|e| e.kind == EntryKind::File).count() as u64;

                let nested =
                    join_all(dirs.into_iter().map(|d| count_files(provider, repo, d.path))).await;
                for count in nested {
                    total += count?;
                }
                Ok(total)
            }
        }
    }
    .boxed()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

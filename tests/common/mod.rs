//! Shared fakes for integration tests.
#![allow(dead_code)]

pub mod fake_github;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use repo_harness::config::Config;
use repo_harness::engine::Engine;
use repo_harness::error::IngestError;
use repo_harness::github::{Entry, EntryKind, Listing, ProviderFactory, RepoProvider, RepoRef};
use repo_harness::llm::LanguageModel;
use repo_harness::tasks::TaskQueue;
use repo_harness_core::models::ProviderCommit;
use repo_harness_core::store::memory::InMemoryStore;
use repo_harness_core::store::KnowledgeStore;

// ============ Fake repository provider ============

#[derive(Default)]
pub struct FakeRepo {
    pub files: BTreeMap<String, String>,
    /// Paths reported with an unsupported entry type (e.g. symlinks).
    pub symlinks: BTreeSet<String>,
    pub unreadable_files: HashSet<String>,
    pub unreadable_dirs: HashSet<String>,
    pub default_branch: String,
    /// Newest-first commits per branch.
    pub commits: HashMap<String, Vec<ProviderCommit>>,
    pub diffs: HashMap<String, String>,
    pub failing_diffs: HashSet<String>,
    pub failing_branches: HashSet<String>,
    pub branch_names: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self {
            default_branch: "main".to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_commits(mut self, branch: &str, commits: Vec<ProviderCommit>) -> Self {
        for c in &commits {
            self.diffs
                .entry(c.hash.clone())
                .or_insert_with(|| format!("diff --git a/{0} b/{0}\n+change {0}", c.hash));
        }
        self.commits.insert(branch.to_string(), commits);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn children(&self, dir: &str) -> Option<Vec<Entry>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let mut seen = BTreeMap::new();
        let all = self
            .files
            .keys()
            .map(|p| (p, EntryKind::File))
            .chain(self.symlinks.iter().map(|p| (p, EntryKind::Other)));

        for (path, kind) in all {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    seen.insert(format!("{}{}", prefix, child), EntryKind::Dir);
                }
                None => {
                    seen.insert(path.clone(), kind);
                }
            }
        }

        if seen.is_empty() && !dir.is_empty() {
            return None;
        }
        Some(
            seen.into_iter()
                .map(|(path, kind)| Entry {
                    path,
                    kind,
                    type_name: match kind {
                        EntryKind::File => "file",
                        EntryKind::Dir => "dir",
                        EntryKind::Other => "symlink",
                    }
                    .to_string(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl RepoProvider for FakeRepo {
    async fn list_contents(
        &self,
        _repo: &RepoRef,
        path: &str,
        _git_ref: Option<&str>,
    ) -> Result<Listing> {
        self.record(format!("contents:{}", path));
        if self.unreadable_dirs.contains(path) {
            return Err(IngestError::RateLimited {
                message: "API rate limit exceeded".to_string(),
            }
            .into());
        }
        if self.files.contains_key(path) {
            return Ok(Listing::File(Entry {
                path: path.to_string(),
                kind: EntryKind::File,
                type_name: "file".to_string(),
            }));
        }
        match self.children(path) {
            Some(entries) => Ok(Listing::Dir(entries)),
            None => Err(IngestError::NotFound(path.to_string()).into()),
        }
    }

    async fn file_content(&self, _repo: &RepoRef, path: &str, git_ref: &str) -> Result<String> {
        self.record(format!("file:{}@{}", path, git_ref));
        if self.unreadable_files.contains(path) {
            anyhow::bail!("cannot read {}", path);
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| IngestError::NotFound(path.to_string()).into())
    }

    async fn list_branches(&self, _repo: &RepoRef) -> Result<Vec<String>> {
        self.record("branches".to_string());
        Ok(self.branch_names.clone())
    }

    async fn list_commits(
        &self,
        _repo: &RepoRef,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<ProviderCommit>> {
        self.record(format!("commits:{}:{}", branch, limit));
        if self.failing_branches.contains(branch) {
            return Err(IngestError::RateLimited {
                message: "API rate limit exceeded".to_string(),
            }
            .into());
        }
        Ok(self
            .commits
            .get(branch)
            .map(|c| c.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn commit_diff(&self, _repo: &RepoRef, sha: &str) -> Result<String> {
        self.record(format!("diff:{}", sha));
        if self.failing_diffs.contains(sha) {
            anyhow::bail!("diff unavailable for {}", sha);
        }
        Ok(self.diffs.get(sha).cloned().unwrap_or_default())
    }

    async fn default_branch(&self, _repo: &RepoRef) -> Result<String> {
        self.record("default_branch".to_string());
        Ok(self.default_branch.clone())
    }
}

/// Hands out the same [`FakeRepo`] for every token, recording the tokens.
pub struct FakeProviders {
    pub repo: Arc<FakeRepo>,
    pub tokens: Mutex<Vec<Option<String>>>,
}

impl FakeProviders {
    pub fn new(repo: FakeRepo) -> Arc<Self> {
        Arc::new(Self {
            repo: Arc::new(repo),
            tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

impl ProviderFactory for FakeProviders {
    fn for_token(&self, token: Option<&str>) -> Arc<dyn RepoProvider> {
        self.tokens.lock().unwrap().push(token.map(str::to_string));
        self.repo.clone()
    }
}

pub fn commit(hash: &str, minutes: i64) -> ProviderCommit {
    ProviderCommit {
        hash: hash.to_string(),
        message: format!("commit {}", hash),
        author_name: "Ada Lovelace".to_string(),
        author_avatar: "https://avatars.example/ada.png".to_string(),
        date: Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap(),
    }
}

// ============ Fake model ============

/// Deterministic model. A prompt containing `EMPTY` summarizes to an empty
/// string, `FAIL` makes generation error, `NUL` adds a NUL byte to the
/// summary, and a summary containing `noembed` fails to embed.
#[derive(Default)]
pub struct FakeModel {
    pub generate_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay_ms: u64,
}

impl FakeModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delay_ms: 10,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> (usize, usize) {
        (
            self.generate_calls.load(Ordering::SeqCst),
            self.embed_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if prompt.contains("FAIL") {
            anyhow::bail!("model overloaded");
        }
        if prompt.contains("EMPTY") {
            return Ok(String::new());
        }
        let head = prompt.lines().next().unwrap_or_default();
        if prompt.contains("NUL") {
            return Ok(format!("summary\0 of {}", head));
        }
        Ok(format!("summary of {}", head))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("noembed") {
            anyhow::bail!("embedding endpoint returned 500");
        }
        Ok(vec![text.len() as f32, 0.5, 0.25])
    }
}

// ============ Engine assembly ============

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<InMemoryStore>,
    pub providers: Arc<FakeProviders>,
    pub model: Arc<FakeModel>,
}

pub fn harness(repo: FakeRepo) -> Harness {
    harness_with(repo, |_| {})
}

pub fn harness_with(repo: FakeRepo, adjust: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::minimal("unused.sqlite");
    adjust(&mut config);

    let store = Arc::new(InMemoryStore::new());
    let providers = FakeProviders::new(repo);
    let model = FakeModel::new();
    let (tasks, _worker) = TaskQueue::start(config.tasks.queue_capacity);

    let engine = Engine::new(
        &config,
        store.clone() as Arc<dyn KnowledgeStore>,
        providers.clone(),
        model.clone(),
        tasks,
    )
    .unwrap();

    Harness {
        engine,
        store,
        providers,
        model,
    }
}

pub const REPO_URL: &str = "https://github.com/acme/widgets";

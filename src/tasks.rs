//! Bounded background task queue.
//!
//! Best-effort work (indexing after project creation, refreshing commits
//! after a read) is handed to a single worker over a bounded channel.
//! Submitting never waits: if the queue is full the task is dropped and a
//! warning is logged. Task failures are logged and counted, never returned
//! to whoever submitted the task.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Message {
    Run {
        name: String,
        job: BoxFuture<'static, Result<()>>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of queue activity since start.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle for submitting background tasks. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Message>,
    counters: Arc<Counters>,
}

impl TaskQueue {
    /// Spawn the worker on the current Tokio runtime.
    ///
    /// The worker exits once every handle has been dropped and the queue
    /// is drained.
    pub fn start(capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Message>(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker_counters = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run { name, job } => match job.await {
                        Ok(()) => {
                            worker_counters.completed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(task = %name, "background task finished");
                        }
                        Err(e) => {
                            worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                            let reason = format!("{:#}", e);
                            tracing::error!(task = %name, error = %reason, "background task failed");
                        }
                    },
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        (Self { tx, counters }, handle)
    }

    /// Queue `job` without waiting. Returns `false` if it was dropped.
    pub fn submit<F>(&self, name: impl Into<String>, job: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let message = Message::Run {
            name: name.clone(),
            job: job.boxed(),
        };
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = %name, "background queue full, task dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = %name, "background queue closed, task dropped");
                false
            }
        }
    }

    /// Wait until every task queued before this call has run.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

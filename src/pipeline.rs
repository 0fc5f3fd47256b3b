//! Embedding pipeline: documents in, embedding records out.
//!
//! Documents are taken from the loader stream in fixed-size batches. Each
//! batch is summarized and embedded concurrently, then persisted, before
//! the next batch is pulled, so at most `batch_size` documents are talking
//! to the model provider at any time.
//!
//! A document that cannot be summarized or embedded becomes a
//! [`DocumentOutcome::Skipped`] and never reaches the store. Store failures
//! abort the run; a row whose vector write failed is deleted first.

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde::Serialize;

use repo_harness_core::models::{NewEmbedding, SourceDocument};
use repo_harness_core::store::KnowledgeStore;
use repo_harness_core::text::strip_nul;

use crate::llm::{SummaryClient, SummaryKind};

/// Totals for one indexing run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub batches: usize,
    pub embedded: usize,
    pub skipped: usize,
}

/// Result of driving one document through summarize and embed.
#[derive(Debug)]
pub enum DocumentOutcome {
    Embedded {
        file_name: String,
        source_code: String,
        summary: String,
        vector: Vec<f32>,
    },
    Skipped {
        path: String,
        reason: String,
    },
}

pub struct EmbeddingPipeline {
    store: Arc<dyn KnowledgeStore>,
    summaries: Arc<SummaryClient>,
    batch_size: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        summaries: Arc<SummaryClient>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            summaries,
            batch_size: batch_size.max(1),
        }
    }

    /// Summarize, embed and persist every document for `project_id`.
    ///
    /// Existing records for the same paths are not consulted; running this
    /// twice stores each file twice.
    pub async fn run<S>(&self, project_id: &str, documents: S) -> Result<IndexReport>
    where
        S: Stream<Item = SourceDocument> + Send,
    {
        let mut report = IndexReport::default();
        let mut batches = Box::pin(documents.chunks(self.batch_size));

        while let Some(batch) = batches.next().await {
            report.batches += 1;
            report.documents += batch.len();

            let outcomes = join_all(batch.into_iter().map(|doc| self.process(doc))).await;

            for outcome in outcomes {
                match outcome {
                    DocumentOutcome::Embedded {
                        file_name,
                        source_code,
                        summary,
                        vector,
                    } => {
                        let id = self
                            .store
                            .insert_embedding(&NewEmbedding {
                                project_id: project_id.to_string(),
                                file_name,
                                source_code,
                                summary,
                            })
                            .await?;
                        if let Err(e) = self.store.attach_embedding_vector(&id, &vector).await {
                            // A row without its vector must not outlive the run.
                            if let Err(cleanup) = self.store.delete_embedding(&id).await {
                                tracing::error!(id = %id, error = %cleanup, "failed to remove embedding row without vector");
                            }
                            return Err(e.context(format!("Failed to attach embedding vector to {}", id)));
                        }
                        report.embedded += 1;
                    }
                    DocumentOutcome::Skipped { path, reason } => {
                        tracing::warn!(project_id, path = %path, reason = %reason, "document skipped");
                        report.skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            project_id,
            documents = report.documents,
            batches = report.batches,
            embedded = report.embedded,
            skipped = report.skipped,
            "indexing complete"
        );
        Ok(report)
    }

    async fn process(&self, doc: SourceDocument) -> DocumentOutcome {
        let summary = self
            .summaries
            .summarize(&doc.raw_content, SummaryKind::File { path: &doc.path })
            .await;
        if summary.trim().is_empty() {
            return DocumentOutcome::Skipped {
                path: doc.path,
                reason: "empty summary".to_string(),
            };
        }

        let vector = match self.summaries.embed(&summary).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                return DocumentOutcome::Skipped {
                    path: doc.path,
                    reason: "empty embedding".to_string(),
                }
            }
            Err(e) => {
                return DocumentOutcome::Skipped {
                    path: doc.path,
                    reason: format!("embedding failed: {}", e),
                }
            }
        };

        DocumentOutcome::Embedded {
            file_name: doc.path,
            source_code: strip_nul(&doc.raw_content),
            summary: strip_nul(&summary),
            vector,
        }
    }
}

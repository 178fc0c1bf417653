//! Merger (C10): the `/merge-batches` entry point (§4.10).
//!
//! Consolidates every batch table written under a job's isolated URIs
//! into the canonical collection, then optionally deletes the batches.

use std::sync::Arc;

use crate::batch_worker::BATCH_PREFIX;
use crate::config::RuntimeConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::jobstore::JobStore;
use crate::store::{DocumentMetadata, VectorStore};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub job_id: String,
    pub batches_merged: usize,
    pub total_documents: usize,
    pub batches_cleaned: usize,
    pub final_uri: String,
}

pub struct Merger {
    jobs: Arc<JobStore>,
    embedder: Arc<Embedder>,
    config: Arc<RuntimeConfig>,
}

impl Merger {
    pub fn new(jobs: Arc<JobStore>, embedder: Arc<Embedder>, config: Arc<RuntimeConfig>) -> Self {
        Self { jobs, embedder, config }
    }

    /// `/merge-batches` (§6.1) is addressed by `collection_name`, not
    /// `job_id`; this resolves it to the most recently started job against
    /// that collection before delegating to `merge_batches`.
    pub async fn merge_latest_for_collection(&self, collection_name: &str, cleanup: bool) -> Result<MergeResult> {
        let job_id = self
            .jobs
            .list_jobs(None, None, 500)?
            .into_iter()
            .find(|j| j.collection_name == collection_name)
            .map(|j| j.job_id)
            .ok_or_else(|| Error::JobStoreError(format!("no job found for collection '{collection_name}'")))?;
        self.merge_batches(&job_id, cleanup).await
    }

    /// Enumerates the job's SubJobs (their ids already pin each batch's
    /// isolated URI) rather than listing storage by prefix — this crate has
    /// no grounded `object_store` prefix-listing usage, and the JobStore
    /// already tracks every batch deterministically, so it is the source of
    /// truth for "which batches exist" instead of a storage scan.
    pub async fn merge_batches(&self, job_id: &str, cleanup: bool) -> Result<MergeResult> {
        let with_sub_jobs = self
            .jobs
            .get_job_with_sub_jobs(job_id)?
            .ok_or_else(|| Error::JobStoreError(format!("job '{job_id}' not found")))?;

        let canonical_uri = self.config.base_uri();
        let collection_name = with_sub_jobs.job.collection_name.clone();
        let dim = self.embedder.embedding_dimension();
        let main_store = VectorStore::open(&canonical_uri, &collection_name, dim).await?;

        if with_sub_jobs.sub_jobs.is_empty() {
            tracing::info!(job_id, "no batches found to merge");
            return Ok(MergeResult {
                job_id: job_id.to_string(),
                batches_merged: 0,
                total_documents: 0,
                batches_cleaned: 0,
                final_uri: main_store.uri().to_string(),
            });
        }

        let mut batches_merged = 0usize;
        let mut total_documents = 0usize;
        let mut batches_cleaned = 0usize;

        for sub_job in &with_sub_jobs.sub_jobs {
            let batch_id = &sub_job.sub_job_id;
            let isolated_uri = VectorStore::batch_uri(&canonical_uri, BATCH_PREFIX, &collection_name, batch_id);

            // A single bad batch must not abort the rest (§4.10).
            match self.merge_one_batch(&isolated_uri, &collection_name, dim, &main_store).await {
                Ok(count) => {
                    if count > 0 {
                        batches_merged += 1;
                        total_documents += count;
                        tracing::info!(job_id, batch_id, documents = count, "merged batch");
                    }
                    if cleanup && cleanup_local_batch(&isolated_uri) {
                        batches_cleaned += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, batch_id, error = %e, "failed to merge batch, skipping");
                }
            }
        }

        Ok(MergeResult {
            job_id: job_id.to_string(),
            batches_merged,
            total_documents,
            batches_cleaned,
            final_uri: main_store.uri().to_string(),
        })
    }

    async fn merge_one_batch(
        &self,
        isolated_uri: &str,
        collection_name: &str,
        dim: usize,
        main_store: &VectorStore,
    ) -> Result<usize> {
        let batch_store = VectorStore::open(isolated_uri, collection_name, dim).await?;
        let rows = batch_store.get_documents(None, None, None).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let documents: Vec<String> = rows.iter().map(|r| r.text.clone()).collect();
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let embeddings: Vec<Vec<f32>> = rows.iter().map(|r| r.vector.clone()).collect();
        let metadatas: Vec<DocumentMetadata> = rows
            .iter()
            .map(|r| DocumentMetadata {
                file_path: Some(r.file_path.clone()),
                section: Some(r.section.clone()),
                chunk_index: Some(r.chunk_index),
                total_chunks: Some(r.total_chunks),
                source: Some(r.source.clone()),
                format: Some(r.format.clone()),
                timestamp: Some(r.timestamp.clone()),
            })
            .collect();

        let count = documents.len();
        // Ids and vectors carry over unchanged; no re-embedding on merge.
        main_store.add_documents(&documents, Some(&metadatas), Some(ids), Some(embeddings), &self.embedder).await?;
        Ok(count)
    }
}

/// Deletes a batch's on-disk table after a successful merge. Only handles
/// local filesystem URIs; a `gs://` base has no grounded `object_store`
/// deletion path in this crate's dependency stack, so cleanup is skipped
/// (and logged) for object-store-backed deployments.
fn cleanup_local_batch(isolated_uri: &str) -> bool {
    if isolated_uri.starts_with("gs://") || isolated_uri.contains("://") {
        tracing::warn!(uri = isolated_uri, "skipping batch cleanup: not a local path");
        return false;
    }
    match std::fs::remove_dir_all(isolated_uri) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(uri = isolated_uri, error = %e, "failed to clean up batch directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_skips_object_store_uris() {
        assert!(!cleanup_local_batch("gs://bucket/lancedb_batch_docs_job_0000"));
    }

    #[test]
    fn cleanup_reports_failure_on_missing_local_dir() {
        assert!(!cleanup_local_batch("/nonexistent/for/sure/lancedb_batch_docs_job_0000"));
    }
}

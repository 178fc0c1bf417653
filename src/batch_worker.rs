//! BatchWorker (C9): the `/ingest-batch` entry point (§4.9).
//!
//! Each batch writes into its own isolated LanceDB table so parallel
//! batches never contend on the same rows; `/merge-batches` (C10)
//! consolidates them into the canonical collection afterward.

use std::path::Path;
use std::sync::Arc;

use crate::chunking::ChunkerConfig;
use crate::config::RuntimeConfig;
use crate::embed::Embedder;
use crate::error::Result;
use crate::jobstore::{JobStats, JobStore};
use crate::orchestrator::process_file;
use crate::parsers::ParserRegistry;
use crate::sources::{SourceConfig, SourceRegistry};
use crate::store::VectorStore;

/// Fixed prefix reserved for per-batch isolated tables (§6.3); MUST NOT be
/// used as a canonical collection name.
pub const BATCH_PREFIX: &str = "lancedb_batch_";

#[derive(Debug, Clone)]
pub struct BatchPayload {
    pub job_id: Option<String>,
    pub batch_id: Option<String>,
    pub start_index: usize,
    pub end_index: usize,
    pub collection_name: String,
    pub source: String,
    pub file_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_id: String,
    pub skipped: bool,
    pub successful: usize,
    pub failed: usize,
}

pub struct BatchWorker {
    sources: Arc<SourceRegistry>,
    jobs: Arc<JobStore>,
    embedder: Arc<Embedder>,
    config: Arc<RuntimeConfig>,
}

impl BatchWorker {
    pub fn new(sources: Arc<SourceRegistry>, jobs: Arc<JobStore>, embedder: Arc<Embedder>, config: Arc<RuntimeConfig>) -> Self {
        Self { sources, jobs, embedder, config }
    }

    /// §4.9: look up and run the batch, updating its SubJob (if any) on the
    /// way out. A worker-fatal error (store open failure, idempotency probe
    /// failure) marks the SubJob failed; per-file failures do not.
    pub async fn process_batch(&self, payload: BatchPayload) -> Result<BatchResult> {
        let batch_id = payload.batch_id.clone().unwrap_or_else(|| {
            format!("{}_{}_{}", payload.start_index, payload.end_index, &uuid::Uuid::new_v4().simple().to_string()[..8])
        });

        // Sub-job ids share the task queue's `"{job_id}_{i:04}"` batch_id
        // convention (§3.1/§4.7), so the same id resolves both.
        let sub_job = match &payload.job_id {
            Some(_) => self.jobs.get_sub_job(&batch_id)?,
            None => None,
        };
        if let Some(ref sj) = sub_job {
            self.jobs.mark_sub_job_running(&sj.sub_job_id)?;
        }

        match self.run(&payload, &batch_id).await {
            Ok((result, stats)) => {
                if let Some(ref sj) = sub_job {
                    self.jobs.mark_sub_job_completed(&sj.sub_job_id, stats)?;
                }
                Ok(result)
            }
            Err(e) => {
                if let Some(ref sj) = sub_job {
                    let _ = self.jobs.mark_sub_job_failed(&sj.sub_job_id, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run(&self, payload: &BatchPayload, batch_id: &str) -> Result<(BatchResult, JobStats)> {
        let source = self.sources.by_collection(&payload.collection_name).cloned();
        let isolated_uri = VectorStore::batch_uri(&self.config.base_uri(), BATCH_PREFIX, &payload.collection_name, batch_id);
        let dim = self.embedder.embedding_dimension();
        let store = VectorStore::open(&isolated_uri, &payload.collection_name, dim).await?;

        let file_count = payload.file_list.len();

        // Idempotency check (§4.9 step 4): a redelivered task finds its
        // isolated table already populated and skips reprocessing.
        if store.get_document_count().await? > 0 {
            tracing::info!(batch_id, "batch already processed, skipping (idempotent)");
            let stats = JobStats {
                total_files: file_count as u64,
                processed_files: file_count as u64,
                failed_files: 0,
                total_chunks: 0,
                total_documents: file_count as u64,
            };
            return Ok((BatchResult { batch_id: batch_id.to_string(), skipped: true, successful: file_count, failed: 0 }, stats));
        }

        let parsers = ParserRegistry::new();
        let chunker_config = ChunkerConfig::default();
        let source = source.unwrap_or_else(|| SourceConfig {
            name: payload.source.clone(),
            collection_name: payload.collection_name.clone(),
            object_prefix: String::new(),
            supported_formats: Vec::new(),
            description: String::new(),
            local_path: String::new(),
        });

        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut total_chunks = 0usize;
        for relative_path in &payload.file_list {
            let absolute_path = Path::new(&source.local_path).join(relative_path);
            match process_file(&parsers, chunker_config, &self.embedder, &store, &source, &absolute_path, relative_path).await
            {
                Ok(chunk_count) => {
                    successful += 1;
                    total_chunks += chunk_count;
                }
                Err(e) => {
                    tracing::warn!(batch_id, file = relative_path.as_str(), error = %e, "batch file failed");
                    failed += 1;
                }
            }
        }

        let stats = JobStats {
            total_files: file_count as u64,
            processed_files: successful as u64,
            failed_files: failed as u64,
            total_chunks: total_chunks as u64,
            total_documents: successful as u64,
        };
        Ok((BatchResult { batch_id: batch_id.to_string(), skipped: false, successful, failed }, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_id_matches_start_end_and_random_suffix_shape() {
        let payload = BatchPayload {
            job_id: None,
            batch_id: None,
            start_index: 0,
            end_index: 100,
            collection_name: "thoth_documents".to_string(),
            source: "handbook".to_string(),
            file_list: vec![],
        };
        let generated = payload.batch_id.clone().unwrap_or_else(|| {
            format!("{}_{}_{}", payload.start_index, payload.end_index, &uuid::Uuid::new_v4().simple().to_string()[..8])
        });
        assert!(generated.starts_with("0_100_"));
        assert_eq!(generated.len(), "0_100_".len() + 8);
    }

    #[test]
    fn batch_prefix_is_reserved_and_non_empty() {
        assert_eq!(BATCH_PREFIX, "lancedb_batch_");
    }
}

//! Orchestrator (C8): the `/ingest` entry point (§4.8).
//!
//! Validates the source, creates a parent Job, and returns immediately —
//! the actual discovery/fan-out work runs in a detached task, matching the
//! original's `asyncio.create_task(_run_ingestion_job(...))` shape.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::chunking::{Chunk, ChunkerConfig, MarkdownChunker};
use crate::config::RuntimeConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::incremental::IncrementalEngine;
use crate::jobstore::{Job, JobStats, JobStore};
use crate::parsers::ParserRegistry;
use crate::snapshot::SnapshotProvider;
use crate::sources::{SourceConfig, SourceRegistry};
use crate::store::{DocumentMetadata, VectorStore};
use crate::taskqueue::TaskQueue;

pub struct Orchestrator {
    sources: Arc<SourceRegistry>,
    jobs: Arc<JobStore>,
    snapshots: Arc<dyn SnapshotProvider>,
    embedder: Arc<Embedder>,
    config: Arc<RuntimeConfig>,
    incremental: Arc<IncrementalEngine>,
}

impl Orchestrator {
    pub fn new(
        sources: Arc<SourceRegistry>,
        jobs: Arc<JobStore>,
        snapshots: Arc<dyn SnapshotProvider>,
        embedder: Arc<Embedder>,
        config: Arc<RuntimeConfig>,
        incremental: Arc<IncrementalEngine>,
    ) -> Self {
        Self { sources, jobs, snapshots, embedder, config, incremental }
    }

    /// §4.8 steps 1-3: validate, create the parent Job, mark it `running`,
    /// and hand the rest of the work to a detached task. The caller gets
    /// `job_id` back before any file has been touched.
    pub fn ingest(self: &Arc<Self>, source_name: &str, force: bool, task_queue: Arc<TaskQueue>) -> Result<Job> {
        let source = self
            .sources
            .get(source_name)
            .ok_or_else(|| Error::BadSource { name: source_name.to_string(), valid: self.sources.list_sources() })?
            .clone();

        let job = self.jobs.create_job(&source.name, &source.collection_name)?;

        let this = Arc::clone(self);
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_ingestion_job(&job_id, &source, force, task_queue).await {
                tracing::error!(job_id = %job_id, source = %source.name, error = %e, "ingestion job failed");
                let _ = this.jobs.mark_failed(&job_id, &e.to_string());
            }
        });

        Ok(job)
    }

    async fn run_ingestion_job(
        &self,
        job_id: &str,
        source: &SourceConfig,
        force: bool,
        task_queue: Arc<TaskQueue>,
    ) -> Result<()> {
        tracing::info!(job_id, source = %source.name, collection = %source.collection_name, "starting ingestion job");
        self.jobs.mark_running(job_id)?;

        // Incremental sync (§4.11) only applies to the direct, no-task-queue
        // path, matching the original's `pipeline.run(incremental=not force)`
        // fallback — batched/queued runs always discover and enqueue the
        // full file set regardless of `force`.
        if !task_queue.is_configured() && !force {
            tracing::info!(job_id, "task queue not configured, running incremental sync");
            let stats = self.run_incremental(job_id, source).await?;
            self.jobs.mark_completed(job_id, stats)?;
            return Ok(());
        }

        let file_list = self.discover_files(source, force)?;

        if file_list.is_empty() {
            tracing::warn!(job_id, "no files found to process");
            self.jobs.mark_completed(job_id, JobStats::default())?;
            return Ok(());
        }
        tracing::info!(job_id, total_files = file_list.len(), "found files to process");

        if !task_queue.is_configured() {
            tracing::warn!(job_id, "task queue not configured, falling back to direct processing");
            let stats = self.run_direct(job_id, source, &file_list).await?;
            self.jobs.mark_completed(job_id, stats)?;
            return Ok(());
        }

        let batch_size = self.config.batch_size.max(1);
        let total_files = file_list.len();
        let num_batches = total_files.div_ceil(batch_size);

        self.jobs.set_total_batches(job_id, num_batches as i64)?;
        self.jobs.update_stats(job_id, JobStats { total_files: total_files as u64, ..Default::default() })?;

        let job = self
            .jobs
            .get_job(job_id)?
            .ok_or_else(|| Error::JobStoreError(format!("job '{job_id}' vanished mid-flight")))?;
        for i in 0..num_batches {
            let start = i * batch_size;
            let end = (start + batch_size).min(total_files);
            self.jobs.create_sub_job(&job, i as i64, (end - start) as u64)?;
        }

        let enqueue_result =
            task_queue.enqueue_batches(job_id, &file_list, &source.collection_name, &source.name, batch_size).await;
        tracing::info!(
            job_id,
            num_batches = enqueue_result.num_batches,
            enqueued = enqueue_result.enqueued,
            failed = enqueue_result.failed,
            "batches enqueued"
        );
        // The parent Job stays `running`; a terminal status is written by
        // the merge step (§4.10) or the last completing batch, not here.
        Ok(())
    }

    /// §4.8 step 4: see `resolve_discovery` for the empty-vs-error handling.
    fn discover_files(&self, source: &SourceConfig, _force: bool) -> Result<Vec<String>> {
        Ok(resolve_discovery(self.snapshots.list_files(source), source))
    }

    async fn run_direct(&self, job_id: &str, source: &SourceConfig, file_list: &[String]) -> Result<JobStats> {
        let parsers = ParserRegistry::new();
        let chunker_config = ChunkerConfig::default();
        let store = VectorStore::open(&self.config.base_uri(), &source.collection_name, self.embedder.embedding_dimension())
            .await?;

        let mut stats = JobStats { total_files: file_list.len() as u64, ..Default::default() };
        for relative_path in file_list {
            let absolute_path = Path::new(&source.local_path).join(relative_path);
            match process_file(&parsers, chunker_config, &self.embedder, &store, source, &absolute_path, relative_path)
                .await
            {
                Ok(chunk_count) => {
                    stats.processed_files += 1;
                    stats.total_chunks += chunk_count as u64;
                    stats.total_documents += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id, file = relative_path, error = %e, "file processing failed");
                    stats.failed_files += 1;
                }
            }
        }
        Ok(stats)
    }

    /// §4.11: diff `source` against its last recorded commit and apply only
    /// the delta, instead of reprocessing every file.
    async fn run_incremental(&self, job_id: &str, source: &SourceConfig) -> Result<JobStats> {
        let store = VectorStore::open(&self.config.base_uri(), &source.collection_name, self.embedder.embedding_dimension())
            .await?;
        let summary = self.incremental.sync(source, &store, &self.embedder).await?;
        tracing::info!(
            job_id,
            added = summary.added,
            modified = summary.modified,
            deleted = summary.deleted,
            failed = summary.failed,
            "incremental sync complete"
        );
        Ok(JobStats {
            total_files: (summary.added + summary.modified + summary.deleted + summary.failed) as u64,
            processed_files: (summary.added + summary.modified + summary.deleted) as u64,
            failed_files: summary.failed as u64,
            total_chunks: summary.total_chunks,
            total_documents: summary.total_documents,
        })
    }
}

/// Parse, chunk, embed, and upsert one file into `store`. Shared by the
/// Orchestrator's direct path and the BatchWorker's per-file loop (§4.9
/// step 5), since both apply the same C1→C2→C3→C4 sequence.
pub(crate) async fn process_file(
    parsers: &ParserRegistry,
    chunker_config: ChunkerConfig,
    embedder: &Embedder,
    store: &VectorStore,
    source: &SourceConfig,
    absolute_path: &Path,
    relative_path: &str,
) -> Result<usize> {
    let parsed = parsers.parse(absolute_path)?;
    let chunker = MarkdownChunker::new(chunker_config);
    let chunks: Vec<Chunk> = chunker.chunk(&parsed.content, relative_path);

    if chunks.is_empty() {
        return Ok(0);
    }

    let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    let metadatas: Vec<DocumentMetadata> = chunks
        .iter()
        .map(|c| DocumentMetadata {
            file_path: Some(relative_path.to_string()),
            section: Some(c.headers.join(" > ")),
            chunk_index: Some(c.chunk_index as i64),
            total_chunks: Some(c.total_chunks as i64),
            source: Some(source.name.clone()),
            format: Some(parsed.format.clone()),
            timestamp: Some(c.timestamp.clone()),
        })
        .collect();

    let total = chunks.len();
    store.add_documents(&contents, Some(&metadatas), Some(ids), None, embedder).await?;
    Ok(total)
}

/// Walks `source.local_path` for files whose extension the source admits,
/// returning paths relative to that root (mirrors `LocalSnapshotProvider`'s
/// own walk, kept independent so a non-filesystem `SnapshotProvider` still
/// has a usable local fallback).
fn local_discover(source: &SourceConfig) -> Vec<String> {
    let root = PathBuf::from(&source.local_path);
    if !root.exists() {
        return Vec::new();
    }

    let mut files: Vec<String> = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let path = e.path();
            let ext = format!(".{}", path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default());
            if !source.supports_format(&ext) {
                return None;
            }
            Some(path.strip_prefix(&root).unwrap_or(path).to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

/// §4.8 steps 4-5 decision: an `Ok` listing is authoritative, empty or not
/// (an empty source completes with zero stats rather than being retried
/// against the filesystem); only an `Err` falls back to `local_discover`.
fn resolve_discovery(listed: Result<Vec<String>>, source: &SourceConfig) -> Vec<String> {
    match listed {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(source = %source.name, error = %e, "snapshot provider failed to list files, falling back to local scan");
            local_discover(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(local_path: &str) -> SourceConfig {
        SourceConfig {
            name: "test-source".to_string(),
            collection_name: "test_documents".to_string(),
            object_prefix: "test".to_string(),
            supported_formats: vec![".md".to_string()],
            description: String::new(),
            local_path: local_path.to_string(),
        }
    }

    #[test]
    fn local_discover_filters_by_extension_and_sorts() {
        let dir = std::env::temp_dir().join(format!("thoth_orch_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("b")).unwrap();
        std::fs::write(dir.join("b/two.md"), "two").unwrap();
        std::fs::write(dir.join("one.md"), "one").unwrap();
        std::fs::write(dir.join("ignore.bin"), "nope").unwrap();

        let files = local_discover(&source(dir.to_str().unwrap()));
        assert_eq!(files, vec!["b/two.md".to_string(), "one.md".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn local_discover_on_missing_root_is_empty() {
        let files = local_discover(&source("/nonexistent/path/for/sure"));
        assert!(files.is_empty());
    }

    #[test]
    fn resolve_discovery_trusts_a_legitimately_empty_listing() {
        let files = resolve_discovery(Ok(Vec::new()), &source("/nonexistent/path/for/sure"));
        assert!(files.is_empty(), "an empty Ok listing must not fall back to a local scan");
    }

    #[test]
    fn resolve_discovery_falls_back_to_local_scan_only_on_error() {
        let dir = std::env::temp_dir().join(format!("thoth_orch_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("one.md"), "one").unwrap();

        let files = resolve_discovery(Err(Error::FatalInternal("listing unavailable".to_string())), &source(dir.to_str().unwrap()));
        assert_eq!(files, vec!["one.md".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }
}

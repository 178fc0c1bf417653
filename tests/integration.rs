//! End-to-end integration tests crossing module boundaries: parse, chunk,
//! embed, and store a real document, then drive a full ingestion job
//! through the Orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::tempdir;
use thoth_core::batch_worker::BATCH_PREFIX;
use thoth_core::chunking::{ChunkerConfig, MarkdownChunker};
use thoth_core::config::RuntimeConfig;
use thoth_core::embed::Embedder;
use thoth_core::incremental::IncrementalEngine;
use thoth_core::jobstore::{JobStatus, JobStore};
use thoth_core::merger::Merger;
use thoth_core::orchestrator::Orchestrator;
use thoth_core::parsers::ParserRegistry;
use thoth_core::snapshot::LocalSnapshotProvider;
use thoth_core::sources::{SourceConfig, SourceRegistry};
use thoth_core::store::{DocumentMetadata, Scalar, Term, VectorRecord, VectorStore};
use thoth_core::taskqueue::TaskQueue;

fn local_source(name: &str, local_path: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        collection_name: format!("{name}_documents"),
        object_prefix: name.to_string(),
        supported_formats: vec![".md".to_string()],
        description: String::new(),
        local_path: local_path.to_string(),
    }
}

fn row(id: &str, file_path: &str) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        text: format!("content for {id}"),
        vector: vec![0.1, 0.2, 0.3],
        file_path: file_path.to_string(),
        section: String::new(),
        chunk_index: 0,
        total_chunks: 1,
        source: "test".to_string(),
        format: "markdown".to_string(),
        timestamp: String::new(),
    }
}

#[tokio::test]
async fn parse_chunk_embed_store_roundtrip() {
    let dir = tempdir().expect("failed to create temp dir");

    let markdown = "# Rust\n\nRust is a systems programming language focused on safety and performance.\n\n## Ownership\n\nOwnership is Rust's central feature for managing memory without a garbage collector.\n";
    let doc_path = dir.path().join("rust.md");
    std::fs::write(&doc_path, markdown).expect("failed to write fixture");

    let parsers = ParserRegistry::new();
    let parsed = parsers.parse(&doc_path).expect("failed to parse");

    let chunker = MarkdownChunker::new(ChunkerConfig::default());
    let chunks = chunker.chunk(&parsed.content, "rust.md");
    assert!(!chunks.is_empty(), "chunker should produce at least one chunk");
    assert!(chunks.iter().any(|c| c.headers.contains(&"Ownership".to_string())));

    let embedder = Embedder::new().expect("failed to load embedder");
    let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

    let store = VectorStore::open(dir.path().join("lancedb").to_str().unwrap(), "rust_docs", embedder.embedding_dimension())
        .await
        .expect("failed to open store");
    store.add_documents(&contents, None, Some(ids), None, &embedder).await.expect("failed to add documents");

    assert_eq!(store.get_document_count().await.unwrap(), chunks.len());

    let hits = store
        .search_similar("How does Rust manage memory?", 5, None, None, &embedder)
        .await
        .expect("search failed");
    assert!(!hits.is_empty(), "should find at least one result");
    assert!(hits[0].0.text.to_lowercase().contains("ownership") || hits[0].0.text.to_lowercase().contains("rust"));
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let dir = tempdir().expect("failed to create temp dir");
    let embedder = Embedder::new().expect("failed to load embedder");
    let store = VectorStore::open(dir.path().to_str().unwrap(), "upsert_test", embedder.embedding_dimension())
        .await
        .expect("failed to open store");

    let docs = vec!["doc x".to_string(), "doc y".to_string(), "doc z".to_string()];
    let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];

    store.add_documents(&docs, None, Some(ids.clone()), None, &embedder).await.unwrap();
    store.add_documents(&docs, None, Some(ids.clone()), None, &embedder).await.unwrap();

    assert_eq!(store.get_document_count().await.unwrap(), 3);
    let fetched = store.get_documents(Some(&ids), None, None).await.unwrap();
    assert_eq!(fetched.len(), 3);
}

#[tokio::test]
async fn delete_by_file_path_removes_only_matching_rows() {
    let dir = tempdir().expect("failed to create temp dir");
    let embedder = Embedder::new().expect("failed to load embedder");
    let store = VectorStore::open(dir.path().to_str().unwrap(), "delete_test", embedder.embedding_dimension())
        .await
        .expect("failed to open store");

    let a_rows: Vec<VectorRecord> = (0..5).map(|i| row(&format!("a{i}"), "a.md")).collect();
    let b_rows: Vec<VectorRecord> = (0..2).map(|i| row(&format!("b{i}"), "b.md")).collect();

    for rows in [&a_rows, &b_rows] {
        let docs: Vec<String> = rows.iter().map(|r| r.text.clone()).collect();
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let metas: Vec<DocumentMetadata> =
            rows.iter().map(|r| DocumentMetadata { file_path: Some(r.file_path.clone()), ..Default::default() }).collect();
        store.add_documents(&docs, Some(&metas), Some(ids), None, &embedder).await.unwrap();
    }

    assert_eq!(store.get_document_count().await.unwrap(), 7);

    let deleted = store.delete_by_file_path("a.md").await.unwrap();
    assert_eq!(deleted, 5);
    assert_eq!(store.get_document_count().await.unwrap(), 2);

    let where_a = HashMap::from([("file_path".to_string(), Term::Value(Scalar::Str("a.md".to_string())))]);
    let remaining = store.get_documents(None, Some(&where_a), None).await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn orchestrator_ingest_runs_incremental_sync_to_completion() {
    let corpus_dir = tempdir().expect("failed to create corpus dir");
    let data_dir = tempdir().expect("failed to create data dir");

    std::fs::write(corpus_dir.path().join("intro.md"), "# Intro\n\nWelcome to the handbook.\n").unwrap();
    std::fs::write(corpus_dir.path().join("setup.md"), "# Setup\n\nInstall the toolchain first.\n").unwrap();

    let mut sources = SourceRegistry::new();
    sources.register(local_source("itest", corpus_dir.path().to_str().unwrap()));
    let sources = Arc::new(sources);

    let jobs = Arc::new(JobStore::open_in_memory().expect("failed to open job store"));
    let embedder = Arc::new(Embedder::new().expect("failed to load embedder"));

    let config = Arc::new(RuntimeConfig {
        local_data_dir: data_dir.path().to_str().unwrap().to_string(),
        ..RuntimeConfig::default()
    });

    let snapshots = Arc::new(LocalSnapshotProvider::new(data_dir.path().join("snapshots")));
    let incremental = Arc::new(IncrementalEngine::new(snapshots.clone(), data_dir.path().join("ingestion_state")));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sources),
        Arc::clone(&jobs),
        snapshots,
        Arc::clone(&embedder),
        Arc::clone(&config),
        incremental,
    ));

    // No BATCH_WORKER_URL/TASK_QUEUE_NAME set, so this in-process handler is
    // never actually invoked: the orchestrator's no-task-queue path runs the
    // incremental sync directly instead of fanning out batches.
    let task_queue = Arc::new(TaskQueue::in_process(Arc::new(|_task| Box::pin(async { true }))));

    let job = orchestrator.ingest("itest", false, task_queue).expect("ingest should accept the source");

    let completed = wait_for_terminal(&jobs, &job.job_id).await;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.stats.processed_files, 2);
    assert_eq!(completed.stats.failed_files, 0);
    assert!(completed.stats.total_chunks >= 2);
}

#[tokio::test]
async fn merge_batches_consolidates_isolated_batch_tables() {
    // S5: two isolated batch tables, each with real vectors (not re-embedded
    // on merge), consolidate into the canonical collection.
    let data_dir = tempdir().expect("failed to create data dir");
    let embedder = Arc::new(Embedder::new().expect("failed to load embedder"));
    let dim = embedder.embedding_dimension();

    let jobs = Arc::new(JobStore::open_in_memory().expect("failed to open job store"));
    let job = jobs.create_job("itest", "merge_test_documents").expect("failed to create job");
    let sub_job_a = jobs.create_sub_job(&job, 0, 2).expect("failed to create sub job");
    let sub_job_b = jobs.create_sub_job(&job, 1, 1).expect("failed to create sub job");

    let config = Arc::new(RuntimeConfig { local_data_dir: data_dir.path().to_str().unwrap().to_string(), ..RuntimeConfig::default() });
    let base_uri = config.base_uri();

    for (sub_job, docs) in [(&sub_job_a, vec!["batch a doc one", "batch a doc two"]), (&sub_job_b, vec!["batch b doc one"])] {
        let isolated_uri = VectorStore::batch_uri(&base_uri, BATCH_PREFIX, &job.collection_name, &sub_job.sub_job_id);
        let store = VectorStore::open(&isolated_uri, &job.collection_name, dim).await.expect("failed to open batch store");
        let contents: Vec<String> = docs.iter().map(|s| s.to_string()).collect();
        store.add_documents(&contents, None, None, None, &embedder).await.expect("failed to seed batch store");
    }

    let merger = Merger::new(Arc::clone(&jobs), Arc::clone(&embedder), Arc::clone(&config));
    let result = merger.merge_batches(&job.job_id, true).await.expect("merge should succeed");

    assert_eq!(result.batches_merged, 2);
    assert_eq!(result.total_documents, 3);

    let main_store = VectorStore::open(&base_uri, &job.collection_name, dim).await.expect("failed to open canonical store");
    assert_eq!(main_store.get_document_count().await.unwrap(), 3);

    let rows = main_store.get_documents(None, None, None).await.unwrap();
    assert!(rows.iter().all(|r| r.vector.len() == dim), "merged rows must carry real vectors forward, not empty ones");
}

async fn wait_for_terminal(jobs: &JobStore, job_id: &str) -> thoth_core::jobstore::Job {
    for _ in 0..200 {
        if let Some(job) = jobs.get_job(job_id).unwrap() {
            if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                return job;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("job '{job_id}' did not reach a terminal state in time");
}

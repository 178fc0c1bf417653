//! HTTP server module (§6.1, §10.4).

mod routes;
mod state;

pub use state::AppState;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::batch_worker::BatchWorker;
use crate::config::RuntimeConfig;
use crate::embed::Embedder;
use crate::incremental::IncrementalEngine;
use crate::jobstore::JobStore;
use crate::merger::Merger;
use crate::orchestrator::Orchestrator;
use crate::snapshot::{LocalSnapshotProvider, SnapshotProvider};
use crate::sources::SourceRegistry;
use crate::taskqueue::TaskQueue;
use routes::create_router;

/// Assembles the shared process state and serves the HTTP control-plane
/// surface of §6.1. The detached background work lives in the
/// Orchestrator's own `tokio::spawn`ed task (§9), not a polling worker.
pub async fn run_server(config: RuntimeConfig) -> Result<()> {
    let config = Arc::new(config);
    let sources = Arc::new(SourceRegistry::new());
    let embedder = Arc::new(Embedder::new().context("failed to load embedding model")?);

    let jobs_db_path = std::path::Path::new(&config.local_data_dir).join("jobs.db");
    std::fs::create_dir_all(&config.local_data_dir).context("failed to create local data directory")?;
    let jobs = Arc::new(JobStore::open(jobs_db_path.to_str().context("non-utf8 data dir path")?)?);

    let snapshots: Arc<dyn SnapshotProvider> =
        Arc::new(LocalSnapshotProvider::new(std::path::Path::new(&config.local_data_dir).join("snapshots")));
    let incremental = Arc::new(IncrementalEngine::new(
        Arc::clone(&snapshots),
        std::path::Path::new(&config.local_data_dir).join("ingestion_state"),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sources),
        Arc::clone(&jobs),
        Arc::clone(&snapshots),
        Arc::clone(&embedder),
        Arc::clone(&config),
        Arc::clone(&incremental),
    ));

    let batch_worker =
        Arc::new(BatchWorker::new(Arc::clone(&sources), Arc::clone(&jobs), Arc::clone(&embedder), Arc::clone(&config)));

    // In-process fallback dispatch, used whenever BATCH_WORKER_URL/TASK_QUEUE_NAME
    // are unset: the orchestrator's fan-out calls straight into the same
    // BatchWorker instance instead of round-tripping through HTTP.
    let fallback_worker = Arc::clone(&batch_worker);
    let task_queue = Arc::new(TaskQueue::from_config(
        &config,
        Arc::new(move |task: crate::taskqueue::BatchTask| {
            let worker = Arc::clone(&fallback_worker);
            Box::pin(async move {
                let payload = crate::batch_worker::BatchPayload {
                    job_id: Some(task.job_id),
                    batch_id: Some(task.batch_id),
                    start_index: task.start_index,
                    end_index: task.end_index,
                    collection_name: task.collection_name,
                    source: task.source,
                    file_list: task.file_list.unwrap_or_default(),
                };
                worker.process_batch(payload).await.is_ok()
            })
        }),
    ));

    let merger = Arc::new(Merger::new(Arc::clone(&jobs), Arc::clone(&embedder), Arc::clone(&config)));

    let bind_port = config.bind_port;
    let state = Arc::new(AppState {
        sources,
        jobs,
        snapshots,
        embedder,
        config,
        orchestrator,
        task_queue,
        batch_worker,
        merger,
        incremental,
    });

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{bind_port}"))
        .await
        .with_context(|| format!("failed to bind 0.0.0.0:{bind_port}"))?;
    tracing::info!(port = bind_port, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

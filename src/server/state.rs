//! Server application state

use std::sync::Arc;

use crate::batch_worker::BatchWorker;
use crate::config::RuntimeConfig;
use crate::embed::Embedder;
use crate::incremental::IncrementalEngine;
use crate::jobstore::JobStore;
use crate::merger::Merger;
use crate::orchestrator::Orchestrator;
use crate::snapshot::SnapshotProvider;
use crate::sources::SourceRegistry;
use crate::taskqueue::TaskQueue;

/// Shared application state for all route handlers.
pub struct AppState {
    pub sources: Arc<SourceRegistry>,
    pub jobs: Arc<JobStore>,
    pub snapshots: Arc<dyn SnapshotProvider>,
    pub embedder: Arc<Embedder>,
    pub config: Arc<RuntimeConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub task_queue: Arc<TaskQueue>,
    pub batch_worker: Arc<BatchWorker>,
    pub merger: Arc<Merger>,
    pub incremental: Arc<IncrementalEngine>,
}

//! HTTP control-plane route handlers (§6.1).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::batch_worker::BatchPayload;
use crate::error::{Error, Result};
use crate::jobstore::JobStatus;
use crate::server::AppState;
use crate::taskqueue::BatchTask;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/ingest-batch", post(handle_ingest_batch))
        .route("/merge-batches", post(handle_merge_batches))
        .route("/jobs/:job_id", get(handle_get_job))
        .route("/jobs", get(handle_list_jobs))
        .route("/clone-handbook", post(handle_clone_handbook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.jobs.list_jobs(None, None, 1) {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable", "message": e.to_string() }))),
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source: String,
    #[serde(default)]
    force: bool,
}

async fn handle_ingest(State(state): State<Arc<AppState>>, Json(payload): Json<IngestRequest>) -> Result<impl IntoResponse> {
    let job = state.orchestrator.ingest(&payload.source, payload.force, Arc::clone(&state.task_queue))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "job_id": job.job_id,
            "source": job.source,
            "collection_name": job.collection_name,
        })),
    ))
}

async fn handle_ingest_batch(State(state): State<Arc<AppState>>, Json(task): Json<BatchTask>) -> Result<impl IntoResponse> {
    let BatchTask { job_id, batch_id, start_index, end_index, collection_name, source, file_list } = task;
    let payload = BatchPayload {
        job_id: Some(job_id),
        batch_id: Some(batch_id),
        start_index,
        end_index,
        collection_name,
        source,
        file_list: file_list.unwrap_or_default(),
    };
    let result = state.batch_worker.process_batch(payload).await?;
    Ok(Json(json!({
        "status": "success",
        "batch_id": result.batch_id,
        "skipped": result.skipped,
        "successful": result.successful,
        "failed": result.failed,
    })))
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    collection_name: Option<String>,
    #[serde(default = "default_cleanup")]
    cleanup: bool,
}

fn default_cleanup() -> bool {
    true
}

async fn handle_merge_batches(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MergeRequest>,
) -> Result<impl IntoResponse> {
    if !state.config.object_store_configured() {
        return Err(Error::BadRequest("object storage is not configured".to_string()));
    }
    let collection_name =
        payload.collection_name.ok_or_else(|| Error::BadRequest("collection_name is required".to_string()))?;

    let result = state.merger.merge_latest_for_collection(&collection_name, payload.cleanup).await?;
    Ok(Json(json!({
        "status": "success",
        "batches_merged": result.batches_merged,
        "total_documents": result.total_documents,
        "batches_cleaned": result.batches_cleaned,
        "final_uri": result.final_uri,
    })))
}

#[derive(Debug, Deserialize)]
struct GetJobQuery {
    #[serde(default)]
    include_sub_jobs: bool,
}

async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<GetJobQuery>,
) -> Result<impl IntoResponse> {
    if query.include_sub_jobs {
        let with_sub_jobs = state
            .jobs
            .get_job_with_sub_jobs(&job_id)?
            .ok_or_else(|| Error::FileNotFound(format!("job '{job_id}' not found")))?;
        Ok(Json(json!(with_sub_jobs)))
    } else {
        let job = state.jobs.get_job(&job_id)?.ok_or_else(|| Error::FileNotFound(format!("job '{job_id}' not found")))?;
        Ok(Json(json!(job)))
    }
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    source: Option<String>,
    status: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    50
}

async fn handle_list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let jobs = state.jobs.list_jobs(query.source.as_deref(), status, query.limit)?;
    Ok(Json(json!(jobs)))
}

fn parse_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(Error::BadRequest(format!("unrecognized status '{other}'"))),
    }
}

#[derive(Debug, Deserialize)]
struct CloneHandbookRequest {
    #[serde(default)]
    source: Option<String>,
}

/// One-time local seeding of a source's corpus, grounded on the original's
/// `clone_to_gcs`/`sync_to_local` "exists vs success" status split — this
/// crate has no grounded git-cloning or object-store-upload dependency, so
/// it reuses the `SnapshotProvider`'s own local-sync marker instead.
async fn handle_clone_handbook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CloneHandbookRequest>,
) -> Result<impl IntoResponse> {
    let source_name = payload.source.as_deref().unwrap_or("handbook");
    let source = state
        .sources
        .get(source_name)
        .ok_or_else(|| Error::BadSource { name: source_name.to_string(), valid: state.sources.list_sources() })?;

    if state.snapshots.is_locally_synced(source)? {
        return Ok(Json(json!({ "status": "exists", "source": source_name })));
    }

    state.snapshots.sync_locally(source)?;
    Ok(Json(json!({ "status": "success", "source": source_name })))
}

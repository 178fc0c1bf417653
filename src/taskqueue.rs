//! TaskQueue (C7): deliver-at-least-once dispatcher of batch tasks (§4.7).
//!
//! The reference transport is a plain HTTP POST to `{BATCH_WORKER_URL}/ingest-batch`,
//! replacing the Python original's GCP Cloud Tasks client (the queue/identity
//! machinery is cloud-specific and not part of this crate's dependency stack).
//! An in-process fallback invokes a caller-supplied handler directly, so a
//! single binary can run orchestrator, batch worker, and merger without any
//! external queue — used whenever `BATCH_WORKER_URL` is unset.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;

/// A single batch's work assignment, mirroring the original's `BatchTask`
/// dataclass field-for-field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTask {
    pub job_id: String,
    pub batch_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub collection_name: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_list: Option<Vec<String>>,
}

/// Summary of an `enqueue_batches` call, mirroring the original's result dict.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueResult {
    pub total_files: usize,
    pub batch_size: usize,
    pub num_batches: usize,
    pub enqueued: usize,
    pub failed: usize,
    pub task_names: Vec<String>,
}

/// Handler invoked by the in-process fallback for each batch. Returns `true`
/// on success; failures are counted the same way a failed HTTP delivery is.
/// Wired by the orchestrator to the actual BatchWorker entry point.
pub type BatchHandler = Arc<dyn Fn(BatchTask) -> BoxFuture<'static, bool> + Send + Sync>;

enum Transport {
    Http { batch_worker_url: String, service_account_email: Option<String>, client: reqwest::Client },
    InProcess { handler: BatchHandler },
}

pub struct TaskQueue {
    transport: Transport,
}

impl TaskQueue {
    /// Builds an HTTP-dispatching queue when `RuntimeConfig::task_queue_configured`
    /// is true, otherwise falls back to in-process dispatch via `handler`.
    pub fn from_config(config: &RuntimeConfig, handler: BatchHandler) -> Self {
        if config.task_queue_configured() {
            Self {
                transport: Transport::Http {
                    batch_worker_url: config.batch_worker_url.clone().unwrap_or_default(),
                    service_account_email: config.service_account_email.clone(),
                    client: reqwest::Client::new(),
                },
            }
        } else {
            Self { transport: Transport::InProcess { handler } }
        }
    }

    pub fn http(batch_worker_url: String, service_account_email: Option<String>) -> Self {
        Self {
            transport: Transport::Http { batch_worker_url, service_account_email, client: reqwest::Client::new() },
        }
    }

    pub fn in_process(handler: BatchHandler) -> Self {
        Self { transport: Transport::InProcess { handler } }
    }

    /// True iff this queue can actually dispatch to a remote batch worker
    /// (§4.7 `is_configured`); the in-process fallback always reports false
    /// here even though it can still run batches, since callers use this
    /// flag to decide between the direct path (§4.8 step 6) and fan-out.
    pub fn is_configured(&self) -> bool {
        matches!(self.transport, Transport::Http { .. })
    }

    pub async fn enqueue_batch(&self, task: &BatchTask) -> Option<String> {
        match &self.transport {
            Transport::Http { batch_worker_url, service_account_email, client } => {
                let url = format!("{}/ingest-batch", batch_worker_url.trim_end_matches('/'));
                let mut request = client.post(&url).json(task);
                // A full OIDC token mint requires a GCP metadata-server round
                // trip that has no grounding in this crate's dependency stack;
                // this carries the configured identity as a bearer credential
                // instead, per the simplified §4.7 reference contract.
                if let Some(email) = service_account_email {
                    request = request.bearer_auth(email);
                }
                match request.send().await {
                    Ok(response) if response.status().is_success() => Some(task.batch_id.clone()),
                    Ok(response) => {
                        tracing::warn!(batch_id = %task.batch_id, status = %response.status(), "batch dispatch rejected");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(batch_id = %task.batch_id, error = %e, "failed to enqueue batch task");
                        None
                    }
                }
            }
            Transport::InProcess { handler } => {
                if handler(task.clone()).await {
                    Some(task.batch_id.clone())
                } else {
                    None
                }
            }
        }
    }

    /// Splits `file_list` into contiguous half-open ranges of `batch_size`
    /// and enqueues one task per range (§4.7).
    pub async fn enqueue_batches(
        &self,
        job_id: &str,
        file_list: &[String],
        collection_name: &str,
        source: &str,
        batch_size: usize,
    ) -> EnqueueResult {
        let total_files = file_list.len();
        let num_batches = total_files.div_ceil(batch_size.max(1));

        let mut enqueued = 0;
        let mut failed = 0;
        let mut task_names = Vec::new();

        for i in 0..num_batches {
            let start_index = i * batch_size;
            let end_index = (start_index + batch_size).min(total_files);
            let batch = BatchTask {
                job_id: job_id.to_string(),
                batch_id: format!("{job_id}_{i:04}"),
                start_index,
                end_index,
                collection_name: collection_name.to_string(),
                source: source.to_string(),
                file_list: Some(file_list[start_index..end_index].to_vec()),
            };

            match self.enqueue_batch(&batch).await {
                Some(name) => {
                    enqueued += 1;
                    task_names.push(name);
                }
                None => failed += 1,
            }
        }

        tracing::info!(job_id, total_files, num_batches, enqueued, failed, "batch enqueueing complete");

        EnqueueResult { total_files, batch_size, num_batches, enqueued, failed, task_names }
    }
}

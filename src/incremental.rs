//! Incremental update engine (§4.11, part of C8/C9): given a source's
//! `(added, modified, deleted)` since its last known commit, applies only
//! that delta to the canonical collection instead of reprocessing
//! everything, and persists the running `IngestionState` so the next sync
//! can resume from where this one left off.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkerConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::orchestrator::process_file;
use crate::parsers::ParserRegistry;
use crate::snapshot::{FileChanges, SnapshotProvider};
use crate::sources::SourceConfig;
use crate::store::VectorStore;

/// Per-source persisted state (§3.1 `IngestionState`; §6.3 local fallback
/// file, one JSON document per source).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionState {
    pub last_commit: Option<String>,
    pub processed_files: BTreeSet<String>,
    pub failed_files: BTreeMap<String, String>,
    pub total_chunks: u64,
    pub total_documents: u64,
    pub completed: bool,
    pub start_time: Option<String>,
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncrementalSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub failed: usize,
    pub total_chunks: u64,
    pub total_documents: u64,
}

pub struct IncrementalEngine {
    snapshots: Arc<dyn SnapshotProvider>,
    state_dir: PathBuf,
}

impl IncrementalEngine {
    pub fn new(snapshots: Arc<dyn SnapshotProvider>, state_dir: impl Into<PathBuf>) -> Self {
        Self { snapshots, state_dir: state_dir.into() }
    }

    fn state_path(&self, source_name: &str) -> PathBuf {
        self.state_dir.join(format!("{source_name}.state.json"))
    }

    pub fn load_state(&self, source_name: &str) -> IngestionState {
        std::fs::read_to_string(self.state_path(source_name))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_state(&self, source_name: &str, state: &IngestionState) -> Result<()> {
        let path = self.state_path(source_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::FatalInternal(format!("failed to create {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_string_pretty(state)
            .map_err(|e| Error::FatalInternal(format!("failed to serialize ingestion state: {e}")))?;
        std::fs::write(&path, data).map_err(|e| Error::FatalInternal(format!("failed to write {}: {e}", path.display())))
    }

    /// Diffs `source` against its last recorded commit, applies the delta
    /// to `store`, and persists the updated state. Per-file failures are
    /// recorded in `failed_files` and do not abort the sync (§4.11).
    pub async fn sync(&self, source: &SourceConfig, store: &VectorStore, embedder: &Embedder) -> Result<IncrementalSummary> {
        let mut state = self.load_state(&source.name);
        if state.start_time.is_none() {
            state.start_time = Some(crate::chunking::now_iso8601());
        }

        let changes = filter_supported(source, self.snapshots.file_changes(source, state.last_commit.as_deref())?);

        let parsers = ParserRegistry::new();
        let chunker_config = ChunkerConfig::default();
        let mut summary = IncrementalSummary::default();

        for f in &changes.deleted {
            match store.delete_by_file_path(f).await {
                Ok(removed) => {
                    state.total_chunks = state.total_chunks.saturating_sub(removed as u64);
                    state.total_documents = state.total_documents.saturating_sub(1);
                    state.processed_files.remove(f);
                    state.failed_files.remove(f);
                    summary.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, file = f, error = %e, "failed to delete file from vector store");
                    state.failed_files.insert(f.clone(), e.to_string());
                    summary.failed += 1;
                }
            }
        }

        for f in &changes.modified {
            let absolute = Path::new(&source.local_path).join(f);
            match self.reingest_one(&parsers, chunker_config, embedder, store, source, &absolute, f, &mut state).await
            {
                Ok(()) => summary.modified += 1,
                Err(e) => {
                    tracing::warn!(source = %source.name, file = f, error = %e, "failed to update modified file");
                    state.failed_files.insert(f.clone(), e.to_string());
                    summary.failed += 1;
                }
            }
        }

        for f in &changes.added {
            let absolute = Path::new(&source.local_path).join(f);
            match process_file(&parsers, chunker_config, embedder, store, source, &absolute, f).await {
                Ok(chunk_count) => {
                    state.total_chunks = state.total_chunks.saturating_add(chunk_count as u64);
                    state.total_documents = state.total_documents.saturating_add(1);
                    state.processed_files.insert(f.clone());
                    state.failed_files.remove(f);
                    summary.added += 1;
                }
                Err(e) => {
                    tracing::warn!(source = %source.name, file = f, error = %e, "failed to add new file");
                    state.failed_files.insert(f.clone(), e.to_string());
                    summary.failed += 1;
                }
            }
        }

        state.last_commit = self.snapshots.current_commit(source)?.or(state.last_commit);
        state.completed = true;
        state.last_update_time = Some(crate::chunking::now_iso8601());
        summary.total_chunks = state.total_chunks;
        summary.total_documents = state.total_documents;
        self.save_state(&source.name, &state)?;

        Ok(summary)
    }

    /// Delete-then-reprocess a modified file; net chunk-count change can be
    /// positive or negative, so the add happens before the saturating
    /// subtraction to avoid clamping a net-positive change to zero.
    #[allow(clippy::too_many_arguments)]
    async fn reingest_one(
        &self,
        parsers: &ParserRegistry,
        chunker_config: ChunkerConfig,
        embedder: &Embedder,
        store: &VectorStore,
        source: &SourceConfig,
        absolute_path: &Path,
        relative_path: &str,
        state: &mut IngestionState,
    ) -> Result<()> {
        let deleted = store.delete_by_file_path(relative_path).await?;
        let new_chunks = process_file(parsers, chunker_config, embedder, store, source, absolute_path, relative_path).await?;

        state.total_chunks = state.total_chunks.saturating_add(new_chunks as u64).saturating_sub(deleted as u64);
        state.processed_files.insert(relative_path.to_string());
        state.failed_files.remove(relative_path);
        Ok(())
    }
}

fn filter_supported(source: &SourceConfig, changes: FileChanges) -> FileChanges {
    FileChanges {
        added: changes.added.into_iter().filter(|f| supports(source, f)).collect(),
        modified: changes.modified.into_iter().filter(|f| supports(source, f)).collect(),
        deleted: changes.deleted.into_iter().filter(|f| supports(source, f)).collect(),
    }
}

fn supports(source: &SourceConfig, relative_path: &str) -> bool {
    let ext =
        Path::new(relative_path).extension().map(|e| format!(".{}", e.to_string_lossy().to_lowercase())).unwrap_or_default();
    source.supports_format(&ext)
}

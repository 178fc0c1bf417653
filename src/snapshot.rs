//! SnapshotProvider (C5): enumerates a source's files and reports what
//! changed since a prior snapshot. A git-repository-backed implementation
//! is an external collaborator (see §1 Out-of-scope); this module ships
//! the local-filesystem default used in dev mode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::sources::SourceConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

pub trait SnapshotProvider: Send + Sync {
    fn list_files(&self, source: &SourceConfig) -> Result<Vec<String>>;
    fn file_changes(&self, source: &SourceConfig, since_commit: Option<&str>) -> Result<FileChanges>;
    fn current_commit(&self, source: &SourceConfig) -> Result<Option<String>>;
    fn sync_locally(&self, source: &SourceConfig) -> Result<()>;
    fn is_locally_synced(&self, source: &SourceConfig) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileFingerprint {
    mtime_secs: i64,
    content_hash: String,
}

type Manifest = BTreeMap<String, FileFingerprint>;

/// Local-filesystem `SnapshotProvider`: walks `source.local_path`, and
/// stands in for a real VCS commit by fingerprinting the file set
/// (mtime + content hash) and persisting that fingerprint under a content
/// hash of itself, so a later `file_changes` call can diff against it.
pub struct LocalSnapshotProvider {
    snapshots_dir: PathBuf,
}

impl LocalSnapshotProvider {
    pub fn new(snapshots_dir: impl Into<PathBuf>) -> Self {
        Self { snapshots_dir: snapshots_dir.into() }
    }

    fn manifest_path(&self, source_name: &str, commit: &str) -> PathBuf {
        self.snapshots_dir.join(source_name).join(format!("{commit}.json"))
    }

    fn sync_marker_path(&self, source_name: &str) -> PathBuf {
        self.snapshots_dir.join(source_name).join("synced.marker")
    }

    fn build_manifest(&self, source: &SourceConfig) -> Result<Manifest> {
        let root = Path::new(&source.local_path);
        let mut manifest = Manifest::new();

        if !root.exists() {
            return Ok(manifest);
        }

        for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let ext = format!(".{}", path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default());
            if !source.supports_format(&ext) {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let metadata = std::fs::metadata(path)
                .map_err(|e| Error::FatalInternal(format!("failed to stat {}: {e}", path.display())))?;
            let mtime_secs = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let bytes = std::fs::read(path)
                .map_err(|e| Error::FatalInternal(format!("failed to read {}: {e}", path.display())))?;
            let content_hash = format!("{:x}", Sha256::digest(&bytes));

            manifest.insert(relative, FileFingerprint { mtime_secs, content_hash });
        }

        Ok(manifest)
    }

    fn manifest_commit_id(manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();
        for (path, fp) in manifest {
            hasher.update(path.as_bytes());
            hasher.update(fp.content_hash.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn load_manifest(&self, source_name: &str, commit: &str) -> Option<Manifest> {
        let path = self.manifest_path(source_name, commit);
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn save_manifest(&self, source_name: &str, commit: &str, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(source_name, commit);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::FatalInternal(format!("failed to create {}: {e}", parent.display())))?;
        }
        let data = serde_json::to_string(manifest)
            .map_err(|e| Error::FatalInternal(format!("failed to serialize manifest: {e}")))?;
        std::fs::write(&path, data).map_err(|e| Error::FatalInternal(format!("failed to write {}: {e}", path.display())))
    }
}

impl SnapshotProvider for LocalSnapshotProvider {
    fn list_files(&self, source: &SourceConfig) -> Result<Vec<String>> {
        let manifest = self.build_manifest(source)?;
        Ok(manifest.into_keys().collect())
    }

    fn file_changes(&self, source: &SourceConfig, since_commit: Option<&str>) -> Result<FileChanges> {
        let current = self.build_manifest(source)?;
        let baseline: Manifest = since_commit
            .and_then(|commit| self.load_manifest(&source.name, commit))
            .unwrap_or_default();

        let mut changes = FileChanges::default();
        for (path, fp) in &current {
            match baseline.get(path) {
                None => changes.added.push(path.clone()),
                Some(old) if old.content_hash != fp.content_hash => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in baseline.keys() {
            if !current.contains_key(path) {
                changes.deleted.push(path.clone());
            }
        }
        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        Ok(changes)
    }

    fn current_commit(&self, source: &SourceConfig) -> Result<Option<String>> {
        let root = Path::new(&source.local_path);
        if !root.exists() {
            return Ok(None);
        }
        let manifest = self.build_manifest(source)?;
        let commit = Self::manifest_commit_id(&manifest);
        self.save_manifest(&source.name, &commit, &manifest)?;
        Ok(Some(commit))
    }

    /// Local sources are already local; this only records a marker so
    /// `is_locally_synced` has something to check.
    fn sync_locally(&self, source: &SourceConfig) -> Result<()> {
        let path = self.sync_marker_path(&source.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::FatalInternal(format!("failed to create {}: {e}", parent.display())))?;
        }
        std::fs::write(&path, crate::chunking::now_iso8601())
            .map_err(|e| Error::FatalInternal(format!("failed to write sync marker: {e}")))
    }

    fn is_locally_synced(&self, source: &SourceConfig) -> Result<bool> {
        Ok(self.sync_marker_path(&source.name).exists())
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
    fn list_files_filters_by_extension_and_returns_relative_paths() {
        let dir = std::env::temp_dir().join(format!("thoth_snap_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("a.md"), "hello").unwrap();
        std::fs::write(dir.join("sub/b.md"), "world").unwrap();
        std::fs::write(dir.join("ignore.txt"), "nope").unwrap();

        let snapshots = dir.join(".snapshots");
        let provider = LocalSnapshotProvider::new(&snapshots);
        let src = source(dir.to_str().unwrap());

        let mut files = provider.list_files(&src).unwrap();
        files.sort();
        assert_eq!(files, vec!["a.md".to_string(), "sub/b.md".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_changes_with_no_baseline_reports_everything_added() {
        let dir = std::env::temp_dir().join(format!("thoth_snap_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "hello").unwrap();

        let snapshots = dir.join(".snapshots");
        let provider = LocalSnapshotProvider::new(&snapshots);
        let src = source(dir.to_str().unwrap());

        let changes = provider.file_changes(&src, None).unwrap();
        assert_eq!(changes.added, vec!["a.md".to_string()]);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_changes_detects_modify_and_delete_against_a_prior_commit() {
        let dir = std::env::temp_dir().join(format!("thoth_snap_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.md"), "v1").unwrap();
        std::fs::write(dir.join("b.md"), "stays").unwrap();
        std::fs::write(dir.join("c.md"), "will be deleted").unwrap();

        let snapshots = dir.join(".snapshots");
        let provider = LocalSnapshotProvider::new(&snapshots);
        let src = source(dir.to_str().unwrap());

        let commit = provider.current_commit(&src).unwrap().unwrap();

        std::fs::write(dir.join("a.md"), "v2").unwrap();
        std::fs::remove_file(dir.join("c.md")).unwrap();
        std::fs::write(dir.join("d.md"), "new file").unwrap();

        let changes = provider.file_changes(&src, Some(&commit)).unwrap();
        assert_eq!(changes.added, vec!["d.md".to_string()]);
        assert_eq!(changes.modified, vec!["a.md".to_string()]);
        assert_eq!(changes.deleted, vec!["c.md".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sync_marker_round_trips() {
        let dir = std::env::temp_dir().join(format!("thoth_snap_test_{}", uuid::Uuid::new_v4()));
        let provider = LocalSnapshotProvider::new(&dir);
        let src = source("./irrelevant");

        assert!(!provider.is_locally_synced(&src).unwrap());
        provider.sync_locally(&src).unwrap();
        assert!(provider.is_locally_synced(&src).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn nonexistent_local_path_yields_empty_file_list() {
        let provider = LocalSnapshotProvider::new(std::env::temp_dir().join("thoth_snap_never_created"));
        let src = source("/nonexistent/path/for/sure");
        assert!(provider.list_files(&src).unwrap().is_empty());
    }
}

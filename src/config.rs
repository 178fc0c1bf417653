//! Configuration: embedding-model selection plus process-wide runtime
//! settings read once from the environment (§6.2).

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Device preference for compute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Metal,
    Cuda,
}

impl DevicePreference {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Metal => "metal",
            Self::Cuda => "cuda",
        }
    }
}

/// Embedding model configuration (§4.3's embedder is configured, not
/// hardcoded, so callers can swap in a larger model without a rebuild).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingModelConfig {
    pub id: String,
    pub name: String,
    pub repo_id: String,
    pub dimensions: usize,
    #[serde(default)]
    pub size_mb: u32,
    #[serde(default)]
    pub curated: bool,
}

impl EmbeddingModelConfig {
    pub fn custom(repo_id: &str, dimensions: usize) -> Self {
        let name = repo_id.split('/').last().unwrap_or(repo_id).to_string();
        Self {
            id: format!("custom:{}", repo_id),
            name,
            repo_id: repo_id.to_string(),
            dimensions,
            size_mb: 0,
            curated: false,
        }
    }

    pub fn hf_id(&self) -> &str {
        &self.repo_id
    }

    pub fn all_minilm_l6_v2() -> Self {
        Self {
            id: "all-MiniLM-L6-v2".to_string(),
            name: "all-MiniLM-L6-v2".to_string(),
            repo_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            size_mb: 86,
            curated: true,
        }
    }

    pub fn all_minilm_l12_v2() -> Self {
        Self {
            id: "all-MiniLM-L12-v2".to_string(),
            name: "all-MiniLM-L12-v2".to_string(),
            repo_id: "sentence-transformers/all-MiniLM-L12-v2".to_string(),
            dimensions: 384,
            size_mb: 134,
            curated: true,
        }
    }

    pub fn bge_small_en_v15() -> Self {
        Self {
            id: "bge-small-en-v1.5".to_string(),
            name: "bge-small-en-v1.5".to_string(),
            repo_id: "BAAI/bge-small-en-v1.5".to_string(),
            dimensions: 384,
            size_mb: 134,
            curated: true,
        }
    }

    pub fn bge_base_en_v15() -> Self {
        Self {
            id: "bge-base-en-v1.5".to_string(),
            name: "bge-base-en-v1.5".to_string(),
            repo_id: "BAAI/bge-base-en-v1.5".to_string(),
            dimensions: 768,
            size_mb: 418,
            curated: true,
        }
    }

    pub fn nomic_embed_text_v15() -> Self {
        Self {
            id: "nomic-embed-text-v1.5".to_string(),
            name: "nomic-embed-text-v1.5".to_string(),
            repo_id: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            dimensions: 768,
            size_mb: 548,
            curated: true,
        }
    }

    pub fn curated_models() -> Vec<Self> {
        vec![
            Self::all_minilm_l6_v2(),
            Self::all_minilm_l12_v2(),
            Self::bge_small_en_v15(),
            Self::bge_base_en_v15(),
            Self::nomic_embed_text_v15(),
        ]
    }

    pub fn find_curated(id: &str) -> Option<Self> {
        Self::curated_models().into_iter().find(|m| m.id == id)
    }
}

impl Default for EmbeddingModelConfig {
    fn default() -> Self {
        Self::all_minilm_l12_v2()
    }
}

fn current_version() -> u32 {
    1
}

/// On-disk model configuration (`~/.thoth/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub embedding_model: EmbeddingModelConfig,
    #[serde(default)]
    pub device: DevicePreference,
    #[serde(default = "current_version")]
    pub version: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_model: EmbeddingModelConfig::default(),
            device: DevicePreference::default(),
            version: current_version(),
        }
    }
}

impl ModelConfig {
    pub fn path() -> Result<PathBuf> {
        let home = env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".thoth").join("config.toml"))
    }

    pub fn exists() -> bool {
        Self::path().map(|p| p.exists()).unwrap_or(false)
    }

    pub fn load() -> Result<Option<Self>> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: ModelConfig = toml::from_str(&content).context("failed to parse config file")?;
        Ok(Some(config))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&path, content).context("failed to write config file")?;
        Ok(())
    }
}

/// Base data directory (`~/.thoth/data`), used only in local, no-object-store
/// deployments for on-disk model weights cached by `hf-hub`.
pub fn data_dir() -> Result<PathBuf> {
    let home = env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".thoth").join("data"))
}

/// Settings read once at process start from the environment variables of
/// §6.2. Held as a process-wide singleton (see `AppState`), never
/// reconstructed per request.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub object_store_bucket: Option<String>,
    pub object_store_project: Option<String>,
    pub task_queue_location: Option<String>,
    pub task_queue_name: Option<String>,
    pub batch_worker_url: Option<String>,
    pub service_account_email: Option<String>,
    pub batch_size: usize,
    pub log_format_json: bool,
    /// Local base directory used when `object_store_bucket` is unset.
    pub local_data_dir: String,
    pub bind_port: u16,
}

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_PORT: u16 = 8080;

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            object_store_bucket: env::var("OBJECT_STORE_BUCKET").ok(),
            object_store_project: env::var("OBJECT_STORE_PROJECT").ok(),
            task_queue_location: env::var("TASK_QUEUE_LOCATION").ok(),
            task_queue_name: env::var("TASK_QUEUE_NAME").ok(),
            batch_worker_url: env::var("BATCH_WORKER_URL").ok(),
            service_account_email: env::var("SERVICE_ACCOUNT_EMAIL").ok(),
            batch_size: env::var("BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BATCH_SIZE),
            log_format_json: env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false),
            local_data_dir: env::var("THOTH_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            bind_port: env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT),
        }
    }

    /// True when an object-storage backend is configured; otherwise the
    /// system operates in local-filesystem mode.
    pub fn object_store_configured(&self) -> bool {
        self.object_store_bucket.is_some()
    }

    /// True iff the task queue has everything it needs to dispatch batches
    /// to a remote batch worker (§4.7 `is_configured`).
    pub fn task_queue_configured(&self) -> bool {
        self.task_queue_name.is_some() && self.batch_worker_url.is_some()
    }

    /// Base URI tables are opened under: an object-storage URI when
    /// configured, otherwise a local path.
    pub fn base_uri(&self) -> String {
        match &self.object_store_bucket {
            Some(bucket) => format!("gs://{bucket}"),
            None => self.local_data_dir.clone(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            object_store_bucket: None,
            object_store_project: None,
            task_queue_location: None,
            task_queue_name: None,
            batch_worker_url: None,
            service_account_email: None,
            batch_size: DEFAULT_BATCH_SIZE,
            log_format_json: false,
            local_data_dir: "./data".to_string(),
            bind_port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn default_model_config() {
        let config = ModelConfig::default();
        assert_eq!(config.embedding_model.id, "all-MiniLM-L12-v2");
        assert_eq!(config.version, 1);
    }

    #[test]
    fn curated_models_present() {
        let embedders = EmbeddingModelConfig::curated_models();
        assert_eq!(embedders.len(), 5);
    }

    #[test]
    fn custom_model() {
        let model = EmbeddingModelConfig::custom("sentence-transformers/all-mpnet-base-v2", 768);
        assert_eq!(model.repo_id, "sentence-transformers/all-mpnet-base-v2");
        assert!(!model.curated);
    }

    #[test]
    fn find_curated_model() {
        let model = EmbeddingModelConfig::find_curated("bge-base-en-v1.5");
        assert!(model.is_some());
        assert_eq!(model.unwrap().dimensions, 768);
        assert!(EmbeddingModelConfig::find_curated("nonexistent").is_none());
    }

    #[test]
    fn model_config_round_trips_through_toml() {
        let config = ModelConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ModelConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.embedding_model.id, parsed.embedding_model.id);
    }

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in [
            "OBJECT_STORE_BUCKET",
            "TASK_QUEUE_NAME",
            "BATCH_WORKER_URL",
            "BATCH_SIZE",
            "LOG_FORMAT",
        ] {
            env::remove_var(var);
        }
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!cfg.object_store_configured());
        assert!(!cfg.task_queue_configured());
        assert!(!cfg.log_format_json);
    }

    #[test]
    fn task_queue_requires_both_name_and_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("TASK_QUEUE_NAME", "batches");
        env::remove_var("BATCH_WORKER_URL");
        let cfg = RuntimeConfig::from_env();
        assert!(!cfg.task_queue_configured());
        env::set_var("BATCH_WORKER_URL", "https://worker.example.com");
        let cfg = RuntimeConfig::from_env();
        assert!(cfg.task_queue_configured());
        env::remove_var("TASK_QUEUE_NAME");
        env::remove_var("BATCH_WORKER_URL");
    }

    #[test]
    fn base_uri_prefers_object_store() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("OBJECT_STORE_BUCKET", "my-bucket");
        let cfg = RuntimeConfig::from_env();
        assert_eq!(cfg.base_uri(), "gs://my-bucket");
        env::remove_var("OBJECT_STORE_BUCKET");
    }
}

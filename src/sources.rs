//! Source registry: configuration for each named corpus the system ingests.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

/// Configuration for one data source (a named corpus).
///
/// Invariant upheld by `SourceRegistry`: `collection_name` and
/// `object_prefix` are pairwise unique across all registered sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub collection_name: String,
    pub object_prefix: String,
    pub supported_formats: Vec<String>,
    pub description: String,
    /// Filesystem root used by the local-discovery fallback (§4.8 step 4)
    /// when no object store is configured.
    pub local_path: String,
}

impl SourceConfig {
    pub fn supports_format(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.supported_formats.iter().any(|f| f.to_lowercase() == ext)
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "handbook".into(),
            collection_name: "handbook_documents".into(),
            object_prefix: "handbook".into(),
            supported_formats: vec![".md".into()],
            description: "Handbook documentation".into(),
            local_path: "./corpus/handbook".into(),
        },
        SourceConfig {
            name: "reference".into(),
            collection_name: "reference_documents".into(),
            object_prefix: "reference".into(),
            supported_formats: vec![".md".into(), ".pdf".into(), ".txt".into()],
            description: "Reference materials and manuals".into(),
            local_path: "./corpus/reference".into(),
        },
        SourceConfig {
            name: "personal".into(),
            collection_name: "personal_documents".into(),
            object_prefix: "personal".into(),
            supported_formats: vec![".md".into(), ".pdf".into(), ".txt".into(), ".docx".into()],
            description: "Personal documents and notes".into(),
            local_path: "./corpus/personal".into(),
        },
    ]
}

/// Registry of source configurations, seeded with defaults and overridable
/// per-source via `THOTH_SOURCE_{NAME}_OBJECT_PREFIX` /
/// `THOTH_SOURCE_{NAME}_COLLECTION` environment variables.
pub struct SourceRegistry {
    sources: HashMap<String, SourceConfig>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        let mut sources = HashMap::new();
        for cfg in default_sources() {
            sources.insert(cfg.name.clone(), cfg);
        }
        let mut registry = Self { sources };
        registry.load_overrides();
        registry
    }

    fn load_overrides(&mut self) {
        for (name, cfg) in self.sources.iter_mut() {
            let prefix_env = format!("THOTH_SOURCE_{}_OBJECT_PREFIX", name.to_uppercase());
            if let Ok(v) = env::var(&prefix_env) {
                tracing::info!(source = %name, prefix = %v, "overriding object_prefix");
                cfg.object_prefix = v;
            }
            let collection_env = format!("THOTH_SOURCE_{}_COLLECTION", name.to_uppercase());
            if let Ok(v) = env::var(&collection_env) {
                tracing::info!(source = %name, collection = %v, "overriding collection_name");
                cfg.collection_name = v;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }

    pub fn list_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_configs(&self) -> Vec<&SourceConfig> {
        self.sources.values().collect()
    }

    pub fn by_collection(&self, collection_name: &str) -> Option<&SourceConfig> {
        self.sources.values().find(|c| c.collection_name == collection_name)
    }

    /// Registers a source not already present. Errors (returns false) on
    /// name collision, matching the registry's uniqueness invariant.
    pub fn register(&mut self, config: SourceConfig) -> bool {
        if self.sources.contains_key(&config.name) {
            return false;
        }
        self.sources.insert(config.name.clone(), config);
        true
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

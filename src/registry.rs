// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model Registry (C5): discovers `<models_root>/<name>/{model.gguf,config.json}` directories
//! and resolves a logical model name to its weights path and configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::template::Family;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub family: String,
    pub quantization: String,
    pub context_size: u32,
    pub template: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl ModelConfig {
    pub fn resolved_family(&self) -> Result<Family> {
        Family::from_str(&self.family).ok_or_else(|| {
            CoreError::ConfigurationError(format!(
                "model '{}' declares unknown family '{}'",
                self.name, self.family
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    #[serde(flatten)]
    pub config: ModelConfig,
    pub size_bytes: u64,
    pub loaded: bool,
}

struct Entry {
    config: ModelConfig,
    path: PathBuf,
    size_bytes: u64,
    loaded: bool,
}

pub struct ModelRegistry {
    models_dir: PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self { models_dir: models_dir.into(), entries: RwLock::new(HashMap::new()) }
    }

    /// Scan `models_dir` for `<name>/{model.gguf,config.json}` subdirectories, replacing the
    /// current in-memory index. Directories without both artifacts are skipped, not errored.
    pub fn scan(&self) -> Result<usize> {
        let mut found = HashMap::new();

        if !self.models_dir.exists() {
            *self.entries.write().expect("registry lock poisoned") = found;
            return Ok(0);
        }

        for entry in std::fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };

            let gguf = find_gguf(&path);
            let config_path = path.join("config.json");
            let (Some(gguf), true) = (gguf, config_path.exists()) else { continue };

            let config: ModelConfig = match std::fs::read_to_string(&config_path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(config) => config,
                    Err(_) => continue,
                },
                Err(_) => continue,
            };

            let size_bytes = std::fs::metadata(&gguf).map(|m| m.len()).unwrap_or(0);
            found.insert(
                name.to_string(),
                Entry { config, path: gguf, size_bytes, loaded: false },
            );
        }

        let count = found.len();
        *self.entries.write().expect("registry lock poisoned") = found;
        Ok(count)
    }

    pub fn get_config(&self, name: &str) -> Result<ModelConfig> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .get(name)
            .map(|e| e.config.clone())
            .ok_or_else(|| CoreError::ModelNotFound(name.to_string()))
    }

    pub fn get_path(&self, name: &str) -> Result<PathBuf> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .get(name)
            .map(|e| e.path.clone())
            .ok_or_else(|| CoreError::ModelNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .values()
            .map(|e| ModelInfo {
                config: e.config.clone(),
                size_bytes: e.size_bytes,
                loaded: e.loaded,
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<ModelInfo> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .get(name)
            .map(|e| ModelInfo { config: e.config.clone(), size_bytes: e.size_bytes, loaded: e.loaded })
            .ok_or_else(|| CoreError::ModelNotFound(name.to_string()))
    }

    pub fn mark_loaded(&self, name: &str, loaded: bool) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if let Some(entry) = entries.get_mut(name) {
            entry.loaded = loaded;
        }
    }
}

fn find_gguf(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("gguf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_model(dir: &Path, name: &str, family: &str) {
        let model_dir = dir.join(name);
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::File::create(model_dir.join("model.gguf")).unwrap().write_all(b"fake").unwrap();
        let config = serde_json::json!({
            "name": name,
            "family": family,
            "quantization": "Q4_K_M",
            "context_size": 4096,
            "template": family,
        });
        std::fs::write(model_dir.join("config.json"), config.to_string()).unwrap();
    }

    #[test]
    fn scan_discovers_named_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        write_model(tmp.path(), "test-llama", "llama");

        let registry = ModelRegistry::new(tmp.path());
        let found = registry.scan().unwrap();
        assert_eq!(found, 1);

        let info = registry.get("test-llama").unwrap();
        assert_eq!(info.config.family, "llama");
        assert!(!info.loaded);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(tmp.path());
        registry.scan().unwrap();
        let err = registry.get_config("missing").unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound(_)));
    }

    #[test]
    fn directory_without_config_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let model_dir = tmp.path().join("broken");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::File::create(model_dir.join("model.gguf")).unwrap();

        let registry = ModelRegistry::new(tmp.path());
        let found = registry.scan().unwrap();
        assert_eq!(found, 0);
    }

    #[test]
    fn mark_loaded_updates_list() {
        let tmp = tempfile::tempdir().unwrap();
        write_model(tmp.path(), "m", "qwen");
        let registry = ModelRegistry::new(tmp.path());
        registry.scan().unwrap();
        registry.mark_loaded("m", true);
        assert!(registry.list().iter().all(|m| m.loaded));
    }
}

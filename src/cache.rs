// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model Cache (C6): a bounded LRU of loaded engines with per-key single-flight loading.
//!
//! Uses the `lru` crate for eviction and a `Notify`-per-key waiter list so concurrent callers
//! requesting the same cold model block on one load instead of racing to load it twice.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Notify;
use tracing::{info, instrument};

use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::registry::ModelRegistry;

struct Inner {
    lru: LruCache<String, Arc<Engine>>,
    /// Names with a load currently in flight; waiters park on the `Notify` until the loader
    /// publishes a result (or fails) and removes its entry.
    loading: HashMap<String, Arc<Notify>>,
}

pub struct ModelCache {
    inner: std::sync::Mutex<Inner>,
    registry: Arc<ModelRegistry>,
    backend: Arc<llama_cpp_2::llama_backend::LlamaBackend>,
    n_gpu_layers: i32,
    n_threads: i32,
}

enum LoadSlot {
    /// No other caller is loading this model; we must load it and publish the result.
    Owner,
    /// Another caller is already loading; wait on this notifier then retry the lookup.
    Wait(Arc<Notify>),
}

impl ModelCache {
    pub fn new(
        capacity: usize,
        registry: Arc<ModelRegistry>,
        backend: Arc<llama_cpp_2::llama_backend::LlamaBackend>,
        n_gpu_layers: i32,
        n_threads: i32,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CoreError::ConfigurationError("max_loaded_models must be >= 1".into()))?;
        Ok(Self {
            inner: std::sync::Mutex::new(Inner { lru: LruCache::new(capacity), loading: HashMap::new() }),
            registry,
            backend,
            n_gpu_layers,
            n_threads,
        })
    }

    #[instrument(skip(self), fields(model = name))]
    pub async fn get_or_load(&self, name: &str) -> Result<Arc<Engine>> {
        loop {
            let slot = {
                let mut inner = self.inner.lock().expect("cache lock poisoned");
                if let Some(engine) = inner.lru.get(name) {
                    return Ok(engine.clone());
                }
                match inner.loading.get(name) {
                    Some(notify) => LoadSlot::Wait(notify.clone()),
                    None => {
                        inner.loading.insert(name.to_string(), Arc::new(Notify::new()));
                        LoadSlot::Owner
                    }
                }
            };

            match slot {
                LoadSlot::Wait(notify) => {
                    notify.notified().await;
                    continue;
                }
                LoadSlot::Owner => {
                    let result = self.load_and_publish(name).await;
                    let notify = {
                        let mut inner = self.inner.lock().expect("cache lock poisoned");
                        inner.loading.remove(name)
                    };
                    if let Some(notify) = notify {
                        notify.notify_waiters();
                    }
                    return result;
                }
            }
        }
    }

    async fn load_and_publish(&self, name: &str) -> Result<Arc<Engine>> {
        let path = self.registry.get_path(name)?;
        let config = self.registry.get_config(name)?;

        let backend = self.backend.clone();
        let name_owned = name.to_string();
        let path_owned: PathBuf = path;
        let ctx_size = config.context_size;
        let n_gpu_layers = self.n_gpu_layers;
        let n_threads = self.n_threads;

        let engine = tokio::task::spawn_blocking(move || {
            Engine::load(backend, &name_owned, &path_owned, ctx_size, n_gpu_layers, n_threads)
        })
        .await
        .map_err(|e| CoreError::ModelLoadError { name: name.to_string(), reason: e.to_string() })??;

        let engine = Arc::new(engine);

        let evicted = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            inner.lru.push(name.to_string(), engine.clone())
        };
        self.registry.mark_loaded(name, true);

        if let Some((evicted_name, evicted_engine)) = evicted {
            if evicted_name != name {
                info!(model = %evicted_name, "evicted model from cache to stay within capacity");
                self.registry.mark_loaded(&evicted_name, false);
                drop(evicted_engine);
            }
        }

        Ok(engine)
    }

    #[instrument(skip(self), fields(model = name))]
    pub fn unload(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.lru.pop(name).is_none() {
            return Err(CoreError::InvalidInput(format!("model '{name}' is not loaded")));
        }
        self.registry.mark_loaded(name, false);
        Ok(())
    }

    pub async fn preload(&self, name: &str) -> Result<()> {
        self.get_or_load(name).await.map(|_| ())
    }

    pub fn loaded(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.lru.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.lru.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_backend() -> Arc<llama_cpp_2::llama_backend::LlamaBackend> {
        Arc::new(llama_cpp_2::llama_backend::LlamaBackend::init().expect("backend init"))
    }

    #[tokio::test]
    async fn unload_of_unknown_model_is_invalid_input() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(tmp.path()));
        registry.scan().unwrap();
        let cache = ModelCache::new(2, registry, fresh_backend(), -1, 4).unwrap();
        let err = cache.unload("nope").unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_or_load_of_unregistered_model_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(tmp.path()));
        registry.scan().unwrap();
        let cache = ModelCache::new(2, registry, fresh_backend(), -1, 4).unwrap();
        let err = cache.get_or_load("nope").await.unwrap_err();
        assert!(matches!(err, CoreError::ModelNotFound(_)));
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(tmp.path()));
        let backend = fresh_backend();
        let err = ModelCache::new(0, registry, backend, -1, 4).unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Full chat round-trip against real GGUF weights. Skipped unless `MYLLM_TEST_MODEL_DIR` points
//! at a `<name>/{model.gguf,config.json}` directory, since no such weights ship with the repo.

use std::sync::Arc;

use myllm::cache::ModelCache;
use myllm::config::Settings;
use myllm::engine::GenerateOptions;
use myllm::orchestrator::{ChatEvent, ChatMessage, Orchestrator};
use myllm::registry::ModelRegistry;
use myllm::session::SessionStore;

#[tokio::test]
async fn cold_cache_chat_persists_both_turns() {
    let Ok(models_dir) = std::env::var("MYLLM_TEST_MODEL_DIR") else {
        eprintln!("skipping: MYLLM_TEST_MODEL_DIR not set");
        return;
    };
    let registry = Arc::new(ModelRegistry::new(models_dir.as_str()));
    let found = registry.scan().unwrap();
    assert!(found > 0, "no models discovered under {models_dir}");
    let model_name = registry.list()[0].config.name.clone();

    let backend = Arc::new(llama_cpp_2::llama_backend::LlamaBackend::init().unwrap());
    let cache = Arc::new(ModelCache::new(1, registry.clone(), backend, 0, 4).unwrap());
    let sessions = Arc::new(SessionStore::open_in_memory().unwrap());
    let orchestrator = Orchestrator::new(registry, cache, sessions.clone(), Settings::default());

    let messages = vec![ChatMessage { role: "user".to_string(), content: "Hi".to_string() }];
    let options = GenerateOptions { max_tokens: 16, ..GenerateOptions::default() };
    let (session_id, mut rx) = orchestrator.chat(&model_name, messages, None, options).await.unwrap();

    let mut completion_tokens = 0;
    loop {
        match rx.recv().await {
            Some(ChatEvent::Token(_)) => {}
            Some(ChatEvent::Done { usage, .. }) => {
                completion_tokens = usage.map(|u| u.completion_tokens).unwrap_or(0);
                break;
            }
            Some(ChatEvent::Error(err)) => panic!("generation failed: {err}"),
            None => break,
        }
    }

    assert!(completion_tokens > 0);
    let stored = sessions.list_messages(&session_id).unwrap();
    assert_eq!(stored.len(), 2);
}

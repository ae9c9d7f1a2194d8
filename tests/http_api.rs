// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! End-to-end HTTP surface tests against a composition root with no real model weights —
//! covers discovery, not-found handling, and load/unload against an empty registry.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use myllm::api::{build_router, AppState};
use myllm::cache::ModelCache;
use myllm::config::Settings;
use myllm::orchestrator::Orchestrator;
use myllm::registry::ModelRegistry;
use myllm::session::SessionStore;

fn build_state(models_dir: &std::path::Path) -> AppState {
    let registry = Arc::new(ModelRegistry::new(models_dir));
    registry.scan().unwrap();
    let backend = Arc::new(llama_cpp_2::llama_backend::LlamaBackend::init().unwrap());
    let cache = Arc::new(ModelCache::new(2, registry.clone(), backend, -1, 2).unwrap());
    let sessions = Arc::new(SessionStore::open_in_memory().unwrap());
    let orchestrator = Arc::new(Orchestrator::new(registry, cache, sessions, Settings::default()));
    AppState::new(orchestrator)
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let tmp = tempfile::tempdir().unwrap();
    let router = build_router(build_state(tmp.path()));

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn root_endpoint_reports_name_and_model_count() {
    let tmp = tempfile::tempdir().unwrap();
    let router = build_router(build_state(tmp.path()));

    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["name"], "myllm");
    assert_eq!(json["models_registered"], 0);
}

#[tokio::test]
async fn unknown_model_lookup_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    let router = build_router(build_state(tmp.path()));

    let response = router
        .oneshot(Request::builder().uri("/api/models/nonexistent").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_against_unknown_model_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    let router = build_router(build_state(tmp.path()));

    let body = serde_json::json!({
        "model": "nonexistent",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn models_list_is_empty_for_a_fresh_models_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let router = build_router(build_state(tmp.path()));

    let response = router
        .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["models"].as_array().unwrap().len(), 0);
}

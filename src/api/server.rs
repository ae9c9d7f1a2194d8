// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Router assembly: wires every handler behind `TraceLayer` and a permissive `CorsLayer`.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::{chat, embeddings, generate, health, models};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/api/chat", post(chat::chat))
        .route("/api/generate", post(generate::generate))
        .route("/api/embeddings", post(embeddings::embeddings))
        .route("/api/models", get(models::list_models))
        .route("/api/models/:name", get(models::get_model))
        .route("/api/models/:name/load", post(models::load_model))
        .route("/api/models/:name/unload", post(models::unload_model))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

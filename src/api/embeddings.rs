// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `POST /api/embeddings` handler.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub embedding: Vec<f32>,
    pub model: String,
}

pub async fn embeddings(State(state): State<AppState>, Json(req): Json<EmbeddingsRequest>) -> Response {
    match state.orchestrator.embed(&req.model, &req.input).await {
        Ok(embedding) => Json(EmbeddingsResponse { embedding, model: req.model }).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `GET /api/models`, `GET /api/models/{name}`, and load/unload endpoints.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::errors::ApiError;
use super::state::AppState;
use crate::registry::ModelInfo;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

pub async fn list_models(State(state): State<AppState>) -> Response {
    Json(ModelsResponse { models: state.orchestrator.registry().list() }).into_response()
}

pub async fn get_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.registry().get(&name) {
        Ok(info) => Json(info).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

pub async fn load_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.cache().get_or_load(&name).await {
        Ok(_) => Json(StatusResponse { status: "ok", message: format!("model '{name}' loaded") })
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

pub async fn unload_model(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.orchestrator.cache().unload(&name) {
        Ok(()) => Json(StatusResponse { status: "ok", message: format!("model '{name}' unloaded") })
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

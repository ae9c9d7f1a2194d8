// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `GET /health` and `GET /`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::state::AppState;
use crate::version;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub models_registered: usize,
}

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "myllm",
        version: version::VERSION,
        models_registered: state.orchestrator.registry().list().len(),
    })
}

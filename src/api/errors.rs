// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Translates domain errors to HTTP responses via a single
//! `ApiError -> (StatusCode, Json<ErrorResponse>)` mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::CoreError;

pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::ModelNotFound(_) | CoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_) | CoreError::ContextExceeded { .. } | CoreError::ConfigurationError(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::ModelLoadError { .. }
            | CoreError::InferenceError(_)
            | CoreError::DownloadError(_)
            | CoreError::Database(_)
            | CoreError::Io(_)
            | CoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

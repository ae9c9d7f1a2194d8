// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Domain error kinds shared by every core component.
//!
//! Each variant corresponds to one of the error kinds in the design: components return
//! `CoreError`, and the HTTP layer (`api::errors`) is the only place that knows how to turn
//! one into a status code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("failed to load model '{name}': {reason}")]
    ModelLoadError { name: String, reason: String },

    #[error("inference failed: {0}")]
    InferenceError(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("prompt does not fit context window ({budget} tokens available, needed {needed})")]
    ContextExceeded { budget: usize, needed: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("model download not implemented for '{0}'")]
    DownloadError(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP Surface (C11): axum router and handlers exposing the chat/generate/embeddings/models
//! endpoints over the Runtime Orchestrator.

pub mod chat;
pub mod embeddings;
pub mod errors;
pub mod generate;
pub mod health;
pub mod models;
mod options;
pub mod server;
pub mod state;

pub use server::build_router;
pub use state::AppState;

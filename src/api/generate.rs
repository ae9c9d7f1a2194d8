// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `POST /api/generate` handler: stateless completion, no session involved.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use super::chat::UsageResponse;
use super::errors::ApiError;
use super::options::RequestOptions;
use super::state::AppState;
use crate::orchestrator::ChatEvent;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: Option<UsageResponse>,
}

pub async fn generate(State(state): State<AppState>, Json(req): Json<GenerateRequest>) -> Response {
    let rx = match state.orchestrator.generate(&req.model, req.prompt, req.options.into()).await {
        Ok(rx) => rx,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if req.stream {
        stream_response(rx).into_response()
    } else {
        collect_response(rx).await.into_response()
    }
}

async fn collect_response(mut rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>) -> Response {
    let mut text = String::new();
    let mut usage = None;
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::Token(t) => text.push_str(&t),
            ChatEvent::Done { usage: u, .. } => {
                usage = u;
                break;
            }
            ChatEvent::Error(err) => {
                return ApiError::from(crate::error::CoreError::InferenceError(err)).into_response();
            }
        }
    }
    Json(GenerateResponse { text, usage: usage.map(UsageResponse::from) }).into_response()
}

fn stream_response(
    rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let json = match event {
            ChatEvent::Token(text) => serde_json::json!({ "token": text, "done": false }),
            ChatEvent::Done { usage, .. } => {
                serde_json::json!({ "done": true, "usage": usage.map(UsageResponse::from) })
            }
            ChatEvent::Error(err) => serde_json::json!({ "done": true, "error": err }),
        };
        Ok(Event::default().data(json.to_string()))
    });
    Sse::new(stream)
}

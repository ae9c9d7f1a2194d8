// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `POST /api/chat` handler: non-streaming JSON response or an SSE token stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use super::errors::ApiError;
use super::options::RequestOptions;
use super::state::AppState;
use crate::engine::UsageRecord;
use crate::orchestrator::{ChatEvent, ChatMessage};

#[derive(Debug, Deserialize)]
pub struct ChatRequestMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatRequestMessage>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Serialize)]
pub struct ChatResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: ChatResponseMessage,
    pub session_id: String,
    pub usage: Option<UsageResponse>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<UsageRecord> for UsageResponse {
    fn from(u: UsageRecord) -> Self {
        Self { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens() }
    }
}

pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let messages = req
        .messages
        .into_iter()
        .map(|m| ChatMessage { role: m.role, content: m.content })
        .collect();

    let result = state
        .orchestrator
        .chat(&req.model, messages, req.session_id, req.options.into())
        .await;

    let (session_id, rx) = match result {
        Ok(v) => v,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if req.stream {
        stream_response(rx).into_response()
    } else {
        collect_response(session_id, rx).await.into_response()
    }
}

async fn collect_response(
    session_id: String,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
) -> Response {
    let mut content = String::new();
    let mut usage = None;
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::Token(text) => content.push_str(&text),
            ChatEvent::Done { usage: u, .. } => {
                usage = u;
                break;
            }
            ChatEvent::Error(err) => {
                return ApiError::from(crate::error::CoreError::InferenceError(err)).into_response();
            }
        }
    }

    Json(ChatResponse {
        message: ChatResponseMessage { role: "assistant", content },
        session_id,
        usage: usage.map(UsageResponse::from),
    })
    .into_response()
}

fn stream_response(
    rx: tokio::sync::mpsc::UnboundedReceiver<ChatEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let json = match event {
            ChatEvent::Token(text) => serde_json::json!({ "token": text, "done": false }),
            ChatEvent::Done { session_id, usage } => serde_json::json!({
                "done": true,
                "session_id": session_id,
                "usage": usage.map(UsageResponse::from),
            }),
            ChatEvent::Error(err) => serde_json::json!({ "done": true, "error": err }),
        };
        Ok(Event::default().data(json.to_string()))
    });
    Sse::new(stream)
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Runtime Orchestrator (C9): composes the registry, cache, session store and budgeter into
//! the three public operations the HTTP surface and CLI both drive, grounded on the
//! `chat()`/`generate()`/`embed()` shape of `core/runtime.py`'s `RuntimeManager`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::ModelCache;
use crate::config::Settings;
use crate::engine::{Engine, GenerateOptions, OutputSanitizer, SanitizeOutcome, UsageRecord};
use crate::error::{CoreError, Result};
use crate::registry::ModelRegistry;
use crate::session::{truncate_to_budget, BudgetedMessage, Role as StoredRole, SessionStore};
use crate::template::compose::{compose_prompt, ComposeError, ComposeMessage, Role as TemplateRole};
use crate::template::Family;

/// Safety margin subtracted from the context window before budgeting, matching the
/// `prompt_max_tokens = context_size - max_tokens_generation - 100` arithmetic this is
/// grounded on.
const SAFETY_MARGIN_TOKENS: u32 = 100;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Token(String),
    Done { session_id: String, usage: Option<UsageRecord> },
    Error(String),
}

pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    cache: Arc<ModelCache>,
    sessions: Arc<SessionStore>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<ModelCache>,
        sessions: Arc<SessionStore>,
        settings: Settings,
    ) -> Self {
        Self { registry, cache, sessions, settings }
    }

    /// Begin a chat turn. Returns the session id (fresh if none was supplied) immediately and a
    /// channel of streaming events; the caller (HTTP layer or CLI) drains the channel to drive
    /// SSE framing or REPL printing. The assistant turn is persisted once generation completes;
    /// it is NOT persisted if the receiver is dropped before the `Done` event (client
    /// disconnect — the partial turn is discarded).
    pub async fn chat(
        &self,
        model: &str,
        new_messages: Vec<ChatMessage>,
        session_id: Option<String>,
        options: GenerateOptions,
    ) -> Result<(String, mpsc::UnboundedReceiver<ChatEvent>)> {
        if new_messages.is_empty() {
            return Err(CoreError::InvalidInput("messages must not be empty".to_string()));
        }

        let session_id = match session_id {
            Some(id) => {
                if !self.sessions.session_exists(&id)? {
                    return Err(CoreError::SessionNotFound(id));
                }
                id
            }
            None => self.sessions.create(model)?,
        };

        let history = self.sessions.list_messages(&session_id)?;
        let config = self.registry.get_config(model)?;
        let family = config.resolved_family()?;

        let budget = config
            .context_size
            .saturating_sub(options.max_tokens)
            .saturating_sub(SAFETY_MARGIN_TOKENS) as usize;

        let mut budgeted: Vec<BudgetedMessage> = history
            .iter()
            .map(|m| BudgetedMessage {
                role: m.role.clone(),
                content: m.content.clone(),
                tokens: m.tokens.map(|t| t as usize).unwrap_or_else(|| estimate(&m.content)),
            })
            .collect();
        for m in &new_messages {
            let role = StoredRole::from_str(&m.role)
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown role '{}'", m.role)))?;
            budgeted.push(BudgetedMessage { role, content: m.content.clone(), tokens: estimate(&m.content) });
        }

        let admitted = truncate_to_budget(&budgeted, budget);
        let needed: usize = admitted.iter().map(|m| m.tokens).sum();
        if needed > budget {
            return Err(CoreError::ContextExceeded { budget, needed });
        }
        let prompt = build_prompt(family, &admitted)?;

        let engine = self.cache.get_or_load(model).await?;
        let mut gen_options = options;
        gen_options.stop = merge_stop_tokens(family, &gen_options.stop);

        let (tx, rx) = mpsc::unbounded_channel();
        let user_message = new_messages
            .into_iter()
            .find(|m| m.role == "user")
            .ok_or_else(|| CoreError::InvalidInput("chat requires a user message".to_string()))?;

        let sessions = self.sessions.clone();
        let session_id_for_task = session_id.clone();
        let stop_tokens: Vec<&'static str> = family.template().stop_tokens.to_vec();

        tokio::spawn(async move {
            run_generation(
                engine,
                sessions,
                session_id_for_task,
                user_message,
                prompt,
                gen_options,
                stop_tokens,
                tx,
            )
            .await;
        });

        Ok((session_id, rx))
    }

    /// Stateless completion: no session, no history, no budgeting.
    pub async fn generate(
        &self,
        model: &str,
        prompt: String,
        options: GenerateOptions,
    ) -> Result<mpsc::UnboundedReceiver<ChatEvent>> {
        let config = self.registry.get_config(model)?;
        let family = config.resolved_family()?;
        let engine = self.cache.get_or_load(model).await?;

        let mut gen_options = options;
        gen_options.stop = merge_stop_tokens(family, &gen_options.stop);
        let stop_tokens: Vec<&'static str> = family.template().stop_tokens.to_vec();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            run_generate_only(engine, prompt, gen_options, stop_tokens, tx).await;
        });
        Ok(rx)
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let engine = self.cache.get_or_load(model).await?;
        engine.embed(text).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }
}

fn estimate(content: &str) -> usize {
    crate::session::budget::estimate_tokens(content)
}

fn build_prompt(family: Family, messages: &[BudgetedMessage]) -> Result<String> {
    let template = family.template();
    let compose_messages: Vec<ComposeMessage<'_>> = messages
        .iter()
        .map(|m| ComposeMessage {
            role: match m.role {
                StoredRole::System => TemplateRole::System,
                StoredRole::User => TemplateRole::User,
                StoredRole::Assistant => TemplateRole::Assistant,
            },
            content: m.content.as_str(),
        })
        .collect();

    compose_prompt(template, &compose_messages).map_err(|e| match e {
        ComposeError::EmptyMessages => CoreError::InvalidInput(e.to_string()),
        ComposeError::ControlTokenLeak(_) => CoreError::ConfigurationError(e.to_string()),
    })
}

fn merge_stop_tokens(family: Family, extra: &[String]) -> Vec<String> {
    let mut stops: Vec<String> = family.template().stop_tokens.iter().map(|s| s.to_string()).collect();
    for s in extra {
        if !stops.contains(s) {
            stops.push(s.clone());
        }
    }
    stops
}

async fn run_generation(
    engine: Arc<Engine>,
    sessions: Arc<SessionStore>,
    session_id: String,
    user_message: ChatMessage,
    prompt: String,
    options: GenerateOptions,
    stop_tokens: Vec<&'static str>,
    tx: mpsc::UnboundedSender<ChatEvent>,
) {
    let mut sanitizer = OutputSanitizer::new(&stop_tokens);
    let mut completion = String::new();
    let tx_for_tokens = tx.clone();

    let result = engine
        .generate(&prompt, &options, |piece| {
            match sanitizer.sanitize_token(piece) {
                SanitizeOutcome::Emit(text) => {
                    if !text.is_empty() {
                        completion.push_str(&text);
                        let _ = tx_for_tokens.send(ChatEvent::Token(text));
                    }
                }
                SanitizeOutcome::Suppress => {}
                SanitizeOutcome::Stop => return false,
            }
            !tx_for_tokens.is_closed()
        })
        .await;

    match result {
        Ok(usage) => {
            if tx.is_closed() {
                return;
            }
            if let Err(e) = sessions.add_message(&session_id, StoredRole::User, &user_message.content, None) {
                let _ = tx.send(ChatEvent::Error(e.to_string()));
                return;
            }
            let _ = sessions.add_message(
                &session_id,
                StoredRole::Assistant,
                &completion,
                Some(usage.completion_tokens),
            );
            let _ = tx.send(ChatEvent::Done { session_id, usage: Some(usage) });
        }
        Err(e) => {
            let _ = tx.send(ChatEvent::Error(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use crate::session::SessionStore;
    use std::io::Write;

    fn write_model(dir: &std::path::Path, name: &str, context_size: u32) {
        let model_dir = dir.join(name);
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::File::create(model_dir.join("model.gguf")).unwrap().write_all(b"fake").unwrap();
        let config = serde_json::json!({
            "name": name,
            "family": "llama3",
            "quantization": "Q4_K_M",
            "context_size": context_size,
            "template": "llama3",
        });
        std::fs::write(model_dir.join("config.json"), config.to_string()).unwrap();
    }

    fn orchestrator_with_model(context_size: u32) -> (tempfile::TempDir, Orchestrator) {
        let tmp = tempfile::tempdir().unwrap();
        write_model(tmp.path(), "tiny", context_size);

        let registry = Arc::new(ModelRegistry::new(tmp.path()));
        registry.scan().unwrap();

        let backend = Arc::new(
            llama_cpp_2::llama_backend::LlamaBackend::init().expect("backend init"),
        );
        let cache = Arc::new(ModelCache::new(2, registry.clone(), backend, -1, 4).unwrap());
        let sessions = Arc::new(SessionStore::open_in_memory().unwrap());

        (tmp, Orchestrator::new(registry, cache, sessions, Settings::default()))
    }

    #[tokio::test]
    async fn chat_reports_context_exceeded_before_touching_the_engine() {
        // context_size 50 minus max_tokens (512) minus the safety margin saturates to a budget
        // of 0, so even a single short message can never fit.
        let (_tmp, orchestrator) = orchestrator_with_model(50);
        let messages = vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }];
        let err = orchestrator
            .chat("tiny", messages, None, GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ContextExceeded { .. }));
    }
}

async fn run_generate_only(
    engine: Arc<Engine>,
    prompt: String,
    options: GenerateOptions,
    stop_tokens: Vec<&'static str>,
    tx: mpsc::UnboundedSender<ChatEvent>,
) {
    let mut sanitizer = OutputSanitizer::new(&stop_tokens);
    let tx_for_tokens = tx.clone();

    let result = engine
        .generate(&prompt, &options, |piece| {
            match sanitizer.sanitize_token(piece) {
                SanitizeOutcome::Emit(text) => {
                    if !text.is_empty() {
                        let _ = tx_for_tokens.send(ChatEvent::Token(text));
                    }
                }
                SanitizeOutcome::Suppress => {}
                SanitizeOutcome::Stop => return false,
            }
            !tx_for_tokens.is_closed()
        })
        .await;

    match result {
        Ok(usage) => {
            let _ = tx.send(ChatEvent::Done { session_id: String::new(), usage: Some(usage) });
        }
        Err(e) => {
            let _ = tx.send(ChatEvent::Error(e.to_string()));
        }
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference Engine Adapter (C4): a thin wrapper around `llama-cpp-2`.
//!
//! Weights are pinned once at `load` time; `generate`/`embed` each open a fresh
//! `LlamaContext` against the already-loaded model, matching how `llama-cpp-2` scopes
//! context lifetimes to the call that needs them. Only one `generate`/`embed` runs at a
//! time per engine (`inflight`), since a single context cannot safely serve two concurrent
//! decode loops.

use std::num::NonZeroU32;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy)]
pub struct UsageRecord {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            stop: Vec::new(),
        }
    }
}

/// A fully loaded model, ready to generate or embed. Weights stay pinned for the engine's
/// lifetime; dropping the engine releases them.
pub struct Engine {
    name: String,
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    ctx_size: u32,
    n_threads: i32,
    inflight: AsyncMutex<()>,
    last_usage: std::sync::Mutex<Option<UsageRecord>>,
}

impl Engine {
    pub fn load(
        backend: Arc<LlamaBackend>,
        name: &str,
        path: &std::path::Path,
        ctx_size: u32,
        n_gpu_layers: i32,
        n_threads: i32,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::ModelLoadError {
                name: name.to_string(),
                reason: format!("weights file not found at {}", path.display()),
            });
        }

        let gpu_layers = if n_gpu_layers < 0 { u32::MAX } else { n_gpu_layers as u32 };
        let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);

        let model = LlamaModel::load_from_file(&backend, path, &model_params).map_err(|e| {
            CoreError::ModelLoadError { name: name.to_string(), reason: e.to_string() }
        })?;

        Ok(Self {
            name: name.to_string(),
            backend,
            model,
            ctx_size,
            n_threads,
            inflight: AsyncMutex::new(()),
            last_usage: std::sync::Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map(|tokens| tokens.into_iter().map(|t| t.0).collect())
            .map_err(|e| CoreError::InferenceError(format!("tokenize failed: {e}")))
    }

    pub fn detokenize(&self, tokens: &[i32]) -> Result<String> {
        let mut out = String::new();
        for &id in tokens {
            let piece = self
                .model
                .token_to_str(llama_cpp_2::token::LlamaToken(id), Special::Plaintext)
                .map_err(|e| CoreError::InferenceError(format!("detokenize failed: {e}")))?;
            out.push_str(&piece);
        }
        Ok(out)
    }

    pub fn last_usage(&self) -> Option<UsageRecord> {
        *self.last_usage.lock().expect("usage lock poisoned")
    }

    fn new_context_params(&self) -> LlamaContextParams {
        LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.ctx_size))
            .with_n_threads(self.n_threads)
            .with_n_batch(512)
    }

    /// Run generation to completion, invoking `on_token` for each raw text fragment produced.
    /// `on_token` returns `false` to request early termination (client disconnect or a
    /// sanitizer-detected stop sequence external to the engine's own stop set).
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        mut on_token: impl FnMut(&str) -> bool + Send,
    ) -> Result<UsageRecord> {
        let _permit = self.inflight.lock().await;

        let prompt_tokens = self.tokenize(prompt)?;
        let prompt_token_count = prompt_tokens.len() as u32;

        let mut ctx = self
            .model
            .new_context(&self.backend, self.new_context_params())
            .map_err(|e| CoreError::InferenceError(format!("failed to create context: {e}")))?;

        let mut batch = LlamaBatch::new(512, 1);
        for (i, &token) in prompt_tokens.iter().enumerate() {
            let is_last = i == prompt_tokens.len() - 1;
            batch
                .add(llama_cpp_2::token::LlamaToken(token), i as i32, &[0], is_last)
                .map_err(|e| CoreError::InferenceError(format!("batch add failed: {e}")))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| CoreError::InferenceError(format!("prompt decode failed: {e}")))?;

        // Penalties are applied to raw logits before temperature/top_k/top_p resampling.
        // Frequency/presence penalty are pinned to 0.0: this runtime only exposes repeat_penalty.
        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::penalties(64, options.repeat_penalty, 0.0, 0.0),
            LlamaSampler::temp(options.temperature),
            LlamaSampler::top_k(options.top_k),
            LlamaSampler::top_p(options.top_p, 1),
            LlamaSampler::greedy(),
        ])
        .with_tokens(prompt_tokens.iter().copied().map(llama_cpp_2::token::LlamaToken));

        let mut completion_tokens = 0u32;
        let mut cursor = batch.n_tokens();
        let eos = self.model.token_eos();

        for _ in 0..options.max_tokens {
            let next = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(next);

            if next == eos {
                break;
            }

            let piece = self
                .model
                .token_to_str(next, Special::Plaintext)
                .map_err(|e| CoreError::InferenceError(format!("detokenize failed: {e}")))?;

            completion_tokens += 1;
            let keep_going = on_token(&piece);
            if !keep_going {
                break;
            }

            batch.clear();
            batch
                .add(next, cursor, &[0], true)
                .map_err(|e| CoreError::InferenceError(format!("batch add failed: {e}")))?;
            cursor += 1;

            ctx.decode(&mut batch)
                .map_err(|e| CoreError::InferenceError(format!("decode failed: {e}")))?;
        }

        let usage = UsageRecord { prompt_tokens: prompt_token_count, completion_tokens };
        *self.last_usage.lock().expect("usage lock poisoned") = Some(usage);
        Ok(usage)
    }

    /// Return the model's native embedding for `text`, by running the context in embeddings
    /// mode and reading back the pooled sequence embedding.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self.inflight.lock().await;

        let ctx_params = self.new_context_params().with_embeddings(true);
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| CoreError::InferenceError(format!("failed to create context: {e}")))?;

        let tokens = self.tokenize(text)?;
        let mut batch = LlamaBatch::new(512, 1);
        for (i, &token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(llama_cpp_2::token::LlamaToken(token), i as i32, &[0], is_last)
                .map_err(|e| CoreError::InferenceError(format!("batch add failed: {e}")))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| CoreError::InferenceError(format!("embedding decode failed: {e}")))?;

        ctx.embeddings_seq_ith(0)
            .map(|embedding| embedding.to_vec())
            .map_err(|e| CoreError::InferenceError(format!("embeddings unavailable: {e}")))
    }
}

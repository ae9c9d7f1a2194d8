// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Closed record of recognized generation options accepted over the wire.

use serde::Deserialize;

use crate::engine::GenerateOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RequestOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_tokens: u32,
    pub repeat_penalty: f32,
    pub stop: Vec<String>,
    /// Accepted for wire compatibility; the sampler chain this runtime uses has no equivalent
    /// knob, so these are parsed but not applied.
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        let defaults = GenerateOptions::default();
        Self {
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            top_k: defaults.top_k,
            max_tokens: defaults.max_tokens,
            repeat_penalty: defaults.repeat_penalty,
            stop: defaults.stop,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

impl From<RequestOptions> for GenerateOptions {
    fn from(opts: RequestOptions) -> Self {
        GenerateOptions {
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            top_p: opts.top_p,
            top_k: opts.top_k,
            repeat_penalty: opts.repeat_penalty,
            stop: opts.stop,
        }
    }
}

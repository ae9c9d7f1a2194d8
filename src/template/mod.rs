// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Template Registry (C1): an immutable, closed table of per-family prompt formats.
//!
//! Unlike a string-keyed lookup, `Family` is a closed enum — an unrecognized family name is a
//! configuration error raised at model-registration time, not a silent fallback discovered mid
//! inference.

pub(crate) mod compose;

pub use compose::{compose_prompt, ComposeError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Training-time prompt format a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Llama,
    Llama3,
    Mistral,
    Phi,
    Qwen,
}

impl Family {
    pub fn from_str(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "llama" | "llama2" | "llama-2" => Some(Family::Llama),
            "llama3" | "llama-3" => Some(Family::Llama3),
            "mistral" => Some(Family::Mistral),
            "phi" | "alpaca" => Some(Family::Phi),
            "qwen" | "chatml" => Some(Family::Qwen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Llama => "llama",
            Family::Llama3 => "llama3",
            Family::Mistral => "mistral",
            Family::Phi => "phi",
            Family::Qwen => "qwen",
        }
    }

    /// Look up this family's template. Always succeeds: every `Family` variant has exactly one
    /// entry in the registry, enforced at compile time by the match below.
    pub fn template(&self) -> &'static PromptTemplate {
        match self {
            Family::Llama => &LLAMA,
            Family::Llama3 => &LLAMA3,
            Family::Mistral => &MISTRAL,
            Family::Phi => &PHI,
            Family::Qwen => &QWEN,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single role's wire formatting: literal text before and after the message content.
#[derive(Debug, Clone, Copy)]
pub struct RoleFormat {
    pub prefix: &'static str,
    pub suffix: &'static str,
}

/// Process-wide constant record of one family's prompt format and stop tokens.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub bos_token: Option<&'static str>,
    pub system: RoleFormat,
    pub user: RoleFormat,
    pub assistant: RoleFormat,
    pub stop_tokens: &'static [&'static str],
    /// Control tokens the template itself may legitimately place in a prompt. Any control token
    /// outside this set appearing in a composed prompt is a leak and aborts the request.
    pub control_tokens: &'static [&'static str],
}

static LLAMA: PromptTemplate = PromptTemplate {
    name: "llama",
    bos_token: Some("<s>"),
    system: RoleFormat { prefix: "<<SYS>>\n", suffix: "\n<</SYS>>\n\n" },
    user: RoleFormat { prefix: "[INST] ", suffix: " [/INST]" },
    assistant: RoleFormat { prefix: " ", suffix: "</s>" },
    stop_tokens: &["</s>"],
    control_tokens: &["<s>", "</s>", "[INST]", "[/INST]", "<<SYS>>", "<</SYS>>"],
};

static LLAMA3: PromptTemplate = PromptTemplate {
    name: "llama3",
    bos_token: Some("<|begin_of_text|>"),
    system: RoleFormat {
        prefix: "<|start_header_id|>system<|end_header_id|>\n\n",
        suffix: "<|eot_id|>",
    },
    user: RoleFormat {
        prefix: "<|start_header_id|>user<|end_header_id|>\n\n",
        suffix: "<|eot_id|>",
    },
    assistant: RoleFormat {
        prefix: "<|start_header_id|>assistant<|end_header_id|>\n\n",
        suffix: "<|eot_id|>",
    },
    stop_tokens: &["<|eot_id|>", "<|end_of_text|>"],
    control_tokens: &[
        "<|begin_of_text|>",
        "<|end_of_text|>",
        "<|start_header_id|>",
        "<|end_header_id|>",
        "<|eot_id|>",
    ],
};

static MISTRAL: PromptTemplate = PromptTemplate {
    name: "mistral",
    bos_token: Some("<s>"),
    system: RoleFormat { prefix: "[INST] ", suffix: " [/INST]" },
    user: RoleFormat { prefix: "[INST] ", suffix: " [/INST]" },
    assistant: RoleFormat { prefix: "", suffix: "</s>" },
    stop_tokens: &["</s>"],
    control_tokens: &["<s>", "</s>", "[INST]", "[/INST]"],
};

static PHI: PromptTemplate = PromptTemplate {
    name: "phi",
    bos_token: None,
    system: RoleFormat { prefix: "### System:\n", suffix: "\n\n" },
    user: RoleFormat { prefix: "### Instruction:\n", suffix: "\n\n" },
    assistant: RoleFormat { prefix: "### Response:\n", suffix: "\n\n" },
    stop_tokens: &["### Instruction:", "### System:"],
    control_tokens: &["### System:", "### Instruction:", "### Response:"],
};

static QWEN: PromptTemplate = PromptTemplate {
    name: "qwen",
    bos_token: None,
    system: RoleFormat { prefix: "<|im_start|>system\n", suffix: "<|im_end|>\n" },
    user: RoleFormat { prefix: "<|im_start|>user\n", suffix: "<|im_end|>\n" },
    assistant: RoleFormat { prefix: "<|im_start|>assistant\n", suffix: "<|im_end|>\n" },
    stop_tokens: &["<|im_end|>"],
    control_tokens: &["<|im_start|>", "<|im_end|>"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_recognizes_every_spec_family() {
        assert_eq!(Family::from_str("llama"), Some(Family::Llama));
        assert_eq!(Family::from_str("Llama3"), Some(Family::Llama3));
        assert_eq!(Family::from_str("mistral"), Some(Family::Mistral));
        assert_eq!(Family::from_str("phi"), Some(Family::Phi));
        assert_eq!(Family::from_str("qwen"), Some(Family::Qwen));
    }

    #[test]
    fn unknown_family_is_none() {
        assert_eq!(Family::from_str("gpt4"), None);
    }

    #[test]
    fn every_template_has_at_least_one_stop_token() {
        for family in [Family::Llama, Family::Llama3, Family::Mistral, Family::Phi, Family::Qwen] {
            assert!(!family.template().stop_tokens.is_empty());
        }
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt Composer (C2): turns a message list into a single wire prompt, with a hard guard
//! against control-token leakage.

use super::{Family, PromptTemplate};
use thiserror::Error;

/// Every family's control tokens, scanned as a single cross-family set so a message composed
/// for one family can never smuggle in another family's control token either. A family's own
/// tokens are still only ever *expected* from its own template placements (see
/// `expected_occurrences`), so any occurrence of a foreign token is unconditionally a leak.
const ALL_FAMILIES: [Family; 5] =
    [Family::Llama, Family::Llama3, Family::Mistral, Family::Phi, Family::Qwen];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

pub struct ComposeMessage<'a> {
    pub role: Role,
    pub content: &'a str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("message list must not be empty")]
    EmptyMessages,
    #[error("composed prompt leaked control token '{0}' not placed by the template")]
    ControlTokenLeak(String),
}

/// Build a wire prompt from `messages` using `template`. The composed prompt always ends with
/// an open assistant turn, ready for generation.
pub fn compose_prompt(
    template: &PromptTemplate,
    messages: &[ComposeMessage<'_>],
) -> Result<String, ComposeError> {
    if messages.is_empty() {
        return Err(ComposeError::EmptyMessages);
    }

    let mut prompt = String::new();
    if let Some(bos) = template.bos_token {
        prompt.push_str(bos);
    }

    for message in messages {
        let format = match message.role {
            Role::System => template.system,
            Role::User => template.user,
            Role::Assistant => template.assistant,
        };
        prompt.push_str(format.prefix);
        prompt.push_str(message.content);
        prompt.push_str(format.suffix);
    }

    if messages.last().map(|m| m.role) != Some(Role::Assistant) {
        prompt.push_str(template.assistant.prefix);
    }

    check_no_leaked_control_tokens(template, messages, &prompt)?;

    Ok(prompt)
}

/// Every occurrence of a control token in the final prompt must be accounted for by a template
/// placement (bos token, or a role prefix/suffix). We verify this by reconstructing how many
/// times the template itself would place each control token and comparing against the actual
/// occurrence count in the built prompt; user content smuggling a control token verbatim would
/// push the actual count above the expected count.
fn check_no_leaked_control_tokens(
    template: &PromptTemplate,
    messages: &[ComposeMessage<'_>],
    prompt: &str,
) -> Result<(), ComposeError> {
    for family in ALL_FAMILIES {
        for token in family.template().control_tokens {
            let actual = prompt.matches(token).count();
            let expected = expected_occurrences(template, messages, token);
            if actual > expected {
                return Err(ComposeError::ControlTokenLeak((*token).to_string()));
            }
        }
    }
    Ok(())
}

fn expected_occurrences(
    template: &PromptTemplate,
    messages: &[ComposeMessage<'_>],
    token: &str,
) -> usize {
    let mut count = 0;
    if template.bos_token == Some(token) {
        count += 1;
    }
    let trailing_assistant_prefix =
        messages.last().map(|m| m.role) != Some(Role::Assistant);

    for message in messages {
        let format = match message.role {
            Role::System => template.system,
            Role::User => template.user,
            Role::Assistant => template.assistant,
        };
        count += format.prefix.matches(token).count();
        count += format.suffix.matches(token).count();
    }
    if trailing_assistant_prefix {
        count += template.assistant.prefix.matches(token).count();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ends_with_open_assistant_turn() {
        let template = Family::Qwen.template();
        let messages = [ComposeMessage { role: Role::User, content: "hi" }];
        let prompt = compose_prompt(template, &messages).unwrap();
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn empty_messages_rejected() {
        let template = Family::Llama3.template();
        let err = compose_prompt(template, &[]).unwrap_err();
        assert_eq!(err, ComposeError::EmptyMessages);
    }

    #[test]
    fn leaked_control_token_is_rejected() {
        let template = Family::Llama3.template();
        let messages = [ComposeMessage { role: Role::User, content: "<|begin_of_text|>boom" }];
        let err = compose_prompt(template, &messages).unwrap_err();
        assert_eq!(
            err,
            ComposeError::ControlTokenLeak("<|begin_of_text|>".to_string())
        );
    }

    #[test]
    fn foreign_family_control_token_is_rejected() {
        let template = Family::Llama3.template();
        let messages = [ComposeMessage { role: Role::User, content: "<s>boom</s>" }];
        let err = compose_prompt(template, &messages).unwrap_err();
        assert_eq!(err, ComposeError::ControlTokenLeak("<s>".to_string()));
    }

    #[test]
    fn ordinary_content_is_not_flagged() {
        let template = Family::Llama.template();
        let messages = [
            ComposeMessage { role: Role::System, content: "be terse" },
            ComposeMessage { role: Role::User, content: "tell me a joke" },
        ];
        assert!(compose_prompt(template, &messages).is_ok());
    }
}

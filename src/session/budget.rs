// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Context Budgeter (C8): deterministic truncation of conversation history to fit a token
//! budget, grounded on the prompt-assembly arithmetic in `core/runtime.py`'s
//! `prompt_max_tokens = context_size - max_tokens_generation - 100` policy.

use super::Role;

/// Per-message overhead approximating the role/separator tokens a template will add once the
/// message is composed into a prompt. Used only when no engine tokenizer is available yet.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

#[derive(Debug, Clone)]
pub struct BudgetedMessage {
    pub role: Role,
    pub content: String,
    pub tokens: usize,
}

/// Rough token estimate (chars / 4, rounded up) plus fixed per-message overhead. Used before a
/// model is loaded; once an engine is available callers should prefer its own tokenizer counts.
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count().div_ceil(4) + MESSAGE_OVERHEAD_TOKENS
}

/// Truncate `messages` to fit within `budget` tokens.
///
/// Policy: every `system` message is always kept, the last non-system message is always kept,
/// and earlier messages are admitted by walking backwards from the end until the next message
/// would exceed the budget. This is deterministic and monotonic: a larger budget can only grow
/// the retained set, never shrink it (spec'd truncation law).
pub fn truncate_to_budget(messages: &[BudgetedMessage], budget: usize) -> Vec<BudgetedMessage> {
    if messages.is_empty() {
        return Vec::new();
    }

    let last_non_system = messages.iter().rposition(|m| m.role != Role::System);

    let mut kept = vec![false; messages.len()];
    let mut used = 0usize;

    for (i, m) in messages.iter().enumerate() {
        if m.role == Role::System {
            kept[i] = true;
            used += m.tokens;
        }
    }
    if let Some(i) = last_non_system {
        if !kept[i] {
            kept[i] = true;
            used += messages[i].tokens;
        }
    }

    for i in (0..messages.len()).rev() {
        if kept[i] {
            continue;
        }
        let cost = messages[i].tokens;
        if used + cost > budget {
            break;
        }
        kept[i] = true;
        used += cost;
    }

    messages
        .iter()
        .zip(kept.iter())
        .filter(|(_, &k)| k)
        .map(|(m, _)| m.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> BudgetedMessage {
        let tokens = estimate_tokens(content);
        BudgetedMessage { role, content: content.to_string(), tokens }
    }

    #[test]
    fn keeps_system_and_last_message_even_under_tight_budget() {
        let messages = vec![
            msg(Role::System, "be concise"),
            msg(Role::User, "hello"),
            msg(Role::Assistant, "hi there"),
            msg(Role::User, "what is rust"),
        ];
        let kept = truncate_to_budget(&messages, 1);
        assert!(kept.iter().any(|m| m.role == Role::System));
        assert_eq!(kept.last().unwrap().content, "what is rust");
    }

    #[test]
    fn larger_budget_never_shrinks_the_retained_set() {
        let messages: Vec<_> = (0..10)
            .map(|i| msg(Role::User, &format!("message number {i}")))
            .collect();

        let small = truncate_to_budget(&messages, 20);
        let large = truncate_to_budget(&messages, 200);

        assert!(large.len() >= small.len());
        for m in &small {
            assert!(large.iter().any(|l| l.content == m.content));
        }
    }

    #[test]
    fn empty_history_yields_empty_result() {
        assert!(truncate_to_budget(&[], 1000).is_empty());
    }

    #[test]
    fn fits_everything_when_budget_is_generous() {
        let messages = vec![
            msg(Role::System, "sys"),
            msg(Role::User, "a"),
            msg(Role::Assistant, "b"),
            msg(Role::User, "c"),
        ];
        let kept = truncate_to_budget(&messages, 10_000);
        assert_eq!(kept.len(), messages.len());
    }
}

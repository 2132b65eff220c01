// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flattens an OpenAI-style message history into the upstream's single-prompt
//! form: a separate system-prompt string plus a `Human:`/`Assistant:`
//! transcript ending with a trailing `Assistant:` cue.

use serde::Deserialize;

/// One inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Build the (system_prompt, prompt) pair from a message history.
///
/// System messages are concatenated (blank-line joined) into the system
/// prompt regardless of position. Empty-content messages are dropped, unknown
/// roles are dropped with a warning.
pub fn build_prompt(messages: &[ChatMessage]) -> (String, String) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut blocks: Vec<String> = Vec::new();

    for message in messages {
        let content = message.content.trim();
        if content.is_empty() {
            continue;
        }
        match message.role.to_ascii_lowercase().as_str() {
            "system" => system_parts.push(content),
            "user" | "human" => blocks.push(format!("Human: {content}")),
            "assistant" | "ai" => blocks.push(format!("Assistant: {content}")),
            other => {
                tracing::warn!(role = %other, "dropping message with unrecognized role");
            }
        }
    }

    let system_prompt = system_parts.join("\n\n");
    let mut prompt = blocks.join("\n\n");
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str("Assistant:");

    (system_prompt, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage { role: role.to_owned(), content: content.to_owned() }
    }

    #[test]
    fn prompt_ends_with_assistant_cue() {
        let (_, prompt) = build_prompt(&[msg("user", "hi")]);
        assert!(prompt.ends_with("Assistant:"));
        assert_eq!(prompt, "Human: hi\n\nAssistant:");
    }

    #[test]
    fn leading_system_message_goes_to_system_prompt() {
        let (system, prompt) =
            build_prompt(&[msg("system", "be terse"), msg("user", "hi")]);
        assert_eq!(system, "be terse");
        assert!(!prompt.contains("be terse"));
    }

    #[test]
    fn later_system_messages_are_appended() {
        let (system, _) = build_prompt(&[
            msg("system", "one"),
            msg("user", "hi"),
            msg("system", "two"),
        ]);
        assert_eq!(system, "one\n\ntwo");
    }

    #[test]
    fn empty_messages_are_dropped() {
        let (_, prompt) = build_prompt(&[
            msg("user", "hi"),
            msg("assistant", "   "),
            msg("user", "again"),
        ]);
        assert_eq!(prompt, "Human: hi\n\nHuman: again\n\nAssistant:");
        assert!(!prompt.contains("Assistant: \n"));
    }

    #[test]
    fn unknown_roles_are_dropped_not_rejected() {
        let (_, prompt) = build_prompt(&[msg("tool", "result"), msg("user", "hi")]);
        assert_eq!(prompt, "Human: hi\n\nAssistant:");
    }

    #[test]
    fn alternating_history_keeps_order() {
        let (_, prompt) = build_prompt(&[
            msg("user", "q1"),
            msg("assistant", "a1"),
            msg("human", "q2"),
            msg("ai", "a2"),
        ]);
        assert_eq!(
            prompt,
            "Human: q1\n\nAssistant: a1\n\nHuman: q2\n\nAssistant: a2\n\nAssistant:"
        );
    }

    #[test]
    fn empty_history_yields_bare_cue() {
        let (system, prompt) = build_prompt(&[]);
        assert!(system.is_empty());
        assert_eq!(prompt, "Assistant:");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static model table: client-visible alias -> upstream model id.
//!
//! Order matters: unknown aliases fall back to the first entry.

pub const MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-3-7-sonnet-thinking", "claude-3-7-sonnet-20250219"),
    ("claude-4-sonnet-thinking", "claude-4-sonnet-20250514"),
    ("claude-4-opus-thinking", "claude-4-opus-20250514"),
    ("deepseek-r1", "deepseek-reasoner"),
    ("deepseek-v3", "deepseek-chat"),
    ("gemini-2.5-flash-preview", "gemini-2.5-flash-preview-04-17"),
    ("gemini-2.5-pro-preview", "gemini-2.5-pro-preview-05-06"),
    ("gpt-4.1", "gpt-4.1"),
    ("gpt-4.1-mini", "gpt-4.1-mini"),
    ("gpt-4o", "gpt-4o"),
    ("o3", "o3"),
    ("o4-mini", "o4-mini"),
    ("grok-3", "grok-3"),
];

/// Default alias used when the request omits a model.
pub fn default_alias() -> &'static str {
    MODEL_MAPPING[0].0
}

/// Resolve a client alias to the upstream model id. Unknown aliases fall back
/// to the first table entry.
pub fn resolve(alias: &str) -> &'static str {
    MODEL_MAPPING
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, id)| *id)
        .unwrap_or(MODEL_MAPPING[0].1)
}

/// Client-visible alias list for `/v1/models`.
pub fn aliases() -> impl Iterator<Item = &'static str> {
    MODEL_MAPPING.iter().map(|(name, _)| *name)
}

/// Whether an upstream model id activates reasoning, per the configured
/// substring patterns.
pub fn reasoning_enabled(upstream_id: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| upstream_id.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_alias() {
        assert_eq!(resolve("deepseek-r1"), "deepseek-reasoner");
        assert_eq!(resolve("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn resolve_unknown_falls_back_to_first_entry() {
        assert_eq!(resolve("not-a-model"), MODEL_MAPPING[0].1);
    }

    #[test]
    fn reasoning_matches_substrings() {
        let patterns = vec!["claude".to_owned()];
        assert!(reasoning_enabled("claude-4-opus-20250514", &patterns));
        assert!(!reasoning_enabled("gpt-4o", &patterns));
        assert!(!reasoning_enabled("claude-4-opus-20250514", &[]));
    }
}

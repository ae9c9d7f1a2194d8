// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Version information for the local LLM runtime.

/// Semantic version number.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get a formatted version string for logging.
pub fn get_version_string() -> String {
    format!("myllm {}", VERSION)
}

/// Get version info as JSON for the `/` endpoint.
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "name": "myllm",
        "version": VERSION,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_contains_name() {
        assert!(get_version_string().starts_with("myllm"));
    }
}

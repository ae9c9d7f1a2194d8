// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process settings: a TOML file (if present) overridden by `MYLLM_*` environment variables.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const ENV_PREFIX: &str = "MYLLM_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_context_size")]
    pub default_context_size: u32,
    #[serde(default = "default_gpu_layers")]
    pub default_n_gpu_layers: i32,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_top_p")]
    pub default_top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_max_loaded_models")]
    pub max_loaded_models: usize,
    #[serde(default = "default_retention_days")]
    pub session_retention_days: u32,
    #[serde(default = "default_max_session_messages")]
    pub max_session_messages: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            models_dir: default_models_dir(),
            db_path: default_db_path(),
            default_context_size: default_context_size(),
            default_n_gpu_layers: default_gpu_layers(),
            default_temperature: default_temperature(),
            default_top_p: default_top_p(),
            default_max_tokens: default_max_tokens(),
            max_loaded_models: default_max_loaded_models(),
            session_retention_days: default_retention_days(),
            max_session_messages: default_max_session_messages(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file with `MYLLM_*` env var overrides.
    ///
    /// Checks in order: explicit `config_path`, then `./myllm.toml` if it exists. A missing
    /// file is not an error — defaults plus env overrides are enough to start.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.map(String::from).unwrap_or_else(default_config_path);

        let settings: Settings = Figment::from(figment::providers::Serialized::defaults(
            Settings::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| CoreError::ConfigurationError(e.to_string()))?;

        if settings.max_loaded_models == 0 {
            return Err(CoreError::ConfigurationError(
                "max_loaded_models must be at least 1".to_string(),
            ));
        }
        if settings.default_context_size == 0 {
            return Err(CoreError::ConfigurationError(
                "default_context_size must be greater than 0".to_string(),
            ));
        }

        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_models_dir() -> String {
    "models".to_string()
}
fn default_db_path() -> String {
    "myllm.db".to_string()
}
fn default_context_size() -> u32 {
    4096
}
fn default_gpu_layers() -> i32 {
    -1
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    512
}
fn default_max_loaded_models() -> usize {
    3
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_session_messages() -> usize {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_config_path() -> String {
    "myllm.toml".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.max_loaded_models, 3);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let settings = Settings::load(Some("/nonexistent/path/myllm.toml")).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("MYLLM_PORT", "9999");
        let settings = Settings::load(Some("/nonexistent/path/myllm.toml")).unwrap();
        std::env::remove_var("MYLLM_PORT");
        assert_eq!(settings.port, 9999);
    }
}

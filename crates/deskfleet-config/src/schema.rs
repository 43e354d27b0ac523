// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_data_root() -> String {
    "~/intvrface".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_words() -> usize {
    64_000
}

fn default_preserve_last() -> usize {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data_root: DataRootConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Wrapper so `data_root: ~/intvrface` deserializes as a bare scalar while
/// still getting a typed default via `#[serde(default)]` on `Config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRootConfig(pub String);

impl Default for DataRootConfig {
    fn default() -> Self {
        Self(default_data_root())
    }
}

impl DataRootConfig {
    /// Expand `~` and environment variables, returning an absolute path.
    pub fn expanded(&self) -> std::path::PathBuf {
        shellexpand::full(&self.0)
            .map(|s| std::path::PathBuf::from(s.into_owned()))
            .unwrap_or_else(|_| std::path::PathBuf::from(&self.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Word-count ceiling at which `needs_summary()` becomes true.
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Number of most recent messages preserved verbatim on summarization.
    #[serde(default = "default_preserve_last")]
    pub preserve_last: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            preserve_last: default_preserve_last(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the Hub's HTTP/websocket server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "mock" | "openai" | "anthropic" | ...
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name forwarded to the provider API.
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Base URL override, for local proxies / OpenAI-compatible servers.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model_name() -> String {
    "mock-1".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_model_name(),
            api_key_env: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_provider_is_mock() {
        let c = Config::default();
        assert_eq!(c.model.provider, "mock");
    }

    #[test]
    fn config_default_max_words_matches_reference() {
        let c = Config::default();
        assert_eq!(c.context.max_words, 64_000);
    }

    #[test]
    fn config_default_preserve_last_is_five() {
        let c = Config::default();
        assert_eq!(c.context.preserve_last, 5);
    }

    #[test]
    fn config_default_bind_address() {
        let c = Config::default();
        assert_eq!(c.http.bind, "0.0.0.0:8000");
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml = "model:\n  provider: anthropic\n  name: claude-opus-4-5\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.model.provider, "anthropic");
        assert_eq!(c.context.max_words, 64_000);
        assert_eq!(c.http.bind, "0.0.0.0:8000");
    }

    #[test]
    fn data_root_expands_tilde() {
        let d = DataRootConfig("~/intvrface".to_string());
        let expanded = d.expanded();
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn config_round_trip_yaml() {
        let mut c = Config::default();
        c.context.max_words = 30_000;
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.context.max_words, 30_000);
    }
}

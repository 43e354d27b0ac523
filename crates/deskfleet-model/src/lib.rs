// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod mock;
mod openai_compat;
mod provider;
pub mod prompts;

pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{Kv, ModelError, ModelProvider};

use deskfleet_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration. `"mock"` (the
/// default) needs no network access; anything else is routed through the
/// OpenAI-compatible reference driver, since implementing every provider's
/// native wire format is out of scope.
pub fn from_config(cfg: &ModelConfig) -> Box<dyn ModelProvider> {
    if cfg.provider == "mock" {
        return Box::new(MockProvider);
    }

    let api_key = cfg
        .api_key_env
        .as_ref()
        .and_then(|var| std::env::var(var).ok());
    let base_url = cfg
        .base_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

    Box::new(OpenAiCompatProvider::new(
        cfg.provider.clone(),
        cfg.name.clone(),
        api_key,
        &base_url,
        cfg.max_tokens,
        cfg.temperature,
    ))
}

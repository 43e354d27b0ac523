// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use deskfleet_context::Message;

/// Failure surfaced by a provider call. The Turn Engine treats any of these
/// as a recoverable turn failure: the turn aborts, the agent keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("network error talking to model provider: {0}")]
    Network(#[from] reqwest::Error),
    #[error("rate limited by model provider")]
    RateLimit,
    #[error("model provider rejected the request: {0}")]
    Policy(String),
    #[error("model provider returned an unexpected response: {0}")]
    Protocol(String),
}

/// A provider's opaque continuation state. Providers that don't expose one
/// (every HTTP API) always return `None`.
pub type Kv = Option<Vec<u8>>;

/// Uniform async contract the Turn Engine drives every agent through.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display and logging.
    fn name(&self) -> &str;

    /// Complete in response to a system prompt documenting the command
    /// grammar. Output is free text that may contain zero or more command
    /// blocks. Returns the opaque continuation state the caller should pass
    /// back on the next call for this same agent.
    async fn respond(&self, messages: &[Message], kv: Kv) -> Result<(String, Kv), ModelError>;

    /// Complete under a dedicated summarization system prompt with a
    /// smaller token ceiling, returning the summary body.
    async fn summarize(&self, messages: &[Message], kv: Kv) -> Result<(String, Kv), ModelError>;
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deskfleet_context::{Block, Message, Role};

use crate::provider::{Kv, ModelError, ModelProvider};

/// Deterministic mock provider for tests and local smoke-testing. Echoes the
/// last user/environment message back prefixed `MOCK:`. Never exposes a kv
/// handle (`Kv` is always `None` in, `None` out), matching how a stateless
/// HTTP API behaves.
#[derive(Default)]
pub struct MockProvider;

fn last_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find_map(|m| {
            m.content.iter().find_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                Block::Image { .. } => None,
            })
        })
        .unwrap_or("[no input]")
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn respond(&self, messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        Ok((format!("MOCK: {}", last_text(messages)), None))
    }

    async fn summarize(&self, messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        let words: usize = messages.iter().map(Message::word_count).sum();
        Ok((format!("mock summary of {words} words across {} messages", messages.len()), None))
    }
}

/// A pre-scripted mock provider. Each call to `respond` pops the next
/// response from the front of the queue, falling back to a fixed string once
/// exhausted. Lets tests drive specific multi-turn conversations without
/// network access.
pub struct ScriptedMockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    /// The messages most recently passed to `respond`, for test assertions.
    pub last_request: Arc<Mutex<Option<Vec<Message>>>>,
}

impl ScriptedMockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn respond(&self, messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        *self.last_request.lock().unwrap() = Some(messages.to_vec());
        let mut scripts = self.responses.lock().unwrap();
        if scripts.is_empty() {
            Ok(("[no more scripts]".to_string(), None))
        } else {
            Ok((scripts.remove(0), None))
        }
    }

    async fn summarize(&self, _messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        Ok(("scripted summary".to_string(), None))
    }
}

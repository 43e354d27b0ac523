// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reference HTTP-backed driver speaking the OpenAI-compatible
//! `/chat/completions` wire format. Covers OpenAI itself and the many
//! local/hosted servers (Ollama, vLLM, OpenRouter, Groq, ...) that mirror it.
//! Implementing every provider's native wire format is out of scope; this one
//! driver plus the mock are all the binary ships with.

use async_trait::async_trait;
use deskfleet_context::{Block, Message, Role};
use serde_json::{json, Value};

use crate::provider::{Kv, ModelError, ModelProvider};

pub struct OpenAiCompatProvider {
    name: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` ends before `/chat/completions`, e.g. `https://api.openai.com/v1`.
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            name: name.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, messages: &[Message], system: &str) -> Result<String, ModelError> {
        let mut body_messages = vec![json!({"role": "system", "content": system})];
        body_messages.extend(messages.iter().map(to_openai_message));

        let body = json!({
            "model": self.model,
            "messages": body_messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let mut req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelError::RateLimit);
        }
        if resp.status().is_client_error() && resp.status() != reqwest::StatusCode::BAD_REQUEST {
            return Err(ModelError::Policy(resp.status().to_string()));
        }
        let resp = resp.error_for_status()?;
        let parsed: Value = resp.json().await?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ModelError::Protocol("missing choices[0].message.content".to_string()))
    }
}

fn to_openai_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User | Role::Environment => "user",
        Role::Assistant | Role::Command => "assistant",
    };

    if msg.content.len() == 1 {
        if let Block::Text { text } = &msg.content[0] {
            return json!({"role": role, "content": text});
        }
    }

    let parts: Vec<Value> = msg
        .content
        .iter()
        .map(|block| match block {
            Block::Text { text } => json!({"type": "text", "text": text}),
            Block::Image { source } => json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{};base64,{}", source.media_type, source.data)},
            }),
        })
        .collect();
    json!({"role": role, "content": parts})
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        let text = self
            .complete(messages, crate::prompts::SYSTEM_PROMPT)
            .await?;
        Ok((text, None))
    }

    async fn summarize(&self, messages: &[Message], _kv: Kv) -> Result<(String, Kv), ModelError> {
        let text = self
            .complete(messages, crate::prompts::SUMMARIZATION_PROMPT)
            .await?;
        Ok((text, None))
    }
}

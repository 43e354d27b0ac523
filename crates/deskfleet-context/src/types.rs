// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// The four roles a message can be stored under. `marshal()` remaps the
/// storage-only roles down to the two the model API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// System injections: screenshots, terminal tails, error reminders,
    /// keepalive prompts. Marshaled to `user`.
    Environment,
    /// Verbatim command blocks sliced out of a model response. Marshaled
    /// to `assistant`.
    Command,
}

impl Role {
    /// The role this storage role presents as to the model API.
    pub fn marshaled(self) -> Role {
        match self {
            Role::Environment => Role::User,
            Role::Command => Role::Assistant,
            other => other,
        }
    }
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Text { text: String },
    Image { source: ImageSource },
}

impl Block {
    pub fn text(s: impl Into<String>) -> Self {
        Block::Text { text: s.into() }
    }

    pub fn image_png(bytes: &[u8]) -> Self {
        use base64::Engine;
        Block::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: "image/png".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }
    }

    /// Word weight for the summarization budget: text is split on
    /// whitespace, an image counts as a flat 1000 words.
    pub fn word_count(&self) -> usize {
        match self {
            Block::Text { text } => text.split_whitespace().count(),
            Block::Image { .. } => 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

/// A stored or marshaled message: one role, one or more content blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Block>,
}

impl Message {
    pub fn new(role: Role, block: Block) -> Self {
        Self {
            role,
            content: vec![block],
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.iter().map(Block::word_count).sum()
    }
}

/// Append `block` under `role` to `list`, collapsing into the last entry
/// when it already carries the same role.
pub fn collapse_append(list: &mut Vec<Message>, role: Role, block: Block) {
    if let Some(last) = list.last_mut() {
        if last.role == role {
            last.content.push(block);
            return;
        }
    }
    list.push(Message::new(role, block));
}

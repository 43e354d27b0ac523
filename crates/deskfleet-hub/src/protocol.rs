// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire types for the `/ws` JSON protocol. Commands flow browser -> Hub
//! tagged by `cmd`; events flow Hub -> browser(s) tagged by `type`.

use deskfleet_context::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HubCommand {
    List,
    Create { name: String, novnc_port: u16 },
    Start { name: String },
    Pause { name: String },
    Delete { name: String },
    ChatMode { name: String, enabled: bool },
    Chat { name: String, text: String },
    GetContext { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub container_on: bool,
    pub working: bool,
    pub novnc_port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Agents { agents: Vec<AgentSummary> },
    Context { name: String, messages: Vec<Message> },
    Error { msg: String },
}

impl HubEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        HubEvent::Error { msg: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tag_matches_spec_wire_format() {
        let cmd: HubCommand = serde_json::from_str(r#"{"cmd":"chat","name":"a","text":"hi"}"#).unwrap();
        assert!(matches!(cmd, HubCommand::Chat { .. }));
    }

    #[test]
    fn list_command_has_no_extra_fields() {
        let cmd: HubCommand = serde_json::from_str(r#"{"cmd":"list"}"#).unwrap();
        assert!(matches!(cmd, HubCommand::List));
    }

    #[test]
    fn agents_event_serializes_with_type_tag() {
        let ev = HubEvent::Agents {
            agents: vec![AgentSummary {
                name: "a".into(),
                container_on: true,
                working: false,
                novnc_port: 6080,
            }],
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "agents");
        assert_eq!(json["agents"][0]["name"], "a");
    }

    #[test]
    fn error_event_carries_msg() {
        let ev = HubEvent::error("boom");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["msg"], "boom");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `HubService` -- owns every agent and processes operator commands.
//!
//! # Design
//!
//! ```text
//!   ws handler A ──┐
//!                  ├──► mpsc::Sender<(HubCommand, oneshot)> ──► HubService
//!   ws handler B ──┘                                               │
//!                                                      owns agents │
//!                                                    serially      │
//!   ws handler A ◄──┐                                              │
//!                   ├── broadcast::Receiver<HubEvent> ◄────────────┘
//!   ws handler B ◄──┘
//!
//!   per-agent work task ──► mpsc::Sender<InternalEvent> ──► HubService
//! ```
//!
//! Each agent's work loop runs as its own tokio task, one turn at a time,
//! taking the agent's mutex only for the duration of a single `turn()` call
//! so that `chat`/`chat_mode`/`get_context` never wait longer than one turn.
//! `pause` never aborts a turn in flight -- it flips a flag the loop checks
//! before starting its next one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deskfleet_config::ContextConfig;
use deskfleet_context::Context;
use deskfleet_core::Agent;
use deskfleet_model::ModelProvider;
use deskfleet_sandbox::Container;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{info, warn};

use crate::protocol::{AgentSummary, HubCommand, HubEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CMD_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedAgent {
    name: String,
    novnc_port: u16,
}

struct AgentSlot {
    agent: Arc<Mutex<Agent>>,
    novnc_port: u16,
    /// Cached clone of the agent's own running flag -- checking it never
    /// requires the mutex.
    working: Arc<AtomicBool>,
    /// Guards against double-spawning a work loop for the same agent.
    task_running: Arc<AtomicBool>,
}

enum InternalEvent {
    Context {
        name: String,
        messages: Vec<deskfleet_context::Message>,
    },
}

/// Cheap-to-clone handle to the running [`HubService`]. Transport handlers
/// (websocket connections) hold one of these each.
#[derive(Clone)]
pub struct Hub {
    cmd_tx: mpsc::Sender<(HubCommand, oneshot::Sender<Option<HubEvent>>)>,
    events_tx: broadcast::Sender<HubEvent>,
}

impl Hub {
    /// Send a command and await its direct reply, if the command has one
    /// (`list`, `get_context`, or an error). Mutation commands reply `None`
    /// -- their effect arrives on the broadcast stream instead.
    pub async fn dispatch(&self, cmd: HubCommand) -> Option<HubEvent> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send((cmd, tx)).await.is_err() {
            return Some(HubEvent::error("hub service has shut down"));
        }
        match rx.await {
            Ok(reply) => reply,
            Err(_) => Some(HubEvent::error("hub service dropped the reply")),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events_tx.subscribe()
    }

    /// A fresh `agents` snapshot, for sending immediately on client connect.
    pub async fn agents_snapshot(&self) -> HubEvent {
        self.dispatch(HubCommand::List)
            .await
            .unwrap_or(HubEvent::Agents { agents: vec![] })
    }
}

pub struct HubService {
    data_root: PathBuf,
    context_cfg: ContextConfig,
    model: Arc<dyn ModelProvider>,
    agents: HashMap<String, AgentSlot>,
    cmd_rx: mpsc::Receiver<(HubCommand, oneshot::Sender<Option<HubEvent>>)>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,
    events_tx: broadcast::Sender<HubEvent>,
}

impl HubService {
    /// Construct the service and a cheap [`Hub`] handle to it. Existing
    /// agents are reloaded from `agents.json` (stopped; `start` must be
    /// called again to resume their work loop).
    pub fn new(data_root: PathBuf, context_cfg: ContextConfig, model: Arc<dyn ModelProvider>) -> (Hub, Self) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut service = Self {
            data_root,
            context_cfg,
            model,
            agents: HashMap::new(),
            cmd_rx,
            internal_rx,
            internal_tx,
            events_tx: events_tx.clone(),
        };
        service.bootstrap();

        let hub = Hub { cmd_tx, events_tx };
        (hub, service)
    }

    fn agents_json_path(&self) -> PathBuf {
        self.data_root.join("agents.json")
    }

    fn bootstrap(&mut self) {
        let path = self.agents_json_path();
        let Ok(text) = std::fs::read_to_string(&path) else {
            return;
        };
        let Ok(persisted) = serde_json::from_str::<Vec<PersistedAgent>>(&text) else {
            warn!(path = %path.display(), "agents.json is corrupt, ignoring");
            return;
        };
        for p in persisted {
            if let Err(e) = self.insert_agent(&p.name, p.novnc_port) {
                warn!(agent = %p.name, error = %e, "failed to reload agent from agents.json");
            }
        }
    }

    fn insert_agent(&mut self, name: &str, novnc_port: u16) -> anyhow::Result<()> {
        let context = Context::open(
            &self.data_root,
            name,
            self.context_cfg.max_words,
            self.context_cfg.preserve_last,
        )?;
        let sandbox = Container::new(name, &self.data_root, novnc_port);
        let agent = Agent::new(name, context, sandbox, self.model.clone());
        let working = agent.pause_handle();
        self.agents.insert(
            name.to_string(),
            AgentSlot {
                agent: Arc::new(Mutex::new(agent)),
                novnc_port,
                working,
                task_running: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    fn persist(&self) {
        let list: Vec<PersistedAgent> = self
            .agents
            .iter()
            .map(|(name, slot)| PersistedAgent {
                name: name.clone(),
                novnc_port: slot.novnc_port,
            })
            .collect();
        if let Ok(text) = serde_json::to_string_pretty(&list) {
            if let Err(e) = std::fs::create_dir_all(&self.data_root) {
                warn!(error = %e, "failed to create data root");
                return;
            }
            if let Err(e) = std::fs::write(self.agents_json_path(), text) {
                warn!(error = %e, "failed to persist agents.json");
            }
        }
    }

    async fn summaries(&self) -> Vec<AgentSummary> {
        let mut out = Vec::with_capacity(self.agents.len());
        for (name, slot) in &self.agents {
            let container_on = slot.agent.lock().await.sandbox().is_running();
            out.push(AgentSummary {
                name: name.clone(),
                container_on,
                working: slot.working.load(Ordering::SeqCst),
                novnc_port: slot.novnc_port,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    async fn broadcast_agents(&self) {
        let agents = self.summaries().await;
        let _ = self.events_tx.send(HubEvent::Agents { agents });
    }

    /// Drive the service until every `Hub` handle (and thus `cmd_tx`) is
    /// dropped. Runs forever in practice -- spawned once at startup.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some((cmd, reply)) => {
                            let direct = self.handle(cmd).await;
                            let _ = reply.send(direct);
                        }
                        None => break,
                    }
                }
                ev = self.internal_rx.recv() => {
                    match ev {
                        Some(InternalEvent::Context { name, messages }) => {
                            let _ = self.events_tx.send(HubEvent::Context { name, messages });
                        }
                        None => {}
                    }
                }
            }
        }
    }

    async fn handle(&mut self, cmd: HubCommand) -> Option<HubEvent> {
        match cmd {
            HubCommand::List => Some(HubEvent::Agents {
                agents: self.summaries().await,
            }),
            HubCommand::Create { name, novnc_port } => {
                if self.agents.contains_key(&name) {
                    return Some(HubEvent::error(format!("agent '{name}' already exists")));
                }
                if let Err(e) = self.insert_agent(&name, novnc_port) {
                    return Some(HubEvent::error(format!("failed to create '{name}': {e}")));
                }
                self.persist();
                self.broadcast_agents().await;
                None
            }
            HubCommand::Start { name } => {
                let Some(slot) = self.agents.get(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                let agent = slot.agent.clone();
                let build_result = tokio::task::spawn_blocking(move || {
                    let mut guard = agent.blocking_lock();
                    if !guard.sandbox().is_running() {
                        guard.sandbox_mut().start()?;
                    }
                    if guard.context().is_empty() {
                        guard.chat("start working").map_err(|e| {
                            deskfleet_sandbox::SandboxError::Build(e.to_string())
                        })?;
                    }
                    Ok::<_, deskfleet_sandbox::SandboxError>(())
                })
                .await;
                match build_result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Some(HubEvent::error(format!("failed to start '{name}': {e}"))),
                    Err(e) => return Some(HubEvent::error(format!("start task panicked: {e}"))),
                }

                slot.working.store(true, Ordering::SeqCst);
                if !slot.task_running.swap(true, Ordering::SeqCst) {
                    spawn_work_loop(
                        name.clone(),
                        slot.agent.clone(),
                        slot.working.clone(),
                        slot.task_running.clone(),
                        self.internal_tx.clone(),
                    );
                }
                self.broadcast_agents().await;
                None
            }
            HubCommand::Pause { name } => {
                let Some(slot) = self.agents.get(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                slot.working.store(false, Ordering::SeqCst);
                self.broadcast_agents().await;
                None
            }
            HubCommand::Delete { name } => {
                let Some(slot) = self.agents.remove(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                slot.working.store(false, Ordering::SeqCst);
                let data_root = self.data_root.clone();
                let agent = slot.agent.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let mut guard = agent.blocking_lock();
                    let context_dir = data_root.join("context").join(guard.name());
                    guard.sandbox_mut().destroy(&context_dir)
                })
                .await;
                if let Ok(Err(e)) = result {
                    warn!(agent = %name, error = %e, "failed to destroy sandbox during delete");
                }
                self.persist();
                self.broadcast_agents().await;
                None
            }
            HubCommand::ChatMode { name, enabled } => {
                let Some(slot) = self.agents.get(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                {
                    let mut guard = slot.agent.lock().await;
                    guard.set_chat_mode(enabled);
                }
                if enabled {
                    slot.working.store(false, Ordering::SeqCst);
                } else {
                    slot.working.store(true, Ordering::SeqCst);
                    if !slot.task_running.swap(true, Ordering::SeqCst) {
                        spawn_work_loop(
                            name.clone(),
                            slot.agent.clone(),
                            slot.working.clone(),
                            slot.task_running.clone(),
                            self.internal_tx.clone(),
                        );
                    }
                }
                self.broadcast_agents().await;
                None
            }
            HubCommand::Chat { name, text } => {
                let Some(slot) = self.agents.get(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                let mut guard = slot.agent.lock().await;
                if let Err(e) = guard.chat(&text) {
                    return Some(HubEvent::error(format!("chat failed for '{name}': {e}")));
                }
                if guard.chat_mode() {
                    if let Err(e) = guard.turn(None).await {
                        warn!(agent = %name, error = %e, "chat-mode turn failed");
                    }
                }
                let messages = guard.context().messages().to_vec();
                drop(guard);
                let _ = self.events_tx.send(HubEvent::Context { name, messages });
                None
            }
            HubCommand::GetContext { name } => {
                let Some(slot) = self.agents.get(&name) else {
                    return Some(HubEvent::error(format!("no such agent '{name}'")));
                };
                let guard = slot.agent.lock().await;
                let messages = guard.context().messages().to_vec();
                Some(HubEvent::Context { name, messages })
            }
        }
    }
}

fn spawn_work_loop(
    name: String,
    agent: Arc<Mutex<Agent>>,
    working: Arc<AtomicBool>,
    task_running: Arc<AtomicBool>,
    internal_tx: mpsc::Sender<InternalEvent>,
) {
    tokio::spawn(async move {
        info!(agent = %name, "work loop starting");
        loop {
            if !working.load(Ordering::SeqCst) {
                break;
            }
            let mut guard = agent.lock().await;
            match guard.turn(None).await {
                Ok(_) => {
                    let messages = guard.context().messages().to_vec();
                    drop(guard);
                    if internal_tx
                        .send(InternalEvent::Context {
                            name: name.clone(),
                            messages,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    drop(guard);
                    warn!(agent = %name, error = %e, "turn failed, retrying");
                }
            }
        }
        task_running.store(false, Ordering::SeqCst);
        info!(agent = %name, "work loop stopped");
    });
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deskfleet_command::{classify, command_spans, min_args, parse_commands, VerbClass};
use deskfleet_context::{Context, Message, Role};
use deskfleet_model::ModelProvider;
use deskfleet_sandbox::{Container, SandboxError};
use tracing::warn;

use crate::error::{Result, TurnError};
use crate::prompts::{COMMAND_ERROR_PROMPT, WORK_MSG};

const TERM_TAIL_BYTES: usize = 5000;

/// What a single `turn()` produced, for callers that broadcast deltas.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub had_keyboard: bool,
    pub had_mouse: bool,
}

/// Drives one agent: context + model + sandbox, one work task at a time.
/// Never run two concurrent turns of the same agent -- callers own that
/// serialization (one tokio task per agent, gated on `working`).
pub struct Agent {
    name: String,
    context: Context,
    sandbox: Container,
    model: Arc<dyn ModelProvider>,
    kv: Option<Vec<u8>>,
    chat_mode: bool,
    working: Arc<AtomicBool>,
}

impl Agent {
    pub fn new(name: impl Into<String>, context: Context, sandbox: Container, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            name: name.into(),
            context,
            sandbox,
            model,
            kv: None,
            chat_mode: false,
            working: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn sandbox(&self) -> &Container {
        &self.sandbox
    }

    pub fn sandbox_mut(&mut self) -> &mut Container {
        &mut self.sandbox
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// A clonable handle to the running flag, independent of any `&mut
    /// Agent` borrow -- lets a caller signal `pause()` from outside the
    /// task that owns the agent while its `work()` loop is in flight.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.working)
    }

    pub fn chat_mode(&self) -> bool {
        self.chat_mode
    }

    pub fn set_chat_mode(&mut self, on: bool) {
        self.chat_mode = on;
    }

    /// Signal the work loop to stop after its current turn completes. Never
    /// aborts mid-turn.
    pub fn pause(&self) {
        self.working.store(false, Ordering::SeqCst);
    }

    /// Add a user message without driving a turn -- used while chat mode is
    /// on, or to queue an interjection for the next work-loop turn.
    pub fn chat(&mut self, text: &str) -> Result<()> {
        self.context.add_text(Role::User, text)?;
        Ok(())
    }

    /// Top-level loop: seed the context if empty, then run turns back to
    /// back until `pause()` is called. A model failure aborts only the
    /// turn it occurred in; the loop logs it and retries on the next tick.
    pub async fn work<F>(&mut self, mut on_turn: F)
    where
        F: FnMut(&str, &[Message]),
    {
        if self.context.is_empty() {
            if let Err(e) = self.context.add_text(Role::User, "start working") {
                warn!(agent = %self.name, error = %e, "failed to seed context");
                return;
            }
        }
        self.working.store(true, Ordering::SeqCst);

        while self.working.load(Ordering::SeqCst) {
            match self.turn(None).await {
                Ok(outcome) => on_turn(&outcome.response, self.context.messages()),
                Err(e) => warn!(agent = %self.name, error = %e, "turn failed, retrying"),
            }
        }
    }

    /// Run exactly one turn. See module docs / SPEC_FULL.md §4.5 for the
    /// fixed seven-step order this follows.
    pub async fn turn(&mut self, user_input: Option<&str>) -> Result<TurnOutcome> {
        if let Some(input) = user_input {
            self.context.add_text(Role::User, input)?;
        }

        let messages = self.context.marshal(WORK_MSG)?;
        let (response, kv) = self.model.respond(&messages, self.kv.take()).await?;
        self.kv = kv;

        if self.chat_mode {
            self.context.add_text(Role::Assistant, &response)?;
            return Ok(TurnOutcome {
                response,
                had_keyboard: false,
                had_mouse: false,
            });
        }

        store_narration_and_commands(&mut self.context, &response)?;

        let commands = parse_commands(&response);
        let mut had_keyboard = false;
        let mut had_mouse = false;

        for (verb, args) in &commands {
            match classify(verb) {
                VerbClass::File => {
                    if let Some(min) = min_args(verb) {
                        if args.len() < min {
                            self.context.add_text(Role::Environment, COMMAND_ERROR_PROMPT)?;
                            continue;
                        }
                    }
                    dispatch_file_command(&mut self.context, &self.sandbox, verb, args).await?;
                }
                VerbClass::Keyboard => {
                    dispatch_keyboard(&self.sandbox, verb, args).await;
                    had_keyboard = true;
                }
                VerbClass::Mouse => {
                    dispatch_mouse(&self.sandbox, verb, args).await;
                    had_mouse = true;
                }
                VerbClass::Perception => match verb.as_str() {
                    "LOOK" => add_screenshot_feedback(&mut self.context, &self.sandbox).await?,
                    "TERM" => add_terminal_feedback(&mut self.context, &self.sandbox).await?,
                    _ => {}
                },
                VerbClass::Control => {
                    let secs: u64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(5);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                VerbClass::Unknown => {}
            }
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        if had_keyboard {
            add_terminal_feedback(&mut self.context, &self.sandbox).await?;
        }
        if had_mouse {
            add_screenshot_feedback(&mut self.context, &self.sandbox).await?;
        }

        if self.context.needs_summary() {
            let marshaled = self.context.marshal(WORK_MSG)?;
            let (summary, _kv) = self.model.summarize(&marshaled, self.kv.take()).await?;
            self.context.apply_summary(&summary)?;
            self.kv = None;
        }

        Ok(TurnOutcome {
            response,
            had_keyboard,
            had_mouse,
        })
    }
}

/// Slice `response` by command-block span: narration between spans becomes
/// a trimmed `assistant` message (if non-empty), each span body is stored
/// verbatim as `command`. Trailing narration after the last span is stored
/// the same way.
fn store_narration_and_commands(context: &mut Context, response: &str) -> Result<()> {
    let spans = command_spans(response);
    let mut prev_end = 0;

    for span in &spans {
        let narration = response[prev_end..span.start].trim();
        if !narration.is_empty() {
            context.add_text(Role::Assistant, narration)?;
        }
        context.add_text(Role::Command, &response[span.start..span.end])?;
        prev_end = span.end;
    }

    let trailing = response[prev_end..].trim();
    if !trailing.is_empty() {
        context.add_text(Role::Assistant, trailing)?;
    }
    Ok(())
}

/// Run a blocking host call on the blocking thread pool. A panic inside
/// `f` surfaces as a `SandboxError::Build` rather than unwinding the
/// calling task -- this never happens in practice since `Container`'s
/// actuator methods don't panic, but it keeps a bad build from poisoning
/// the agent's work loop.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TurnError::Sandbox(SandboxError::Build(e.to_string())))
}

async fn dispatch_keyboard(sandbox: &Container, verb: &str, args: &[String]) {
    let sandbox = sandbox.clone();
    let verb = verb.to_string();
    let args = args.to_vec();
    let result = run_blocking(move || match verb.as_str() {
        "TYPE" => {
            if let Some(text) = args.first() {
                sandbox.type_text(text);
            }
        }
        "KEY" => {
            if let Some(combo) = args.first() {
                let joined = combo.split_whitespace().collect::<Vec<_>>().join("+");
                sandbox.key(&joined);
            }
        }
        _ => {}
    })
    .await;
    if let Err(e) = result {
        warn!(error = %e, "keyboard dispatch task failed");
    }
}

async fn dispatch_mouse(sandbox: &Container, verb: &str, args: &[String]) {
    let sandbox = sandbox.clone();
    let verb = verb.to_string();
    let args = args.to_vec();
    let result = run_blocking(move || match verb.as_str() {
        "MOVE" => {
            let x = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
            let y = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            sandbox.move_to(x, y);
        }
        "LCLICK" => sandbox.click(1),
        "RCLICK" => sandbox.click(3),
        "LDOWN" => sandbox.mousedown(1),
        "LUP" => sandbox.mouseup(1),
        "RDOWN" => sandbox.mousedown(3),
        "RUP" => sandbox.mouseup(3),
        "SCROLLUP" => sandbox.scroll("up"),
        "SCROLLDOWN" => sandbox.scroll("down"),
        _ => {}
    })
    .await;
    if let Err(e) = result {
        warn!(error = %e, "mouse dispatch task failed");
    }
}

/// `READ`/`WRITE`/`EDIT` bypass the terminal and go straight through the
/// sandbox's file I/O. A file-I/O failure here propagates, aborting the
/// turn (the Hub catches and logs).
async fn dispatch_file_command(
    context: &mut Context,
    sandbox: &Container,
    verb: &str,
    args: &[String],
) -> Result<()> {
    match verb {
        "READ" => {
            let path = args[0].clone();
            let sandbox = sandbox.clone();
            let content = run_blocking(move || sandbox.read_file(&path)).await??;
            let lines: Vec<&str> = content.lines().collect();
            let start = args
                .get(1)
                .and_then(|s| s.parse::<usize>().ok())
                .map(|n| n.saturating_sub(1))
                .unwrap_or(0)
                .min(lines.len());
            let end = args
                .get(2)
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(lines.len())
                .min(lines.len())
                .max(start);

            let path = &args[0];
            let mut body = format!("[READ {path}]\n");
            for (i, line) in lines[start..end].iter().enumerate() {
                body.push_str(&format!("{:4}| {}\n", i + 1 + start, line));
            }
            context.add_text(Role::Environment, body)?;
        }
        "WRITE" => {
            let path = args[0].clone();
            let content = args[1].clone();
            let sandbox = sandbox.clone();
            let char_count = content.chars().count();
            run_blocking(move || sandbox.write_file(&path, &content)).await??;
            context.add_text(
                Role::Environment,
                format!("[WRITE {}] {char_count} chars written", args[0]),
            )?;
        }
        "EDIT" => {
            let path = args[0].clone();
            let old = args[1].clone();
            let new = args[2].clone();
            let replace_all = args.get(3).map(|s| s == "-all").unwrap_or(false);
            let sandbox = sandbox.clone();

            let replaced = run_blocking(move || -> deskfleet_sandbox::Result<usize> {
                let content = sandbox.read_file(&path)?;
                let occurrences = content.matches(old.as_str()).count();
                let (updated, replaced) = if replace_all {
                    (content.replace(old.as_str(), &new), occurrences)
                } else {
                    (content.replacen(old.as_str(), &new, 1), occurrences.min(1))
                };
                sandbox.write_file(&path, &updated)?;
                Ok(replaced)
            })
            .await??;
            context.add_text(Role::Environment, format!("[EDIT {}] {replaced} replacement(s)", args[0]))?;
        }
        _ => {}
    }
    Ok(())
}

/// Read the last `TERM_TAIL_BYTES` of `term.log` from the workspace and
/// store it as `environment`. Missing log renders as `[no terminal output]`.
async fn add_terminal_feedback(context: &mut Context, sandbox: &Container) -> Result<()> {
    let log_path: PathBuf = sandbox.workspace().join("term.log");
    let tail = run_blocking(move || match std::fs::read_to_string(&log_path) {
        Ok(text) => {
            let bytes = text.as_bytes();
            let start = bytes.len().saturating_sub(TERM_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).to_string()
        }
        Err(_) => "[no terminal output]".to_string(),
    })
    .await?;
    context.add_text(Role::Environment, format!("[TERM]\n{tail}"))?;
    Ok(())
}

/// Take a screenshot and store the PNG bytes as an image block under
/// `environment`.
async fn add_screenshot_feedback(context: &mut Context, sandbox: &Container) -> Result<()> {
    let sandbox = sandbox.clone();
    let path = run_blocking(move || sandbox.screenshot()).await?;
    match std::fs::read(&path) {
        Ok(bytes) => context.add_image(Role::Environment, &bytes)?,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "screenshot file unreadable");
            context.add_text(Role::Environment, "[screenshot unavailable]")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskfleet_model::ScriptedMockProvider;
    use tempfile::tempdir;

    fn new_agent(name: &str, data_root: &Path, model: Arc<dyn ModelProvider>) -> Agent {
        let context = Context::open(data_root, name, 64_000, 5).unwrap();
        let sandbox = Container::new(name, data_root, 6080);
        Agent::new(name, context, sandbox, model)
    }

    #[tokio::test]
    async fn turn_stores_user_input_then_assistant_response() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec!["just narration, no commands".into()]));
        let mut agent = new_agent("agent_1", dir.path(), model);

        let outcome = agent.turn(Some("hello")).await.unwrap();
        assert_eq!(outcome.response, "just narration, no commands");
        assert!(!outcome.had_keyboard);
        assert!(!outcome.had_mouse);

        let roles: Vec<Role> = agent.context().messages().iter().map(|m| m.role).collect();
        assert!(roles.contains(&Role::User));
        assert!(roles.contains(&Role::Assistant));
    }

    #[tokio::test]
    async fn chat_mode_skips_command_execution() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec!["<func>LOOK</func>".into()]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.set_chat_mode(true);

        let outcome = agent.turn(Some("hi")).await.unwrap();
        assert!(!outcome.had_mouse);
        // No LOOK executed -> context holds only user + assistant (raw), no environment screenshot.
        let roles: Vec<Role> = agent.context().messages().iter().map(|m| m.role).collect();
        assert!(!roles.contains(&Role::Environment));
    }

    #[tokio::test]
    async fn unknown_verb_is_silently_ignored() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec!["<func>FROBNICATE</func>".into()]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        let outcome = agent.turn(None).await.unwrap();
        assert!(!outcome.had_keyboard && !outcome.had_mouse);
    }

    #[tokio::test]
    async fn malformed_write_command_injects_error_reminder_and_continues() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec![
            "<func>WRITE</func><param>/tmp/x</param>".into(),
        ]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.turn(None).await.unwrap();

        let found_reminder = agent.context().messages().iter().any(|m| {
            m.role == Role::Environment
                && m.content.iter().any(|b| match b {
                    deskfleet_context::Block::Text { text } => text.contains("command missing params"),
                    _ => false,
                })
        });
        assert!(found_reminder);
    }

    #[tokio::test]
    async fn write_command_creates_file_and_logs_char_count() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("workspace/agent_1/out.txt");
        let model = Arc::new(ScriptedMockProvider::new(vec![format!(
            "<func>WRITE</func><param>{}</param><param>hello</param>",
            target.display()
        )]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.turn(None).await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        let logged = agent.context().messages().iter().any(|m| {
            m.content.iter().any(|b| match b {
                deskfleet_context::Block::Text { text } => text.contains("5 chars written"),
                _ => false,
            })
        });
        assert!(logged);
    }

    #[tokio::test]
    async fn edit_command_replaces_first_occurrence_by_default() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("workspace/agent_1/f.txt");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "foo foo foo").unwrap();

        let model = Arc::new(ScriptedMockProvider::new(vec![format!(
            "<func>EDIT</func><param>{}</param><param>foo</param><param>bar</param>",
            target.display()
        )]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.turn(None).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "bar foo foo");
    }

    #[tokio::test]
    async fn edit_command_replaces_all_with_flag() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("workspace/agent_1/f.txt");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "foo foo foo").unwrap();

        let model = Arc::new(ScriptedMockProvider::new(vec![format!(
            "<func>EDIT</func><param>{}</param><param>foo</param><param>bar</param><param>-all</param>",
            target.display()
        )]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.turn(None).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "bar bar bar");
    }

    #[tokio::test]
    async fn read_command_formats_line_numbers() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("workspace/agent_1/f.txt");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "a\nb\nc\n").unwrap();

        let model = Arc::new(ScriptedMockProvider::new(vec![format!(
            "<func>READ</func><param>{}</param>",
            target.display()
        )]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.turn(None).await.unwrap();

        let env_text = agent
            .context()
            .messages()
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|b| match b {
                deskfleet_context::Block::Text { text } if text.contains("[READ") => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(env_text.contains("   1| a"));
        assert!(env_text.contains("   2| b"));
        assert!(env_text.contains("   3| c"));
    }

    #[tokio::test]
    async fn pause_stops_work_loop_after_current_turn() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec!["ok".into(), "ok".into()]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        let handle = agent.pause_handle();

        let mut turns = 0;
        agent
            .work(|_, _| {
                turns += 1;
                if turns >= 2 {
                    handle.store(false, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(turns, 2);
    }

    #[tokio::test]
    async fn chat_appends_user_message_without_running_a_turn() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedMockProvider::new(vec![]));
        let mut agent = new_agent("agent_1", dir.path(), model);
        agent.chat("hello from operator").unwrap();
        assert_eq!(agent.context().messages().len(), 1);
        assert_eq!(agent.context().messages()[0].role, Role::User);
    }

    #[test]
    fn key_combo_args_are_joined_with_plus_before_dispatch() {
        let joined = "ctrl shift c".split_whitespace().collect::<Vec<_>>().join("+");
        assert_eq!(joined, "ctrl+shift+c");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ContextError, Result};
use crate::types::{collapse_append, Block, Message, Role};

/// Append-only dual-log context store for one agent.
///
/// `original.jsonl` is the full archive, never read at runtime after
/// startup. `working.jsonl` is the compacted working memory loaded on
/// startup and rewritten whenever a summary is applied.
#[derive(Debug)]
pub struct Context {
    name: String,
    original_path: PathBuf,
    working_path: PathBuf,
    kv_path: PathBuf,
    messages: Vec<Message>,
    max_words: usize,
    preserve_last: usize,
}

impl Context {
    /// Open (creating if absent) the context directory `{data_root}/context/{name}/`,
    /// loading `working.jsonl` into memory.
    pub fn open(data_root: &Path, name: &str, max_words: usize, preserve_last: usize) -> Result<Self> {
        let folder = data_root.join("context").join(name);
        fs::create_dir_all(&folder).map_err(|source| ContextError::CreateDir {
            path: folder.clone(),
            source,
        })?;

        let original_path = folder.join("original.jsonl");
        let working_path = folder.join("working.jsonl");
        let kv_path = folder.join("kv_cache.bin");

        touch(&original_path)?;
        touch(&working_path)?;

        let messages = read_jsonl(&working_path)?;

        Ok(Self {
            name: name.to_string(),
            original_path,
            working_path,
            kv_path,
            messages,
            max_words,
            preserve_last,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The role and text of the most recently stored message, if any.
    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|m| m.role)
    }

    /// Append a text block under `role`.
    pub fn add_text(&mut self, role: Role, text: impl Into<String>) -> Result<()> {
        self.add(role, Block::text(text))
    }

    /// Append a PNG image block under `role`.
    pub fn add_image(&mut self, role: Role, png_bytes: &[u8]) -> Result<()> {
        self.add(role, Block::image_png(png_bytes))
    }

    fn add(&mut self, role: Role, block: Block) -> Result<()> {
        collapse_append(&mut self.messages, role, block.clone());
        append_collapsed(&self.original_path, role, block.clone())?;
        append_collapsed(&self.working_path, role, block)?;
        Ok(())
    }

    /// Convert stored messages to model-API shape: `environment` → `user`,
    /// `command` → `assistant`, re-collapsing adjacent same-role messages.
    /// If the last stored message is `assistant`/`command`, injects `keepalive`
    /// as a `[SYSTEM]`-prefixed `environment` message first, so the model
    /// always sees a trailing nudge to keep working rather than stalling.
    pub fn marshal(&mut self, keepalive: &str) -> Result<Vec<Message>> {
        if matches!(self.last_role(), Some(Role::Assistant) | Some(Role::Command)) {
            self.add_text(Role::Environment, format!("[SYSTEM]\n{keepalive}"))?;
        }

        let mut out: Vec<Message> = Vec::new();
        for msg in &self.messages {
            let role = msg.role.marshaled();
            for block in &msg.content {
                collapse_append(&mut out, role, block.clone());
            }
        }
        Ok(out)
    }

    /// Total word weight across stored messages (images count 1000 words).
    pub fn count_words(&self) -> usize {
        self.messages.iter().map(Message::word_count).sum()
    }

    pub fn needs_summary(&self) -> bool {
        self.count_words() >= self.max_words
    }

    /// Replace working memory with `SUMMARIZED CONTEXT: {summary}` plus the
    /// last `preserve_last` messages, archiving the summary to
    /// `original.jsonl` and overwriting `working.jsonl`. A no-op when the
    /// whole history already fits within `preserve_last` — a summary would
    /// only add bloat.
    pub fn apply_summary(&mut self, summary: &str) -> Result<()> {
        if self.messages.len() <= self.preserve_last {
            return Ok(());
        }

        let tail: Vec<Message> = self.messages[self.messages.len() - self.preserve_last..].to_vec();
        let summary_block = Block::text(format!("SUMMARIZED CONTEXT: {summary}"));

        append_collapsed(&self.original_path, Role::Assistant, summary_block.clone())?;

        let mut rebuilt = vec![Message::new(Role::Assistant, summary_block)];
        for msg in tail {
            for block in msg.content {
                collapse_append(&mut rebuilt, msg.role, block);
            }
        }
        self.messages = rebuilt;

        write_jsonl(&self.working_path, &self.messages)?;
        Ok(())
    }

    /// Load the opaque kv-cache blob persisted for this context, if any.
    pub fn load_kv(&self) -> Result<Option<Vec<u8>>> {
        if !self.kv_path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&self.kv_path).map_err(|source| ContextError::Read {
            path: self.kv_path.clone(),
            source,
        })?;
        Ok(Some(bytes))
    }

    /// Persist (or, if `None`, delete) the opaque kv-cache blob.
    pub fn save_kv(&self, kv: Option<&[u8]>) -> Result<()> {
        match kv {
            Some(bytes) => fs::write(&self.kv_path, bytes).map_err(|source| ContextError::Write {
                path: self.kv_path.clone(),
                source,
            }),
            None => match fs::remove_file(&self.kv_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(ContextError::Write {
                    path: self.kv_path.clone(),
                    source,
                }),
            },
        }
    }
}

fn touch(path: &Path) -> Result<()> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| ContextError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn read_jsonl(path: &Path) -> Result<Vec<Message>> {
    let text = fs::read_to_string(path).map_err(|source| ContextError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| ContextError::Corrupt {
                path: path.to_path_buf(),
                line: i + 1,
                source,
            })
        })
        .collect()
}

fn write_jsonl(path: &Path, messages: &[Message]) -> Result<()> {
    let mut out = String::new();
    for msg in messages {
        out.push_str(&serde_json::to_string(msg).expect("Message serializes"));
        out.push('\n');
    }
    fs::write(path, out).map_err(|source| ContextError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Append `block` under `role` to the jsonl file at `path`, collapsing into
/// the last line when it already carries the same role.
fn append_collapsed(path: &Path, role: Role, block: Block) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|source| ContextError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines: Vec<String> = text
        .trim_end()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if let Some(last) = lines.last_mut() {
        let mut entry: Message = serde_json::from_str(last).map_err(|source| ContextError::Corrupt {
            path: path.to_path_buf(),
            line: lines.len(),
            source,
        })?;
        if entry.role == role {
            entry.content.push(block);
            *last = serde_json::to_string(&entry).expect("Message serializes");
            let mut out = lines.join("\n");
            out.push('\n');
            return fs::write(path, out).map_err(|source| ContextError::Write {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    let entry = Message::new(role, block);
    let line = serde_json::to_string(&entry).expect("Message serializes");
    use std::io::Write;
    let mut f = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|source| ContextError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    writeln!(f, "{line}").map_err(|source| ContextError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx(dir: &Path, name: &str) -> Context {
        Context::open(dir, name, 64_000, 5).unwrap()
    }

    #[test]
    fn new_context_starts_empty() {
        let dir = tempdir().unwrap();
        let c = ctx(dir.path(), "agent_1");
        assert!(c.is_empty());
    }

    #[test]
    fn add_text_is_visible_in_messages() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::User, "hello").unwrap();
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].role, Role::User);
    }

    #[test]
    fn adjacent_same_role_collapses_in_memory() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::Assistant, "part one").unwrap();
        c.add_text(Role::Assistant, "part two").unwrap();
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].content.len(), 2);
    }

    #[test]
    fn different_role_starts_new_message() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::User, "hi").unwrap();
        c.add_text(Role::Assistant, "hello").unwrap();
        assert_eq!(c.messages().len(), 2);
    }

    #[test]
    fn working_jsonl_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut c = ctx(dir.path(), "agent_1");
            c.add_text(Role::User, "persisted").unwrap();
        }
        let c2 = ctx(dir.path(), "agent_1");
        assert_eq!(c2.messages().len(), 1);
        assert_eq!(c2.messages()[0].content[0], Block::text("persisted"));
    }

    #[test]
    fn original_and_working_both_collapse_independently() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::Assistant, "a").unwrap();
        c.add_text(Role::Assistant, "b").unwrap();
        let original = fs::read_to_string(dir.path().join("context/agent_1/original.jsonl")).unwrap();
        assert_eq!(original.lines().count(), 1);
    }

    #[test]
    fn marshal_remaps_environment_and_command_roles() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::Environment, "env text").unwrap();
        c.add_text(Role::Command, "<func>LOOK</func>").unwrap();
        let out = c.marshal("keepalive").unwrap();
        assert!(out.iter().all(|m| matches!(m.role, Role::User | Role::Assistant)));
    }

    #[test]
    fn marshal_injects_keepalive_after_trailing_assistant() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::User, "go").unwrap();
        c.add_text(Role::Assistant, "working...").unwrap();
        let out = c.marshal("keep going").unwrap();
        let last = out.last().unwrap();
        assert_eq!(last.role, Role::User);
        match &last.content[0] {
            Block::Text { text } => assert!(text.contains("keep going")),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn marshal_no_keepalive_when_last_is_user() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::User, "go").unwrap();
        let before = c.messages().len();
        let _ = c.marshal("keep going").unwrap();
        assert_eq!(c.messages().len(), before);
    }

    #[test]
    fn count_words_counts_text_and_weights_images() {
        let dir = tempdir().unwrap();
        let mut c = ctx(dir.path(), "agent_1");
        c.add_text(Role::User, "one two three").unwrap();
        assert_eq!(c.count_words(), 3);
        c.add_image(Role::Environment, b"fake-png-bytes").unwrap();
        assert_eq!(c.count_words(), 1003);
    }

    #[test]
    fn needs_summary_false_under_threshold() {
        let dir = tempdir().unwrap();
        let mut c = Context::open(dir.path(), "agent_1", 10, 5).unwrap();
        c.add_text(Role::User, "a few words only").unwrap();
        assert!(!c.needs_summary());
    }

    #[test]
    fn needs_summary_true_at_threshold() {
        let dir = tempdir().unwrap();
        let mut c = Context::open(dir.path(), "agent_1", 3, 5).unwrap();
        c.add_text(Role::User, "one two three").unwrap();
        assert!(c.needs_summary());
    }

    #[test]
    fn apply_summary_noop_when_under_preserve_last() {
        let dir = tempdir().unwrap();
        let mut c = Context::open(dir.path(), "agent_1", 64_000, 5).unwrap();
        c.add_text(Role::User, "only one message").unwrap();
        c.apply_summary("a summary").unwrap();
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].role, Role::User);
    }

    #[test]
    fn apply_summary_replaces_history_with_summary_plus_tail() {
        let dir = tempdir().unwrap();
        let mut c = Context::open(dir.path(), "agent_1", 64_000, 2).unwrap();
        for i in 0..6 {
            c.add_text(Role::User, format!("msg {i}")).unwrap();
            c.add_text(Role::Assistant, format!("reply {i}")).unwrap();
        }
        c.apply_summary("condensed history").unwrap();
        assert_eq!(c.messages().len(), 3); // summary + preserve_last(2)
        match &c.messages()[0].content[0] {
            Block::Text { text } => assert!(text.starts_with("SUMMARIZED CONTEXT: condensed history")),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn apply_summary_archives_to_original_and_rewrites_working() {
        let dir = tempdir().unwrap();
        let mut c = Context::open(dir.path(), "agent_1", 64_000, 1).unwrap();
        for i in 0..4 {
            c.add_text(Role::User, format!("msg {i}")).unwrap();
        }
        let original_before = fs::read_to_string(dir.path().join("context/agent_1/original.jsonl"))
            .unwrap()
            .lines()
            .count();
        c.apply_summary("summary text").unwrap();
        let original_after = fs::read_to_string(dir.path().join("context/agent_1/original.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(original_after, original_before + 1);

        let working = fs::read_to_string(dir.path().join("context/agent_1/working.jsonl")).unwrap();
        assert_eq!(working.lines().count(), 2); // summary + preserve_last(1)
    }

    #[test]
    fn kv_round_trip() {
        let dir = tempdir().unwrap();
        let c = ctx(dir.path(), "agent_1");
        assert_eq!(c.load_kv().unwrap(), None);
        c.save_kv(Some(b"opaque-bytes")).unwrap();
        assert_eq!(c.load_kv().unwrap(), Some(b"opaque-bytes".to_vec()));
        c.save_kv(None).unwrap();
        assert_eq!(c.load_kv().unwrap(), None);
    }

    #[test]
    fn name_accessor_returns_context_name() {
        let dir = tempdir().unwrap();
        let c = ctx(dir.path(), "agent_7");
        assert_eq!(c.name(), "agent_7");
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Fixed prose the Turn Engine injects into context, independent of what
//! the Model Adapter sends as its own system prompt.

/// Appended as an `environment` keepalive when the last stored message
/// would otherwise leave the model facing its own prior turn instead of a
/// fresh `user` message.
pub const WORK_MSG: &str = "\nAUTOMATED MESSAGE\ncontinue working. whether that is more thinking, terminal control, or GUI control.\n";

/// Injected when a file command (`READ`/`WRITE`/`EDIT`) is missing required
/// `<param>` arguments, so the model can self-correct on its next turn.
pub const COMMAND_ERROR_PROMPT: &str = r#"
command missing params. remember the format:

<func>READ</func><param>file</param>
<func>READ</func><param>file</param><param>start</param><param>end</param>
<func>WRITE</func><param>file</param><param>content</param>
<func>EDIT</func><param>file</param><param>old</param><param>new</param>
<func>EDIT</func><param>file</param><param>old</param><param>new</param><param>-all</param>

every <param> must have a closing </param>.
"#;

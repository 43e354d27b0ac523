// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Parses the `<func>VERB</func><param>...</param>` command grammar agents
//! emit in their responses, and classifies verbs by the perception feedback
//! they trigger.

use std::sync::OnceLock;

use regex::Regex;

/// File commands are handled directly via file I/O and bypass the terminal.
pub const FILE_COMMANDS: &[&str] = &["READ", "WRITE", "EDIT"];

/// Minimum argument count per file command. A command with fewer params is
/// malformed and should be rejected before dispatch.
pub fn min_args(verb: &str) -> Option<usize> {
    match verb {
        "READ" => Some(1),
        "WRITE" => Some(2),
        "EDIT" => Some(3),
        _ => None,
    }
}

/// The perception feedback class a verb belongs to, used by the turn engine
/// to decide whether to auto-append a screenshot or terminal dump after a
/// batch of commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbClass {
    /// READ / WRITE / EDIT — no perception feedback.
    File,
    /// TYPE / KEY — triggers an automatic TERM after the batch.
    Keyboard,
    /// MOVE / LCLICK / RCLICK / LDOWN / LUP / RDOWN / RUP / SCROLLUP / SCROLLDOWN
    /// — triggers an automatic LOOK after the batch.
    Mouse,
    /// LOOK / TERM — explicit perception requests, no auto-feedback.
    Perception,
    /// WAIT — cooperative sleep.
    Control,
    /// Not a recognized verb.
    Unknown,
}

pub fn classify(verb: &str) -> VerbClass {
    match verb {
        "READ" | "WRITE" | "EDIT" => VerbClass::File,
        "TYPE" | "KEY" => VerbClass::Keyboard,
        "MOVE" | "LCLICK" | "RCLICK" | "LDOWN" | "LUP" | "RDOWN" | "RUP" | "SCROLLUP"
        | "SCROLLDOWN" => VerbClass::Mouse,
        "LOOK" | "TERM" => VerbClass::Perception,
        "WAIT" => VerbClass::Control,
        _ => VerbClass::Unknown,
    }
}

fn outer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<func>(\w+)</func>((?:\s*<param>.*?</param>)*)").unwrap()
    })
}

fn inner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<param>(.*?)</param>").unwrap())
}

/// Matches a complete `<func>VERB</func><param>...</param>...` block, used
/// to slice a response into narration and command spans.
fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<func>\w+</func>(?:\s*<param>.*?</param>)*").unwrap())
}

/// Parse every `<func>VERB</func>` block in `text`, returning the verb
/// (upper-cased) and its ordered list of `<param>` bodies.
pub fn parse_commands(text: &str) -> Vec<(String, Vec<String>)> {
    outer_re()
        .captures_iter(text)
        .map(|caps| {
            let verb = caps[1].to_uppercase();
            let params_blob = &caps[2];
            let args = inner_re()
                .captures_iter(params_blob)
                .map(|c| c[1].to_string())
                .collect();
            (verb, args)
        })
        .collect()
}

/// A `<func>...</func>` block's byte span within the original text, used to
/// split a response into alternating narration/command segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpan {
    pub start: usize,
    pub end: usize,
}

/// Locate every command block's byte span, in order of appearance.
pub fn command_spans(text: &str) -> Vec<CommandSpan> {
    block_re()
        .find_iter(text)
        .map(|m| CommandSpan {
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_command_single_param() {
        let cmds = parse_commands("<func>TYPE</func><param>hi there</param>");
        assert_eq!(cmds, vec![("TYPE".to_string(), vec!["hi there".to_string()])]);
    }

    #[test]
    fn upper_cases_verb() {
        let cmds = parse_commands("<func>look</func>");
        assert_eq!(cmds[0].0, "LOOK");
    }

    #[test]
    fn parses_multiple_params() {
        let cmds = parse_commands(
            "<func>EDIT</func><param>/home/agent/f.py</param><param>old</param><param>new</param>",
        );
        assert_eq!(
            cmds[0].1,
            vec!["/home/agent/f.py".to_string(), "old".to_string(), "new".to_string()]
        );
    }

    #[test]
    fn edit_with_all_flag() {
        let cmds = parse_commands(
            "<func>EDIT</func><param>f</param><param>a</param><param>b</param><param>-all</param>",
        );
        assert_eq!(cmds[0].1[3], "-all");
    }

    #[test]
    fn no_params_command() {
        let cmds = parse_commands("blah blah <func>LOOK</func> more text");
        assert_eq!(cmds, vec![("LOOK".to_string(), vec![])]);
    }

    #[test]
    fn params_may_span_multiple_lines() {
        let cmds = parse_commands("<func>WRITE</func><param>/f</param><param>line1\nline2\nline3</param>");
        assert_eq!(cmds[0].1[1], "line1\nline2\nline3");
    }

    #[test]
    fn multiple_commands_in_one_response() {
        let text = "thinking...\n<func>MOVE</func><param>10</param><param>20</param>\nmore thinking\n<func>LCLICK</func>";
        let cmds = parse_commands(text);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].0, "MOVE");
        assert_eq!(cmds[1].0, "LCLICK");
    }

    #[test]
    fn unknown_verb_is_parsed_but_classified_unknown() {
        let cmds = parse_commands("<func>FROBNICATE</func>");
        assert_eq!(cmds[0].0, "FROBNICATE");
        assert_eq!(classify(&cmds[0].0), VerbClass::Unknown);
    }

    #[test]
    fn min_args_table() {
        assert_eq!(min_args("READ"), Some(1));
        assert_eq!(min_args("WRITE"), Some(2));
        assert_eq!(min_args("EDIT"), Some(3));
        assert_eq!(min_args("LOOK"), None);
    }

    #[test]
    fn classify_table() {
        assert_eq!(classify("READ"), VerbClass::File);
        assert_eq!(classify("TYPE"), VerbClass::Keyboard);
        assert_eq!(classify("KEY"), VerbClass::Keyboard);
        assert_eq!(classify("SCROLLDOWN"), VerbClass::Mouse);
        assert_eq!(classify("TERM"), VerbClass::Perception);
        assert_eq!(classify("WAIT"), VerbClass::Control);
    }

    #[test]
    fn command_spans_slice_narration_from_commands() {
        let text = "hello\n<func>LOOK</func>\nworld";
        let spans = command_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[..spans[0].start], "hello\n");
        assert_eq!(&text[spans[0].start..spans[0].end], "<func>LOOK</func>");
        assert_eq!(&text[spans[0].end..], "\nworld");
    }

    #[test]
    fn command_spans_empty_when_no_commands() {
        assert!(command_spans("just narration, no commands").is_empty());
    }

    #[test]
    fn file_commands_constant_matches_classify() {
        for verb in FILE_COMMANDS {
            assert_eq!(classify(verb), VerbClass::File);
        }
    }
}

use crate::domain::{LogRecord, RecordKind};

/// Tags the agent wraps around content it injects into the user turn.
/// A match needs the opening tag at the start and its closing tag later on.
const WRAPPED_TAGS: &[&str] = &[
    "command-name",
    "command-message",
    "command-args",
    "local-command-stdout",
    "local-command-stderr",
    "local-command-caveat",
    "system-reminder",
    "user-prompt-submit-hook",
    "bash-input",
    "bash-stdout",
    "bash-stderr",
    "tool-call",
    "tool-result",
    "task-notification",
    "environment_context",
    "INSTRUCTIONS",
    "skill",
];

/// Openings that only ever appear on generated text.
const INJECTED_PREFIXES: &[&str] = &[
    "Caveat: The messages below were generated by the user while running local commands",
    "[Request interrupted by user",
    "# AGENTS.md instructions",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemMarker {
    Wrapped(&'static str),
    Prefix(&'static str),
}

pub fn injected_marker(text: &str) -> Option<SystemMarker> {
    let trimmed = text.trim_start();

    if let Some(prefix) = INJECTED_PREFIXES
        .iter()
        .find(|prefix| trimmed.starts_with(**prefix))
    {
        return Some(SystemMarker::Prefix(*prefix));
    }

    let (name, rest) = opening_tag(trimmed)?;
    let tag = WRAPPED_TAGS.iter().find(|tag| **tag == name)?;
    let closing = format!("</{tag}>");
    rest.contains(closing.as_str())
        .then_some(SystemMarker::Wrapped(*tag))
}

pub fn is_system_content(text: &str) -> bool {
    injected_marker(text).is_some()
}

/// User record that carries text a person actually typed. Tool results ride
/// on user records but come from the harness.
pub fn is_authored_user_record(record: &LogRecord) -> bool {
    record.kind == RecordKind::User
        && !record.is_meta
        && !record.has_tool_result
        && !record.text.trim().is_empty()
        && !is_system_content(&record.text)
}

/// Splits `<name attr="x">rest` into (`name`, `rest`).
fn opening_tag(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_prefix('<')?;
    let close = body.find('>')?;
    let inner = &body[..close];
    let name = inner.split_whitespace().next()?;
    if name.is_empty() || name.starts_with('/') {
        return None;
    }
    Some((name, &body[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_command_wrappers() {
        let text = "<command-message>init is analyzing</command-message>\n<command-name>/init</command-name>";
        assert_eq!(
            injected_marker(text),
            Some(SystemMarker::Wrapped("command-message"))
        );
    }

    #[test]
    fn detects_tool_call_wrapper_with_attributes() {
        assert!(is_system_content(
            r#"<tool-call name="Bash">ls -la</tool-call>"#
        ));
        assert!(is_system_content("  <system-reminder>\nbe nice\n</system-reminder>"));
    }

    #[test]
    fn detects_injected_prefixes() {
        assert!(is_system_content(
            "Caveat: The messages below were generated by the user while running local commands. DO NOT respond"
        ));
        assert!(is_system_content("[Request interrupted by user for tool use]"));
        assert!(is_system_content("# AGENTS.md instructions for /x\n\n<INSTRUCTIONS>"));
    }

    #[test]
    fn markup_like_authored_text_is_not_system() {
        assert!(!is_system_content("<div>why is this centered?</div>"));
        assert!(!is_system_content("<3 thanks for the help"));
        assert!(!is_system_content("< is the less-than operator"));
        assert!(!is_system_content("<T> generic bounds confuse me"));
    }

    #[test]
    fn known_tag_without_closing_counterpart_is_authored() {
        assert!(!is_system_content("<system-reminder> what does this tag do?"));
        assert!(!is_system_content("<command-name>"));
    }

    #[test]
    fn closing_tag_must_match_opening_tag() {
        assert!(!is_system_content("<bash-input>ls</bash-stdout>"));
    }

    #[test]
    fn plain_text_is_authored() {
        assert!(!is_system_content("fix bug"));
        assert!(!is_system_content(""));
    }

    fn user_record(text: &str, is_meta: bool) -> LogRecord {
        LogRecord {
            kind: RecordKind::User,
            text: text.to_string(),
            sequence: 0,
            timestamp: None,
            cwd: None,
            is_meta,
            has_tool_result: false,
        }
    }

    #[test]
    fn authored_user_record_rules() {
        assert!(is_authored_user_record(&user_record("fix bug", false)));
        assert!(!is_authored_user_record(&user_record("fix bug", true)));
        assert!(!is_authored_user_record(&user_record("   ", false)));
        assert!(!is_authored_user_record(&user_record(
            "<local-command-stdout>ok</local-command-stdout>",
            false
        )));

        let mut tool_output = user_record("ok", false);
        tool_output.has_tool_result = true;
        assert!(!is_authored_user_record(&tool_output));

        let mut assistant = user_record("done", false);
        assistant.kind = RecordKind::Assistant;
        assert!(!is_authored_user_record(&assistant));
    }
}

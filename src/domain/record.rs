use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    User,
    Assistant,
    System,
    Summary,
    CustomTitle,
    Unrecognized,
}

impl RecordKind {
    fn from_type_tag(tag: &str) -> Self {
        match tag {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            "summary" => Self::Summary,
            "custom-title" => Self::CustomTitle,
            _ => Self::Unrecognized,
        }
    }
}

/// One decoded line of a session log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub text: String,
    /// Zero-based line position within the file.
    pub sequence: u64,
    pub timestamp: Option<OffsetDateTime>,
    pub cwd: Option<PathBuf>,
    /// Set by the agent on user records it generated itself.
    pub is_meta: bool,
    pub has_tool_result: bool,
}

/// Decodes a raw line as read from disk. Invalid UTF-8 is a decode failure.
pub fn decode_record_bytes(line: &[u8], sequence: u64) -> Result<LogRecord, DecodeError> {
    decode_record_line(std::str::from_utf8(line)?, sequence)
}

pub fn decode_record_line(line: &str, sequence: u64) -> Result<LogRecord, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .map(RecordKind::from_type_tag)
        .ok_or(DecodeError::MissingField("type"))?;

    let text = match kind {
        RecordKind::User | RecordKind::Assistant => {
            let content = value
                .get("message")
                .and_then(|message| message.get("content"))
                .unwrap_or(&Value::Null);
            extract_text_blocks(content)
        }
        RecordKind::System => value
            .get("content")
            .map(extract_text_blocks)
            .unwrap_or_default(),
        RecordKind::Summary => value
            .get("summary")
            .and_then(|v| v.as_str())
            .ok_or(DecodeError::MissingField("summary"))?
            .to_string(),
        RecordKind::CustomTitle => value
            .get("customTitle")
            .and_then(|v| v.as_str())
            .ok_or(DecodeError::MissingField("customTitle"))?
            .to_string(),
        RecordKind::Unrecognized => String::new(),
    };

    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
    let cwd = value
        .get("cwd")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);
    let is_meta = value
        .get("isMeta")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let has_tool_result = kind == RecordKind::User
        && value
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_array())
            .is_some_and(|blocks| {
                blocks
                    .iter()
                    .any(|block| block.get("type").and_then(|v| v.as_str()) == Some("tool_result"))
            });

    Ok(LogRecord {
        kind,
        text,
        sequence,
        timestamp,
        cwd,
        is_meta,
        has_tool_result,
    })
}

fn extract_text_blocks(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                    return block.get("text").and_then(|v| v.as_str());
                }
                None
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_string_content() {
        let line = r#"{"type":"user","cwd":"/tmp/p","timestamp":"2026-02-19T00:00:00Z","message":{"role":"user","content":"fix bug"}}"#;
        let record = decode_record_line(line, 3).expect("decode");
        assert_eq!(record.kind, RecordKind::User);
        assert_eq!(record.text, "fix bug");
        assert_eq!(record.sequence, 3);
        assert_eq!(record.cwd, Some(PathBuf::from("/tmp/p")));
        assert!(record.timestamp.is_some());
        assert!(!record.is_meta);
    }

    #[test]
    fn joins_text_blocks_and_skips_others() {
        let line = serde_json::json!({
            "type": "assistant",
            "message": {
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "first" },
                    { "type": "tool_use", "id": "t1", "name": "Bash", "input": {} },
                    { "type": "text", "text": "second" }
                ]
            }
        })
        .to_string();
        let record = decode_record_line(&line, 0).expect("decode");
        assert_eq!(record.kind, RecordKind::Assistant);
        assert_eq!(record.text, "first\nsecond");
    }

    #[test]
    fn flags_tool_result_user_records() {
        let line = serde_json::json!({
            "type": "user",
            "message": {
                "content": [
                    { "type": "tool_result", "tool_use_id": "t1", "content": "ok" }
                ]
            }
        })
        .to_string();
        let record = decode_record_line(&line, 0).expect("decode");
        assert!(record.has_tool_result);
        assert!(record.text.is_empty());
    }

    #[test]
    fn decodes_summary_and_custom_title() {
        let summary = decode_record_line(r#"{"type":"summary","summary":"fixed bug","leafUuid":"x"}"#, 0)
            .expect("summary");
        assert_eq!(summary.kind, RecordKind::Summary);
        assert_eq!(summary.text, "fixed bug");

        let title = decode_record_line(r#"{"type":"custom-title","customTitle":"Release prep"}"#, 1)
            .expect("title");
        assert_eq!(title.kind, RecordKind::CustomTitle);
        assert_eq!(title.text, "Release prep");
    }

    #[test]
    fn unknown_types_are_unrecognized() {
        let record = decode_record_line(r#"{"type":"file-history-snapshot","messageId":"m"}"#, 0)
            .expect("decode");
        assert_eq!(record.kind, RecordKind::Unrecognized);
        assert!(record.text.is_empty());
    }

    #[test]
    fn reads_meta_flag_and_ignores_bad_timestamps() {
        let line = r#"{"type":"user","isMeta":true,"timestamp":"yesterday","message":{"content":"x"}}"#;
        let record = decode_record_line(line, 0).expect("decode");
        assert!(record.is_meta);
        assert_eq!(record.timestamp, None);
    }

    #[test]
    fn rejects_invalid_utf8_bytes() {
        assert!(matches!(
            decode_record_bytes(b"{\"type\":\"user\",\"x\":\"\xff\"}\n", 0),
            Err(DecodeError::Utf8(_))
        ));
        let record =
            decode_record_bytes(br#"{"type":"assistant","message":{"content":"ok"}}"#, 3)
                .expect("decode");
        assert_eq!(record.sequence, 3);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(decode_record_line("", 0), Err(DecodeError::Empty)));
        assert!(matches!(decode_record_line("   ", 0), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_record_line(r#"{"type":"user","message":{"con"#, 0),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_record_line("[1,2,3]", 0),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode_record_line(r#"{"message":{}}"#, 0),
            Err(DecodeError::MissingField("type"))
        ));
        assert!(matches!(
            decode_record_line(r#"{"type":"summary"}"#, 0),
            Err(DecodeError::MissingField("summary"))
        ));
        assert!(matches!(
            decode_record_line(r#"{"type":"custom-title","customTitle":7}"#, 0),
            Err(DecodeError::MissingField("customTitle"))
        ));
    }
}

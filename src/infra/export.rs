use crate::domain::{
    LogRecord, RecordKind, SessionSummary, decode_record_bytes, is_authored_user_record,
};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::info;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
const CLOCK_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to read session log {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TranscriptEntry {
    pub kind: RecordKind,
    pub timestamp: Option<OffsetDateTime>,
    pub text: String,
}

/// Authored user messages and assistant replies, in file order. Injected
/// user content and undecodable lines are left out.
pub fn load_transcript(path: &Path) -> io::Result<Vec<TranscriptEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut sequence: u64 = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if let Ok(record) = decode_record_bytes(&buf, sequence) {
            if let Some(entry) = transcript_entry(record) {
                entries.push(entry);
            }
        }
        sequence += 1;
    }
    Ok(entries)
}

fn transcript_entry(record: LogRecord) -> Option<TranscriptEntry> {
    let keep = match record.kind {
        RecordKind::User => is_authored_user_record(&record),
        RecordKind::Assistant => !record.text.trim().is_empty(),
        _ => false,
    };
    keep.then(|| TranscriptEntry {
        kind: record.kind,
        timestamp: record.timestamp,
        text: record.text,
    })
}

pub fn render_session_markdown(session: &SessionSummary) -> Result<String, ExportError> {
    let transcript = load_transcript(&session.log_path).map_err(|source| ExportError::Read {
        path: session.log_path.display().to_string(),
        source,
    })?;
    Ok(render_markdown(session, &transcript))
}

fn render_markdown(session: &SessionSummary, transcript: &[TranscriptEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Session: {}", session.identity.session_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Project:** {}",
        session.identity.project_path.display()
    );
    if let Some(date) = session.started_at.and_then(|at| format_utc(at, DATE_FORMAT)) {
        let _ = writeln!(out, "**Started:** {date}");
    }
    if let Some(date) = session.activity_time().and_then(|at| format_utc(at, DATE_FORMAT)) {
        let _ = writeln!(out, "**Last activity:** {date}");
    }
    if let Some(title) = session.custom_title.as_deref() {
        let _ = writeln!(out, "**Title:** {title}");
    }
    if let Some(summary) = session.summary_text.as_deref() {
        let _ = writeln!(out, "**Summary:** {summary}");
    }
    if session.decode_failures > 0 {
        let _ = writeln!(out, "**Unreadable lines:** {}", session.decode_failures);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = writeln!(out);

    for entry in transcript {
        let role = match entry.kind {
            RecordKind::User => "User",
            _ => "Assistant",
        };
        match entry.timestamp.and_then(|at| format_utc(at, CLOCK_FORMAT)) {
            Some(clock) => {
                let _ = writeln!(out, "### **{role}** ({clock})");
            }
            None => {
                let _ = writeln!(out, "### **{role}**");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", entry.text.trim_end());
        let _ = writeln!(out);
    }
    out
}

fn format_utc(at: OffsetDateTime, format: &[BorrowedFormatItem<'static>]) -> Option<String> {
    at.to_offset(UtcOffset::UTC).format(format).ok()
}

/// Writes `<project>_<session_id>.md` into `output_dir`, creating it if needed.
pub fn export_session_markdown(
    session: &SessionSummary,
    output_dir: &Path,
) -> Result<PathBuf, ExportError> {
    let markdown = render_session_markdown(session)?;
    let write_error = |path: &Path, source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };

    fs::create_dir_all(output_dir).map_err(|source| write_error(output_dir, source))?;
    let output = output_dir.join(format!(
        "{}_{}.md",
        session.identity.project_name(),
        session.identity.session_id
    ));
    fs::write(&output, markdown).map_err(|source| write_error(&output, source))?;

    info!(output = %output.display(), "exported session");
    Ok(output)
}

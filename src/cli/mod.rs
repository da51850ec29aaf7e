use crate::domain::{
    DEFAULT_PREVIEW_WIDTH, MIN_PREVIEW_WIDTH, SessionSummary, compute_project_stats,
    format_token_count, session_preview, truncate_display,
};
use crate::infra::{
    ArchiveError, CancelFlag, ClipboardError, ClipboardPayload, ExportError, IndexSnapshot,
    ScanError, ScanOptions, SessionIndex, archive_sessions, copy_to_clipboard,
    export_session_markdown,
};
use humansize::{BINARY, format_size};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

const STATS_NAME_WIDTH: usize = 20;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

/// Which sessions `list` and `count` look at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionScope {
    pub project: Option<String>,
    /// Only the project whose directory is the current working directory.
    pub here: bool,
    pub include_agents: bool,
}

impl Default for SessionScope {
    fn default() -> Self {
        Self {
            project: None,
            here: false,
            include_agents: true,
        }
    }
}

impl SessionScope {
    fn includes(&self, session: &SessionSummary) -> bool {
        self.include_agents || !session.is_agent
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    List {
        scope: SessionScope,
        width: usize,
    },
    Count {
        scope: SessionScope,
    },
    Projects,
    Stats {
        json: bool,
    },
    PruneEmpty {
        dry_run: bool,
    },
    Archive {
        session_ids: Vec<String>,
        output: PathBuf,
    },
    Export {
        session_id: String,
        output_dir: Option<PathBuf>,
    },
    Yank {
        session_id: String,
        path: bool,
    },
}

impl CliCommand {
    fn scope(&self) -> Option<&SessionScope> {
        match self {
            Self::List { scope, .. } | Self::Count { scope } => Some(scope),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1);
    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::Command(CliCommand::List {
            scope: SessionScope::default(),
            width: DEFAULT_PREVIEW_WIDTH,
        }));
    };

    let command = match subcommand.as_str() {
        "list" | "ls" => {
            let mut scope = SessionScope::default();
            let mut width = DEFAULT_PREVIEW_WIDTH;
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--project" | "-p" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        scope.project = Some(value.to_string());
                    }
                    "--here" => scope.here = true,
                    "--no-agents" => scope.include_agents = false,
                    "--width" | "-w" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--width".to_string())
                        })?;
                        width = parse_usize_flag("--width", value)?;
                        if width < MIN_PREVIEW_WIDTH {
                            return Err(CliParseError::InvalidFlagValue {
                                flag: "--width".to_string(),
                                value: value.to_string(),
                            });
                        }
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            CliCommand::List { scope, width }
        }
        "count" => {
            let mut scope = SessionScope::default();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--project" | "-p" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        scope.project = Some(value.to_string());
                    }
                    "--here" => scope.here = true,
                    "--no-agents" => scope.include_agents = false,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            CliCommand::Count { scope }
        }
        "projects" => {
            if let Some(arg) = iter.next() {
                if arg.starts_with('-') {
                    return Err(CliParseError::UnknownFlag(arg.to_string()));
                }
                return Err(CliParseError::UnexpectedArgument(arg.to_string()));
            }
            CliCommand::Projects
        }
        "stats" => {
            let mut json = false;
            for arg in iter {
                match arg.as_str() {
                    "--json" => json = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            CliCommand::Stats { json }
        }
        "prune-empty" => {
            let mut dry_run = false;
            for arg in iter {
                match arg.as_str() {
                    "--dry-run" | "-n" => dry_run = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            CliCommand::PruneEmpty { dry_run }
        }
        "archive" => {
            let mut session_ids: Vec<String> = Vec::new();
            let mut output: Option<PathBuf> = None;
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--output" | "-o" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--output".to_string())
                        })?;
                        output = Some(PathBuf::from(value));
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => session_ids.push(arg.to_string()),
                }
            }
            if session_ids.is_empty() {
                return Err(CliParseError::MissingArgument("session-id"));
            }
            let output =
                output.ok_or_else(|| CliParseError::MissingFlagValue("--output".to_string()))?;
            CliCommand::Archive {
                session_ids,
                output,
            }
        }
        "export" => {
            let mut session_id: Option<String> = None;
            let mut output_dir: Option<PathBuf> = None;
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--output" | "-o" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--output".to_string())
                        })?;
                        output_dir = Some(PathBuf::from(value));
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => set_once(&mut session_id, arg)?,
                }
            }
            let session_id = session_id.ok_or(CliParseError::MissingArgument("session-id"))?;
            CliCommand::Export {
                session_id,
                output_dir,
            }
        }
        "yank" => {
            let mut session_id: Option<String> = None;
            let mut path = false;
            for arg in iter {
                match arg.as_str() {
                    "--path" => path = true,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => set_once(&mut session_id, arg)?,
                }
            }
            let session_id = session_id.ok_or(CliParseError::MissingArgument("session-id"))?;
            CliCommand::Yank { session_id, path }
        }
        other => return Err(CliParseError::UnknownSubcommand(other.to_string())),
    };

    Ok(CliInvocation::Command(command))
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),

    #[error("session not found: {0}\nHint: run `ccshelf list` and copy the session id column.")]
    SessionNotFound(String),

    #[error("session id prefix matches multiple sessions: {0}\nHint: pass more characters of the id.")]
    SessionIdAmbiguous(String),

    #[error(transparent)]
    WriteOutput(#[from] io::Error),

    #[error("failed to resolve current directory: {0}")]
    CurrentDir(String),
}

pub fn run(command: CliCommand, projects_dir: &Path) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let stderr = io::stderr();
    let mut err = io::BufWriter::new(stderr.lock());

    let mut options = ScanOptions::from_env();
    if let Some(scope) = command.scope() {
        let here = if scope.here {
            Some(
                std::env::current_dir()
                    .map_err(|error| CliRunError::CurrentDir(error.to_string()))?,
            )
        } else {
            None
        };
        options = options
            .with_project_filter(scope.project.clone())
            .with_project_dir(here.as_deref());
    }

    let index = Arc::new(SessionIndex::new(projects_dir.to_path_buf(), options));
    let cancel = CancelFlag::default();
    install_interrupt_handler(Arc::clone(&index), cancel.clone());
    let show_progress = io::stderr().is_terminal();
    let result = execute(command, &index, &cancel, &mut out, &mut err, show_progress);
    out.flush()?;
    err.flush()?;
    result
}

/// Ctrl-C during a refresh cancels it; outside a refresh it exits right away.
fn install_interrupt_handler(index: Arc<SessionIndex>, cancel: CancelFlag) {
    let installed = ctrlc::set_handler(move || {
        if index.refresh_status().in_progress && !cancel.is_cancelled() {
            debug!("interrupt received; cancelling refresh");
            cancel.cancel();
        } else {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
    if let Err(error) = installed {
        warn!(%error, "failed to install interrupt handler");
    }
}

/// Refreshes `index` once and runs `command` against the resulting snapshot.
pub fn execute(
    command: CliCommand,
    index: &SessionIndex,
    cancel: &CancelFlag,
    out: &mut impl Write,
    err: &mut impl Write,
    show_progress: bool,
) -> Result<(), CliRunError> {
    let snapshot = match refresh_index(index, cancel, err, show_progress) {
        Ok(()) => {
            let snapshot = index.snapshot();
            let warnings = snapshot.warning_count().get();
            if warnings > 0 {
                let _ = write_line(err, &format!("warnings: {warnings}"))?;
            }
            snapshot
        }
        Err(CliRunError::Scan(ScanError::StoreMissing(_))) => {
            let notice = format!(
                "no sessions: log store not found: {}",
                index.projects_dir().display()
            );
            let _ = write_line(err, &notice)?;
            index.snapshot()
        }
        Err(error) => return Err(error),
    };

    match command {
        CliCommand::List { scope, width } => {
            for session in snapshot.sessions.iter().filter(|s| scope.includes(s)) {
                if !write_line(out, &format_list_line(session, width))? {
                    return Ok(());
                }
            }
            Ok(())
        }
        CliCommand::Count { scope } => {
            let count = snapshot
                .sessions
                .iter()
                .filter(|session| scope.includes(session))
                .count();
            let _ = write_line(out, &count.to_string())?;
            Ok(())
        }
        CliCommand::Projects => {
            for name in index.project_names() {
                if !write_line(out, &name)? {
                    return Ok(());
                }
            }
            Ok(())
        }
        CliCommand::Stats { json } => {
            if json {
                let payload = build_stats_json_payload(&snapshot.sessions);
                let text =
                    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
                let _ = write_line(out, &text)?;
            } else {
                write_stats(out, &snapshot.sessions)?;
            }
            Ok(())
        }
        CliCommand::PruneEmpty { dry_run } => {
            let outcome = index.prune_empty(dry_run);
            if outcome.candidates.is_empty() {
                let _ = write_line(out, "No empty sessions found.")?;
                return Ok(());
            }
            if outcome.dry_run {
                let _ = write_line(
                    out,
                    &format!("Would delete {} empty session(s):", outcome.candidates.len()),
                )?;
                for session in &outcome.candidates {
                    let line = format!(
                        "  {} / {} ({})",
                        session.identity.project_name(),
                        session.identity.session_id,
                        format_size(session.file_size_bytes, BINARY)
                    );
                    if !write_line(out, &line)? {
                        return Ok(());
                    }
                }
                return Ok(());
            }
            let _ = write_line(
                out,
                &format!(
                    "Deleted {} session(s), freed {}",
                    outcome.deleted,
                    format_size(outcome.freed_bytes, BINARY)
                ),
            )?;
            if outcome.failed > 0 {
                let _ = write_line(err, &format!("failed to delete: {}", outcome.failed))?;
            }
            Ok(())
        }
        CliCommand::Archive {
            session_ids,
            output,
        } => {
            let mut selected: Vec<SessionSummary> = Vec::new();
            for session_id in &session_ids {
                selected.push(select_session(&snapshot, session_id)?.clone());
            }
            let report = archive_sessions(&selected, &output)?;
            let _ = write_line(
                out,
                &format!(
                    "Archived {} session(s) ({}) to {}",
                    report.sessions,
                    format_size(report.source_bytes, BINARY),
                    report.output.display()
                ),
            )?;
            Ok(())
        }
        CliCommand::Export {
            session_id,
            output_dir,
        } => {
            let session = select_session(&snapshot, &session_id)?;
            let output_dir = output_dir.unwrap_or_else(|| PathBuf::from("."));
            let written = export_session_markdown(session, &output_dir)?;
            let _ = write_line(out, &written.display().to_string())?;
            Ok(())
        }
        CliCommand::Yank { session_id, path } => {
            let session = select_session(&snapshot, &session_id)?;
            let payload = yank_payload(session, path);
            let rendered = payload.render();
            copy_to_clipboard(&payload)?;
            let _ = write_line(out, &format!("Copied: {rendered}"))?;
            Ok(())
        }
    }
}

/// Runs the refresh on a scoped thread and, when asked, redraws a
/// `scanning N/M` line on stderr until it finishes.
fn refresh_index(
    index: &SessionIndex,
    cancel: &CancelFlag,
    err: &mut impl Write,
    show_progress: bool,
) -> Result<(), CliRunError> {
    if !show_progress {
        index.refresh(cancel)?;
        return Ok(());
    }

    let result = thread::scope(|scope| {
        let handle = scope.spawn(|| index.refresh(cancel));
        let mut drawn = false;
        while !handle.is_finished() {
            let status = index.refresh_status();
            if status.in_progress && status.total > 0 {
                let _ = write!(err, "\rscanning {}/{}", status.completed, status.total);
                let _ = err.flush();
                drawn = true;
            }
            thread::sleep(PROGRESS_INTERVAL);
        }
        if drawn {
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
        }
        handle
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
    });
    result?;
    Ok(())
}

fn yank_payload(session: &SessionSummary, path: bool) -> ClipboardPayload {
    if path {
        return ClipboardPayload::plain(session.log_path.display().to_string());
    }
    ClipboardPayload::in_directory(
        format!("claude --resume {}", session.identity.session_id),
        session.identity.project_path.clone(),
    )
}

/// Exact id match first, then a unique prefix.
fn select_session<'a>(
    snapshot: &'a IndexSnapshot,
    session_id: &str,
) -> Result<&'a SessionSummary, CliRunError> {
    if let Some(session) = snapshot.find_session(session_id) {
        return Ok(session);
    }

    let mut matches = snapshot
        .sessions
        .iter()
        .filter(|session| session.identity.session_id.starts_with(session_id));
    let Some(first) = matches.next() else {
        return Err(CliRunError::SessionNotFound(session_id.to_string()));
    };
    if matches.next().is_some() {
        return Err(CliRunError::SessionIdAmbiguous(session_id.to_string()));
    }
    Ok(first)
}

fn format_list_line(session: &SessionSummary, width: usize) -> String {
    let last_activity = session
        .activity_time()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}",
        session.identity.project_name(),
        session.identity.session_id,
        last_activity,
        session.file_size_bytes,
        session_preview(session, width).text
    )
}

fn write_stats(out: &mut impl Write, sessions: &[SessionSummary]) -> io::Result<bool> {
    let stats = compute_project_stats(sessions);
    let rule = "-".repeat(STATS_NAME_WIDTH + 36);
    let header = format!(
        "{:<name$} {:>8} {:>12} {:>12}",
        "Project",
        "Sessions",
        "Size",
        "Tokens",
        name = STATS_NAME_WIDTH
    );
    if !write_line(out, &header)? || !write_line(out, &rule)? {
        return Ok(false);
    }

    let mut total_sessions = 0usize;
    let mut total_bytes = 0u64;
    let mut total_tokens = 0usize;
    for project in &stats {
        let line = format!(
            "{:<name$} {:>8} {:>12} {:>12}",
            truncate_display(&project.name, STATS_NAME_WIDTH),
            project.sessions,
            format_size(project.total_bytes, BINARY),
            format_token_count(project.estimated_tokens),
            name = STATS_NAME_WIDTH
        );
        if !write_line(out, &line)? {
            return Ok(false);
        }
        total_sessions += project.sessions;
        total_bytes = total_bytes.saturating_add(project.total_bytes);
        total_tokens = total_tokens.saturating_add(project.estimated_tokens);
    }

    let total = format!(
        "{:<name$} {:>8} {:>12} {:>12}",
        "TOTAL",
        total_sessions,
        format_size(total_bytes, BINARY),
        format_token_count(total_tokens),
        name = STATS_NAME_WIDTH
    );
    Ok(write_line(out, &rule)? && write_line(out, &total)?)
}

fn build_stats_json_payload(sessions: &[SessionSummary]) -> serde_json::Value {
    let projects = compute_project_stats(sessions);
    let total_bytes: u64 = projects.iter().map(|project| project.total_bytes).sum();
    let total_tokens: usize = projects.iter().map(|project| project.estimated_tokens).sum();
    serde_json::json!({
        "projects": projects,
        "total": {
            "sessions": sessions.len(),
            "total_bytes": total_bytes,
            "estimated_tokens": total_tokens,
        }
    })
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}

fn parse_usize_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    value
        .parse::<usize>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}

fn set_once(slot: &mut Option<String>, arg: &str) -> Result<(), CliParseError> {
    if slot.is_some() {
        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
    }
    *slot = Some(arg.to_string());
    Ok(())
}

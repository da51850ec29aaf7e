use crate::domain::{
    DecodeError, LogRecord, RecordKind, SessionIdentity, SessionSummary,
    decode_encoded_directory, decode_record_bytes, encode_project_path, is_authored_user_record,
};
use dirs::home_dir;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::thread;
use std::time::SystemTime;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DEFAULT_MAX_WORKERS: usize = 8;
const MAX_WORKERS: usize = 32;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanWarningCount(usize);

impl From<usize> for ScanWarningCount {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl ScanWarningCount {
    pub fn get(&self) -> usize {
        self.0
    }
}

/// A session file or directory entry that had to be skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("log store does not exist: {0}")]
    StoreMissing(String),

    #[error("log store is not readable: {path}: {source}")]
    StoreUnreadable { path: String, source: io::Error },

    #[error("scan cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ResolveProjectsDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_projects_dir() -> Result<PathBuf, ResolveProjectsDirError> {
    if let Some(override_dir) = std::env::var_os("CLAUDE_PROJECTS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = home_dir() else {
        return Err(ResolveProjectsDirError::HomeDirNotFound);
    };

    Ok(home.join(".claude").join("projects"))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanOptions {
    /// Case-insensitive substring matched against the project directory.
    pub project_filter: Option<String>,
    /// Exact encoded directory name, for sessions started in one folder.
    pub project_dir: Option<String>,
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            project_filter: None,
            project_dir: None,
            workers: default_worker_count(),
        }
    }
}

impl ScanOptions {
    pub fn from_env() -> Self {
        let workers = std::env::var("CCSHELF_SCAN_WORKERS")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .map(|value| value.clamp(1, MAX_WORKERS))
            .unwrap_or_else(default_worker_count);
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn with_project_filter(mut self, filter: Option<String>) -> Self {
        self.project_filter = filter
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn with_project_dir(mut self, project_path: Option<&Path>) -> Self {
        self.project_dir = project_path.map(encode_project_path);
        self
    }

    fn matches_project(&self, encoded_directory: &str) -> bool {
        if self
            .project_dir
            .as_deref()
            .is_some_and(|expected| expected != encoded_directory)
        {
            return false;
        }
        let Some(filter) = self.project_filter.as_deref() else {
            return true;
        };
        encoded_directory.to_lowercase().contains(filter)
            || decode_encoded_directory(encoded_directory)
                .to_string_lossy()
                .to_lowercase()
                .contains(filter)
    }
}

fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .min(DEFAULT_MAX_WORKERS)
}

/// Files-completed counter, readable from other threads while a scan runs.
#[derive(Debug, Default)]
pub struct ScanProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanProgressSnapshot {
    pub completed: usize,
    pub total: usize,
}

impl ScanProgress {
    pub fn snapshot(&self) -> ScanProgressSnapshot {
        ScanProgressSnapshot {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
        }
    }

    fn begin(&self, total: usize) {
        self.completed.store(0, Ordering::Release);
        self.total.store(total, Ordering::Release);
    }

    fn complete_one(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    pub sessions: Vec<SessionSummary>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanOutput {
    pub fn warning_count(&self) -> ScanWarningCount {
        ScanWarningCount::from(self.warnings.len())
    }
}

#[derive(Clone, Debug)]
struct SessionFileJob {
    encoded_directory: String,
    log_path: PathBuf,
}

pub fn scan_projects_dir(
    projects_dir: &Path,
    options: &ScanOptions,
    progress: &ScanProgress,
    cancel: &CancelFlag,
) -> Result<ScanOutput, ScanError> {
    let mut warnings: Vec<ScanWarning> = Vec::new();
    let jobs = discover_session_files(projects_dir, options, &mut warnings)?;
    info!(
        store = %projects_dir.display(),
        files = jobs.len(),
        workers = options.workers,
        "scanning session files"
    );

    progress.begin(jobs.len());
    let (mut sessions, file_warnings) = scan_jobs(&jobs, options.workers, progress, cancel)?;
    warnings.extend(file_warnings);

    sessions.sort_by(|a, b| {
        b.activity_time()
            .cmp(&a.activity_time())
            .then_with(|| a.log_path.cmp(&b.log_path))
    });
    warnings.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(ScanOutput { sessions, warnings })
}

fn discover_session_files(
    projects_dir: &Path,
    options: &ScanOptions,
    warnings: &mut Vec<ScanWarning>,
) -> Result<Vec<SessionFileJob>, ScanError> {
    let entries = match fs::read_dir(projects_dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(ScanError::StoreMissing(
                projects_dir.display().to_string(),
            ));
        }
        Err(error) => {
            return Err(ScanError::StoreUnreadable {
                path: projects_dir.display().to_string(),
                source: error,
            });
        }
    };

    let mut jobs: Vec<SessionFileJob> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warnings.push(ScanWarning {
                    path: projects_dir.to_path_buf(),
                    message: error.to_string(),
                });
                continue;
            }
        };

        let Ok(file_type) = entry.file_type() else {
            warnings.push(ScanWarning {
                path: entry.path(),
                message: "unable to read file type".to_string(),
            });
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }

        let encoded_directory = entry.file_name().to_string_lossy().to_string();
        if encoded_directory.starts_with('.') {
            continue;
        }
        if !options.matches_project(&encoded_directory) {
            continue;
        }

        let walker = WalkDir::new(entry.path())
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter();
        for file in walker {
            let file = match file {
                Ok(file) => file,
                Err(error) => {
                    warnings.push(ScanWarning {
                        path: entry.path(),
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            if !file.file_type().is_file() {
                continue;
            }
            if file.path().extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            jobs.push(SessionFileJob {
                encoded_directory: encoded_directory.clone(),
                log_path: file.into_path(),
            });
        }
    }

    jobs.sort_by(|a, b| a.log_path.cmp(&b.log_path));
    Ok(jobs)
}

fn scan_jobs(
    jobs: &[SessionFileJob],
    workers: usize,
    progress: &ScanProgress,
    cancel: &CancelFlag,
) -> Result<(Vec<SessionSummary>, Vec<ScanWarning>), ScanError> {
    let worker_count = workers.clamp(1, jobs.len().max(1));
    let cursor = AtomicUsize::new(0);
    let (tx, rx) = channel::<Result<SessionSummary, ScanWarning>>();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let cursor = &cursor;
            scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };

                    let result = scan_session_file(&job.log_path, &job.encoded_directory)
                        .map_err(|error| {
                            warn!(path = %job.log_path.display(), %error, "skipping unreadable session file");
                            ScanWarning {
                                path: job.log_path.clone(),
                                message: error.to_string(),
                            }
                        });
                    progress.complete_one();
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    if cancel.is_cancelled() {
        debug!("scan cancelled; discarding partial results");
        return Err(ScanError::Cancelled);
    }

    let mut sessions: Vec<SessionSummary> = Vec::with_capacity(jobs.len());
    let mut warnings: Vec<ScanWarning> = Vec::new();
    for result in rx {
        match result {
            Ok(summary) => sessions.push(summary),
            Err(warning) => warnings.push(warning),
        }
    }
    Ok((sessions, warnings))
}

/// Reads one session log front to back and folds it into a summary.
///
/// Lines that fail to decode (including a half-written final line) are
/// counted and skipped; only I/O failures on the file itself are errors.
pub fn scan_session_file(path: &Path, encoded_directory: &str) -> io::Result<SessionSummary> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    let file_size_bytes = metadata.len();
    let file_modified = metadata.modified().ok();

    let mut reader = BufReader::new(file);
    let mut accumulator = SessionAccumulator::default();
    let mut buf: Vec<u8> = Vec::new();
    let mut sequence: u64 = 0;
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf)?;
        if bytes == 0 {
            break;
        }

        match decode_record_bytes(&buf, sequence) {
            Ok(record) => accumulator.observe(record),
            Err(DecodeError::Empty) => {}
            Err(error) => {
                debug!(path = %path.display(), line = sequence, %error, "skipping undecodable line");
                accumulator.decode_failures += 1;
            }
        }
        sequence += 1;
    }

    Ok(accumulator.finish(path, encoded_directory, file_size_bytes, file_modified))
}

#[derive(Debug, Default)]
struct SessionAccumulator {
    message_count: usize,
    /// Sequence and text of the earliest authored user record.
    first_user: Option<(u64, String)>,
    summary_text: Option<String>,
    custom_title: Option<String>,
    started_at: Option<OffsetDateTime>,
    last_activity: Option<OffsetDateTime>,
    cwd: Option<PathBuf>,
    content_chars: usize,
    decode_failures: usize,
}

impl SessionAccumulator {
    fn observe(&mut self, record: LogRecord) {
        if let Some(timestamp) = record.timestamp {
            self.started_at = Some(self.started_at.map_or(timestamp, |t| t.min(timestamp)));
            self.last_activity = Some(self.last_activity.map_or(timestamp, |t| t.max(timestamp)));
        }
        if self.cwd.is_none() {
            self.cwd = record.cwd.clone();
        }

        match record.kind {
            RecordKind::User => {
                if !is_authored_user_record(&record) {
                    return;
                }
                self.message_count += 1;
                self.content_chars += record.text.chars().count();
                if self
                    .first_user
                    .as_ref()
                    .is_none_or(|(sequence, _)| record.sequence < *sequence)
                {
                    self.first_user = Some((record.sequence, record.text));
                }
            }
            RecordKind::Assistant => {
                self.message_count += 1;
                self.content_chars += record.text.chars().count();
            }
            RecordKind::Summary => self.summary_text = Some(record.text),
            RecordKind::CustomTitle => self.custom_title = Some(record.text),
            RecordKind::System | RecordKind::Unrecognized => {}
        }
    }

    fn finish(
        self,
        path: &Path,
        encoded_directory: &str,
        file_size_bytes: u64,
        file_modified: Option<SystemTime>,
    ) -> SessionSummary {
        let session_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let project_path = self
            .cwd
            .unwrap_or_else(|| decode_encoded_directory(encoded_directory));

        SessionSummary {
            is_agent: session_id.starts_with("agent-"),
            identity: SessionIdentity {
                project_path,
                encoded_directory: encoded_directory.to_string(),
                session_id,
            },
            log_path: path.to_path_buf(),
            file_size_bytes,
            file_modified,
            message_count: self.message_count,
            first_user_text: self.first_user.map(|(_, text)| text),
            summary_text: self.summary_text,
            custom_title: self.custom_title,
            started_at: self.started_at,
            last_activity: self.last_activity,
            content_chars: self.content_chars,
            decode_failures: self.decode_failures,
        }
    }
}

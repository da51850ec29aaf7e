use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;
use time::OffsetDateTime;

/// Where a session lives on disk and which project it belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionIdentity {
    pub project_path: PathBuf,
    pub encoded_directory: String,
    pub session_id: String,
}

impl SessionIdentity {
    /// Last path component of the project, used as a short display name.
    pub fn project_name(&self) -> String {
        self.project_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.encoded_directory.clone())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionSummary {
    pub identity: SessionIdentity,
    pub log_path: PathBuf,
    pub file_size_bytes: u64,
    pub file_modified: Option<SystemTime>,

    /// User and assistant records that survived classification.
    pub message_count: usize,
    pub first_user_text: Option<String>,
    pub summary_text: Option<String>,
    pub custom_title: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub last_activity: Option<OffsetDateTime>,

    pub content_chars: usize,
    pub decode_failures: usize,
    pub is_agent: bool,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Rough token estimate, four characters per token.
    pub fn estimated_tokens(&self) -> usize {
        self.content_chars / 4
    }

    /// Best-known activity time: latest record timestamp, else file mtime.
    pub fn activity_time(&self) -> Option<OffsetDateTime> {
        self.last_activity
            .or_else(|| self.file_modified.map(OffsetDateTime::from))
    }

    /// Sidecar directory some sessions keep next to their log file.
    pub fn companion_dir(&self) -> PathBuf {
        self.log_path.with_extension("")
    }
}

/// Per-project totals, also emitted by `stats --json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProjectStats {
    pub name: String,
    pub project_path: PathBuf,
    pub sessions: usize,
    pub total_bytes: u64,
    pub estimated_tokens: usize,
}

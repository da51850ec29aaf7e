use crate::domain::SessionSummary;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<PathBuf>,
    pub failed: usize,
    pub skipped_outside_store: usize,
    pub freed_bytes: u64,
}

/// Removes each session's log file and, when present, its companion directory.
/// Paths outside `projects_dir` are never touched.
pub fn delete_session_logs(projects_dir: &Path, sessions: &[SessionSummary]) -> DeleteOutcome {
    let mut outcome = DeleteOutcome::default();

    for session in sessions {
        if !session.log_path.starts_with(projects_dir) {
            outcome.skipped_outside_store += 1;
            continue;
        }

        if let Err(error) = fs::remove_file(&session.log_path) {
            warn!(path = %session.log_path.display(), %error, "failed to delete session log");
            outcome.failed += 1;
            continue;
        }
        debug!(path = %session.log_path.display(), "deleted session log");

        let companion = session.companion_dir();
        if companion.is_dir() {
            if let Err(error) = fs::remove_dir_all(&companion) {
                warn!(path = %companion.display(), %error, "failed to delete session directory");
            }
        }

        outcome.freed_bytes = outcome.freed_bytes.saturating_add(session.file_size_bytes);
        outcome.deleted.push(session.log_path.clone());
    }

    outcome
}

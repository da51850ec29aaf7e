use crate::domain::{SessionSummary, project_names};
use crate::infra::{
    CancelFlag, ScanError, ScanOptions, ScanProgress, ScanWarning, ScanWarningCount,
    delete_session_logs, scan_projects_dir,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

/// One complete, immutable result of a scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub sessions: Vec<SessionSummary>,
    pub warnings: Vec<ScanWarning>,
}

impl IndexSnapshot {
    pub fn warning_count(&self) -> ScanWarningCount {
        ScanWarningCount::from(self.warnings.len())
    }

    pub fn find_session(&self, session_id: &str) -> Option<&SessionSummary> {
        self.sessions
            .iter()
            .find(|session| session.identity.session_id == session_id)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RefreshReport {
    pub generation: u64,
    pub sessions: usize,
    pub skipped: ScanWarningCount,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RefreshStatus {
    pub in_progress: bool,
    pub completed: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Default)]
pub struct PruneOutcome {
    pub dry_run: bool,
    pub candidates: Vec<SessionSummary>,
    pub deleted: usize,
    pub failed: usize,
    pub freed_bytes: u64,
}

/// Process-lifetime collection of session summaries.
///
/// Readers take an `Arc` of the current snapshot and keep it as long as they
/// like. Writers (`refresh`, `prune_empty`) serialize on `write_lock` and
/// publish a whole new snapshot in a single swap.
#[derive(Debug)]
pub struct SessionIndex {
    projects_dir: PathBuf,
    options: ScanOptions,
    current: RwLock<Arc<IndexSnapshot>>,
    write_lock: Mutex<()>,
    progress: ScanProgress,
    refreshing: AtomicBool,
}

impl SessionIndex {
    pub fn new(projects_dir: PathBuf, options: ScanOptions) -> Self {
        Self {
            projects_dir,
            options,
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            write_lock: Mutex::new(()),
            progress: ScanProgress::default(),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn project_names(&self) -> Vec<String> {
        project_names(&self.snapshot().sessions)
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        let progress = self.progress.snapshot();
        RefreshStatus {
            in_progress: self.refreshing.load(Ordering::Acquire),
            completed: progress.completed,
            total: progress.total,
        }
    }

    /// Rescans the store and swaps the result in. On error or cancellation
    /// the previous snapshot stays current.
    pub fn refresh(&self, cancel: &CancelFlag) -> Result<RefreshReport, ScanError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.refreshing.store(true, Ordering::Release);
        let result = scan_projects_dir(&self.projects_dir, &self.options, &self.progress, cancel);
        self.refreshing.store(false, Ordering::Release);
        let output = result?;

        let generation = self.snapshot().generation + 1;
        let report = RefreshReport {
            generation,
            sessions: output.sessions.len(),
            skipped: output.warning_count(),
        };
        self.publish(IndexSnapshot {
            generation,
            sessions: output.sessions,
            warnings: output.warnings,
        });

        info!(
            generation = report.generation,
            sessions = report.sessions,
            skipped = report.skipped.get(),
            "session index refreshed"
        );
        Ok(report)
    }

    /// Deletes sessions whose message count is zero, regardless of file size.
    pub fn prune_empty(&self, dry_run: bool) -> PruneOutcome {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.snapshot();
        let candidates: Vec<SessionSummary> = current
            .sessions
            .iter()
            .filter(|session| session.is_empty())
            .cloned()
            .collect();

        if dry_run || candidates.is_empty() {
            return PruneOutcome {
                dry_run,
                candidates,
                ..PruneOutcome::default()
            };
        }

        let deleted = delete_session_logs(&self.projects_dir, &candidates);
        let removed: BTreeSet<&PathBuf> = deleted.deleted.iter().collect();
        let sessions: Vec<SessionSummary> = current
            .sessions
            .iter()
            .filter(|session| !removed.contains(&session.log_path))
            .cloned()
            .collect();
        self.publish(IndexSnapshot {
            generation: current.generation + 1,
            sessions,
            warnings: current.warnings.clone(),
        });

        info!(
            deleted = deleted.deleted.len(),
            failed = deleted.failed,
            freed_bytes = deleted.freed_bytes,
            "pruned empty sessions"
        );
        PruneOutcome {
            dry_run,
            candidates,
            deleted: deleted.deleted.len(),
            failed: deleted.failed + deleted.skipped_outside_store,
            freed_bytes: deleted.freed_bytes,
        }
    }

    fn publish(&self, next: IndexSnapshot) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    fn user_line(text: &str) -> String {
        serde_json::json!({
            "type": "user",
            "cwd": "/work/app",
            "timestamp": "2026-02-19T00:00:00Z",
            "message": { "content": text }
        })
        .to_string()
    }

    fn setup_store(root: &Path) {
        let key_dir = root.join("-work-app");
        fs::create_dir_all(&key_dir).expect("create");
        fs::write(key_dir.join("talk.jsonl"), format!("{}\n", user_line("hello"))).expect("write");
        fs::write(
            key_dir.join("quiet.jsonl"),
            concat!(
                r#"{"type":"summary","summary":"nothing happened","leafUuid":"x"}"#,
                "\n",
                r#"{"type":"system","content":"<tool-call>ls</tool-call>"}"#,
                "\n"
            ),
        )
        .expect("write");
        fs::create_dir_all(key_dir.join("quiet")).expect("create companion");
    }

    fn options() -> ScanOptions {
        ScanOptions {
            workers: 2,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn starts_empty_and_refresh_populates() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        assert!(index.snapshot().sessions.is_empty());

        let report = index.refresh(&CancelFlag::default()).expect("refresh");
        assert_eq!(report.generation, 1);
        assert_eq!(report.sessions, 2);
        assert_eq!(report.skipped.get(), 0);
        assert_eq!(index.project_names(), vec!["app"]);

        let status = index.refresh_status();
        assert!(!status.in_progress);
        assert_eq!(status.completed, 2);
        assert_eq!(status.total, 2);
    }

    #[test]
    fn refresh_twice_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());

        index.refresh(&CancelFlag::default()).expect("refresh");
        let first = index.snapshot();
        index.refresh(&CancelFlag::default()).expect("refresh");
        let second = index.snapshot();

        assert_eq!(first.sessions, second.sessions);
        assert_eq!(second.generation, first.generation + 1);
    }

    #[test]
    fn held_snapshot_is_unaffected_by_refresh() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        index.refresh(&CancelFlag::default()).expect("refresh");
        let held = index.snapshot();

        fs::write(
            dir.path().join("-work-app").join("new.jsonl"),
            format!("{}\n", user_line("later")),
        )
        .expect("write");
        index.refresh(&CancelFlag::default()).expect("refresh");

        assert_eq!(held.sessions.len(), 2);
        assert_eq!(index.snapshot().sessions.len(), 3);
    }

    #[test]
    fn failed_or_cancelled_refresh_keeps_previous_snapshot() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        index.refresh(&CancelFlag::default()).expect("refresh");

        let cancel = CancelFlag::default();
        cancel.cancel();
        assert!(matches!(index.refresh(&cancel), Err(ScanError::Cancelled)));
        assert_eq!(index.snapshot().generation, 1);
        assert_eq!(index.snapshot().sessions.len(), 2);

        let missing = SessionIndex::new(dir.path().join("missing"), options());
        assert!(matches!(
            missing.refresh(&CancelFlag::default()),
            Err(ScanError::StoreMissing(_))
        ));
        assert!(missing.snapshot().sessions.is_empty());
        assert!(!missing.refresh_status().in_progress);
    }

    #[test]
    fn prune_dry_run_reports_without_deleting() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        index.refresh(&CancelFlag::default()).expect("refresh");

        let outcome = index.prune_empty(true);
        assert!(outcome.dry_run);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].identity.session_id, "quiet");
        assert_eq!(outcome.deleted, 0);
        assert!(dir.path().join("-work-app").join("quiet.jsonl").exists());
        assert_eq!(index.snapshot().sessions.len(), 2);
    }

    #[test]
    fn prune_removes_sessions_without_messages_even_if_file_is_not_empty() {
        let dir = tempdir().expect("tempdir");
        setup_store(dir.path());
        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        index.refresh(&CancelFlag::default()).expect("refresh");

        let quiet = dir.path().join("-work-app").join("quiet.jsonl");
        assert!(fs::metadata(&quiet).expect("metadata").len() > 0);

        let outcome = index.prune_empty(false);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.freed_bytes > 0);
        assert!(!quiet.exists());
        assert!(!dir.path().join("-work-app").join("quiet").exists());
        assert!(dir.path().join("-work-app").join("talk.jsonl").exists());

        let snapshot = index.snapshot();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.sessions.len(), 1);
        assert!(snapshot.find_session("talk").is_some());
        assert!(snapshot.find_session("quiet").is_none());
    }

    #[test]
    fn readers_never_see_a_partial_refresh() {
        let dir = tempdir().expect("tempdir");
        let key_dir = dir.path().join("-work-app");
        fs::create_dir_all(&key_dir).expect("create");
        for idx in 0..40 {
            fs::write(
                key_dir.join(format!("s{idx}.jsonl")),
                format!("{}\n", user_line("hi")),
            )
            .expect("write");
        }

        let index = SessionIndex::new(dir.path().to_path_buf(), options());
        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                for _ in 0..500 {
                    let snapshot = index.snapshot();
                    let len = snapshot.sessions.len();
                    assert!(len == 0 || len == 40, "saw {len} sessions");
                }
            });
            index.refresh(&CancelFlag::default()).expect("refresh");
            reader.join().expect("reader");
        });
        assert_eq!(index.snapshot().sessions.len(), 40);
    }
}

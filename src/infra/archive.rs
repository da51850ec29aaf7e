use crate::domain::SessionSummary;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::Builder;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no sessions to archive")]
    NothingToArchive,

    #[error("failed to create archive {path}: {source}")]
    Create { path: String, source: io::Error },

    #[error("failed to add {path} to archive: {source}")]
    Append { path: String, source: io::Error },

    #[error("failed to finish archive {path}: {source}")]
    Finish { path: String, source: io::Error },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveReport {
    pub output: PathBuf,
    pub sessions: usize,
    pub source_bytes: u64,
}

/// Entry name of a session log inside the archive: `<project>/<session_id>.jsonl`.
fn entry_prefix(session: &SessionSummary) -> String {
    format!(
        "{}/{}",
        session.identity.project_name(),
        session.identity.session_id
    )
}

/// Writes `sessions` into one gzip-compressed tarball. Companion directories
/// are stored under `<project>/<session_id>/`. On failure the partial output
/// file is removed.
pub fn archive_sessions(
    sessions: &[SessionSummary],
    output: &Path,
) -> Result<ArchiveReport, ArchiveError> {
    if sessions.is_empty() {
        return Err(ArchiveError::NothingToArchive);
    }

    let file = File::create(output).map_err(|source| ArchiveError::Create {
        path: output.display().to_string(),
        source,
    })?;
    let source_bytes = match write_archive(file, sessions, output) {
        Ok(source_bytes) => source_bytes,
        Err(error) => {
            if let Err(remove_error) = fs::remove_file(output) {
                warn!(
                    output = %output.display(),
                    error = %remove_error,
                    "failed to remove partial archive"
                );
            }
            return Err(error);
        }
    };

    info!(output = %output.display(), sessions = sessions.len(), "archived sessions");
    Ok(ArchiveReport {
        output: output.to_path_buf(),
        sessions: sessions.len(),
        source_bytes,
    })
}

fn write_archive(
    file: File,
    sessions: &[SessionSummary],
    output: &Path,
) -> Result<u64, ArchiveError> {
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    let mut source_bytes: u64 = 0;
    for session in sessions {
        let prefix = entry_prefix(session);
        builder
            .append_path_with_name(&session.log_path, format!("{prefix}.jsonl"))
            .map_err(|source| ArchiveError::Append {
                path: session.log_path.display().to_string(),
                source,
            })?;
        source_bytes = source_bytes.saturating_add(session.file_size_bytes);

        let companion = session.companion_dir();
        if companion.is_dir() {
            builder
                .append_dir_all(&prefix, &companion)
                .map_err(|source| ArchiveError::Append {
                    path: companion.display().to_string(),
                    source,
                })?;
        }
    }

    let finish_error = |source| ArchiveError::Finish {
        path: output.display().to_string(),
        source,
    };
    let encoder = builder.into_inner().map_err(finish_error)?;
    encoder.finish().map_err(finish_error)?;
    Ok(source_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::scan_session_file;
    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).expect("open archive");
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = archive
            .entries()
            .expect("entries")
            .map(|entry| {
                let entry = entry.expect("entry");
                entry
                    .path()
                    .expect("path")
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn archives_logs_and_companion_dirs() {
        let store = tempdir().expect("tempdir");
        let key_dir = store.path().join("-work-app");
        fs::create_dir_all(key_dir.join("s1").join("tool-results")).expect("create");
        fs::write(
            key_dir.join("s1").join("tool-results").join("out.txt"),
            "output",
        )
        .expect("write");
        fs::write(
            key_dir.join("s1.jsonl"),
            concat!(
                r#"{"type":"user","cwd":"/work/app","message":{"content":"hi"}}"#,
                "\n"
            ),
        )
        .expect("write");
        fs::write(key_dir.join("s2.jsonl"), "").expect("write");

        let sessions = vec![
            scan_session_file(&key_dir.join("s1.jsonl"), "-work-app").expect("scan"),
            scan_session_file(&key_dir.join("s2.jsonl"), "-work-app").expect("scan"),
        ];

        let out_dir = tempdir().expect("tempdir");
        let output = out_dir.path().join("sessions.tar.gz");
        let report = archive_sessions(&sessions, &output).expect("archive");
        assert_eq!(report.sessions, 2);
        assert_eq!(report.source_bytes, sessions[0].file_size_bytes);

        let names = entry_names(&output);
        assert!(names.contains(&"app/s1.jsonl".to_string()));
        assert!(names.contains(&"app/s2.jsonl".to_string()));
        assert!(names.contains(&"app/s1/tool-results/out.txt".to_string()));
        assert!(key_dir.join("s1.jsonl").exists());
    }

    #[test]
    fn vanished_session_leaves_no_partial_archive() {
        let store = tempdir().expect("tempdir");
        let key_dir = store.path().join("-work-app");
        fs::create_dir_all(&key_dir).expect("create");
        for id in ["s1", "s2"] {
            fs::write(
                key_dir.join(format!("{id}.jsonl")),
                concat!(r#"{"type":"user","message":{"content":"hi"}}"#, "\n"),
            )
            .expect("write");
        }
        let sessions = vec![
            scan_session_file(&key_dir.join("s1.jsonl"), "-work-app").expect("scan"),
            scan_session_file(&key_dir.join("s2.jsonl"), "-work-app").expect("scan"),
        ];
        fs::remove_file(key_dir.join("s2.jsonl")).expect("remove");

        let out_dir = tempdir().expect("tempdir");
        let output = out_dir.path().join("sessions.tar.gz");
        let err = archive_sessions(&sessions, &output).expect_err("vanished session");
        assert!(matches!(err, ArchiveError::Append { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn refuses_empty_selection() {
        let out_dir = tempdir().expect("tempdir");
        let err = archive_sessions(&[], &out_dir.path().join("x.tar.gz")).expect_err("empty");
        assert!(matches!(err, ArchiveError::NothingToArchive));
    }
}

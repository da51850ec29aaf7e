use crate::domain::{ProjectStats, SessionSummary};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-project totals, largest projects first.
pub fn compute_project_stats(sessions: &[SessionSummary]) -> Vec<ProjectStats> {
    let mut grouped: BTreeMap<PathBuf, ProjectStats> = BTreeMap::new();
    for session in sessions {
        let entry = grouped
            .entry(session.identity.project_path.clone())
            .or_insert_with(|| ProjectStats {
                name: session.identity.project_name(),
                project_path: session.identity.project_path.clone(),
                sessions: 0,
                total_bytes: 0,
                estimated_tokens: 0,
            });
        entry.sessions += 1;
        entry.total_bytes = entry.total_bytes.saturating_add(session.file_size_bytes);
        entry.estimated_tokens = entry
            .estimated_tokens
            .saturating_add(session.estimated_tokens());
    }

    let mut stats: Vec<ProjectStats> = grouped.into_values().collect();
    stats.sort_by(|a, b| {
        b.total_bytes
            .cmp(&a.total_bytes)
            .then_with(|| a.project_path.cmp(&b.project_path))
    });
    stats
}

/// Sorted, de-duplicated project display names.
pub fn project_names(sessions: &[SessionSummary]) -> Vec<String> {
    let mut names: Vec<String> = sessions
        .iter()
        .map(|session| session.identity.project_name())
        .collect();
    names.sort();
    names.dedup();
    names
}

pub fn format_token_count(tokens: usize) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionIdentity;

    fn session(project: &str, id: &str, bytes: u64, chars: usize) -> SessionSummary {
        SessionSummary {
            identity: SessionIdentity {
                project_path: PathBuf::from(project),
                encoded_directory: project.replace('/', "-"),
                session_id: id.to_string(),
            },
            log_path: PathBuf::from(format!("/store/{id}.jsonl")),
            file_size_bytes: bytes,
            file_modified: None,
            message_count: 1,
            first_user_text: None,
            summary_text: None,
            custom_title: None,
            started_at: None,
            last_activity: None,
            content_chars: chars,
            decode_failures: 0,
            is_agent: false,
        }
    }

    #[test]
    fn aggregates_by_project_and_sorts_by_size() {
        let sessions = vec![
            session("/w/small", "a", 10, 40),
            session("/w/big", "b", 500, 4000),
            session("/w/small", "c", 20, 80),
        ];
        let stats = compute_project_stats(&sessions);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "big");
        assert_eq!(stats[0].estimated_tokens, 1000);
        assert_eq!(stats[1].name, "small");
        assert_eq!(stats[1].sessions, 2);
        assert_eq!(stats[1].total_bytes, 30);
        assert_eq!(stats[1].estimated_tokens, 30);
    }

    #[test]
    fn lists_unique_project_names() {
        let sessions = vec![
            session("/w/b", "1", 0, 0),
            session("/w/a", "2", 0, 0),
            session("/w/b", "3", 0, 0),
        ];
        assert_eq!(project_names(&sessions), vec!["a", "b"]);
    }

    #[test]
    fn formats_token_counts() {
        assert_eq!(format_token_count(999), "999");
        assert_eq!(format_token_count(1_500), "1.5K");
        assert_eq!(format_token_count(2_000_000), "2.0M");
    }
}

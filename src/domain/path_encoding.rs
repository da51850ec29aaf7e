use std::path::{Path, PathBuf};

pub const ENCODED_SEPARATOR: char = '-';

/// Directory key the log store uses for a project path.
///
/// Every character outside `[A-Za-z0-9]` becomes `-`, so `/srv/my_app.io`
/// is stored under `-srv-my-app-io`. Distinct paths may collide (`/a-b`,
/// `/a_b` and `/a/b`); callers must not rely on the mapping being injective.
pub fn encode_project_path(project_path: &Path) -> String {
    project_path
        .to_string_lossy()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch
            } else {
                ENCODED_SEPARATOR
            }
        })
        .collect()
}

/// Best-effort guess at the project path behind an encoded directory name.
///
/// Every `-` is read back as a separator, which is wrong for paths that
/// contained dashes; a `cwd` recorded inside the log is preferred when present.
pub fn decode_encoded_directory(encoded: &str) -> PathBuf {
    let trimmed = encoded.strip_prefix(ENCODED_SEPARATOR).unwrap_or(encoded);
    PathBuf::from(format!("/{}", trimmed.replace(ENCODED_SEPARATOR, "/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_separators() {
        assert_eq!(
            encode_project_path(Path::new("/home/user/project")),
            "-home-user-project"
        );
    }

    #[test]
    fn encodes_dots_underscores_and_spaces() {
        assert_eq!(
            encode_project_path(Path::new("/srv/site.io/my_app/new dir")),
            "-srv-site-io-my-app-new-dir"
        );
        assert_eq!(
            encode_project_path(Path::new("/home/u/.config")),
            "-home-u--config"
        );
    }

    #[test]
    fn decodes_dashes_as_separators() {
        assert_eq!(
            decode_encoded_directory("-home-user-project"),
            PathBuf::from("/home/user/project")
        );
        assert_eq!(decode_encoded_directory("plain"), PathBuf::from("/plain"));
    }

    #[test]
    fn encoding_is_not_injective() {
        let dashed = encode_project_path(Path::new("/srv/a-b"));
        let nested = encode_project_path(Path::new("/srv/a/b"));
        assert_eq!(dashed, nested);
    }
}

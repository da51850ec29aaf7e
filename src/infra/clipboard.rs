use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

const CLIPBOARD_ENV: &str = "CCSHELF_CLIPBOARD";

/// Text headed for the clipboard, optionally prefixed with `cd <dir> && `.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClipboardPayload {
    pub text: String,
    pub cd_prefix: Option<PathBuf>,
}

impl ClipboardPayload {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cd_prefix: None,
        }
    }

    pub fn in_directory(text: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            text: text.into(),
            cd_prefix: Some(dir),
        }
    }

    pub fn render(&self) -> String {
        match &self.cd_prefix {
            Some(dir) => format!(
                "cd {} && {}",
                shell_quote(&dir.to_string_lossy()),
                self.text
            ),
            None => self.text.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClipboardTool {
    pub program: String,
    pub args: Vec<String>,
}

impl ClipboardTool {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Parses a whitespace-separated command line such as `xclip -selection clipboard`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let program = parts.next()?.to_string();
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("no clipboard tool found (tried {0}); set CCSHELF_CLIPBOARD")]
    NoTool(String),

    #[error("failed to launch clipboard tool {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Candidate tools in the order they are tried. An explicit `CCSHELF_CLIPBOARD`
/// replaces the autodetected list.
pub fn clipboard_tools() -> Vec<ClipboardTool> {
    if let Some(tool) = std::env::var(CLIPBOARD_ENV)
        .ok()
        .and_then(|raw| ClipboardTool::parse(&raw))
    {
        return vec![tool];
    }

    let mut tools = Vec::new();
    if cfg!(target_os = "macos") {
        tools.push(ClipboardTool::new("pbcopy", &[]));
    }
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        tools.push(ClipboardTool::new("wl-copy", &[]));
    }
    tools.push(ClipboardTool::new("xclip", &["-selection", "clipboard"]));
    tools.push(ClipboardTool::new("xsel", &["--clipboard", "--input"]));
    tools
}

/// Hands `payload` to the first tool that launches and returns without
/// waiting for it to exit. The payload is fully written and stdin closed
/// before returning; only the exit is awaited in the background, since some
/// tools stay alive serving the selection until the next paste. Only launch
/// failures are reported.
pub fn copy_to_clipboard(payload: &ClipboardPayload) -> Result<ClipboardTool, ClipboardError> {
    copy_with_tools(&payload.render(), &clipboard_tools())
}

pub fn copy_with_tools(
    text: &str,
    tools: &[ClipboardTool],
) -> Result<ClipboardTool, ClipboardError> {
    for tool in tools {
        match spawn_tool(tool) {
            Ok(mut child) => {
                if let Err(error) = write_payload(&mut child, text) {
                    warn!(program = %tool.program, %error, "failed to write clipboard payload");
                }
                reap_in_background(child, tool.program.clone());
                debug!(program = %tool.program, "clipboard tool launched");
                return Ok(tool.clone());
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => {
                return Err(ClipboardError::Launch {
                    program: tool.program.clone(),
                    source: error,
                });
            }
        }
    }

    let tried = tools
        .iter()
        .map(|tool| tool.program.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ClipboardError::NoTool(tried))
}

fn spawn_tool(tool: &ClipboardTool) -> io::Result<Child> {
    Command::new(&tool.program)
        .args(&tool.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

/// Writes `text` to the child's stdin and closes it so the tool sees EOF.
fn write_payload(child: &mut Child, text: &str) -> io::Result<()> {
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }
    Ok(())
}

fn reap_in_background(mut child: Child, program: String) {
    thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => {
            debug!(%program, %status, "clipboard tool exited with failure");
        }
        Ok(_) => {}
        Err(error) => debug!(%program, %error, "failed to reap clipboard tool"),
    });
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value.chars().all(|ch| {
            ch.is_ascii_alphanumeric() || matches!(ch, '/' | '.' | '_' | '-' | '+' | ':' | '@' | ',')
        });
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

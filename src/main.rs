mod cli;
mod domain;
mod infra;

use crate::cli::CliInvocation;
use crate::infra::{ResolveProjectsDirError, resolve_projects_dir};
use std::io::{self, Write};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CCSHELF_LOG";

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    ProjectsDir(#[from] ResolveProjectsDirError),

    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(command) => {
            init_logging();
            let projects_dir = resolve_projects_dir()?;
            crate::cli::run(command, &projects_dir)?;
            Ok(())
        }
    }
}

/// `CCSHELF_LOG` wins over `RUST_LOG`; without either only warnings are shown.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn print_help() {
    let text = format!(
        "{name} - browse and tidy Claude session logs\n\nUSAGE:\n  {name} [list] [--project P] [--here] [--no-agents] [--width N]  List sessions, newest first\n  {name} count [--project P] [--here] [--no-agents]  Print the number of sessions\n  {name} projects                           List project names\n  {name} stats [--json]                      Per-project session count, size and tokens\n  {name} prune-empty [--dry-run]            Delete sessions with no messages\n  {name} archive <session-id>... --output FILE  Write sessions to a .tar.gz\n  {name} export <session-id> [--output DIR] Render a session as Markdown\n  {name} yank <session-id> [--path]         Copy the resume command (or log path) to the clipboard\n  {name} --help | --version\n\nSession ids may be given as a unique prefix.\n\nLIST FLAGS:\n  --project P    Case-insensitive substring of the project path\n  --here         Only the project for the current directory\n  --no-agents    Hide agent- sub-sessions\n  --width N      Preview width in columns (default: 50)\n\nOUTPUT:\n  list: project<TAB>session_id<TAB>last_activity<TAB>size_bytes<TAB>preview\n\nENV:\n  CLAUDE_PROJECTS_DIR   Override the log store (default: ~/.claude/projects)\n  CCSHELF_CLIPBOARD     Clipboard command line (default: pbcopy, wl-copy, xclip or xsel)\n  CCSHELF_SCAN_WORKERS  Scan worker threads (default: min(cpus, 8), max 32)\n  CCSHELF_LOG           Log filter, e.g. debug (falls back to RUST_LOG; default: warn)\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}

use super::BuiltinCommand;
use crate::command::{Flow, StageIo};
use crate::env::Environment;
use anyhow::Result;
use argh::FromArgs;
use std::fs;
use std::io::Write;
use tracing::warn;

/// How many trailing history entries `history` shows.
pub const HISTORY_DISPLAY_LIMIT: usize = 200;

#[derive(FromArgs)]
/// show operating system, machine and shell details
pub struct Info {}

impl BuiltinCommand for Info {
    fn name() -> &'static str {
        "info"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        writeln!(io.stdout, "OS: {} ({})", std::env::consts::OS, std::env::consts::FAMILY)?;
        writeln!(io.stdout, "Machine: {}", std::env::consts::ARCH)?;
        writeln!(io.stdout, "Shell: mysh {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(io.stdout, "CWD: {}", env.current_dir.display())?;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// print the current user name
pub struct Whoami {}

impl BuiltinCommand for Whoami {
    fn name() -> &'static str {
        "whoami"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let user = env
            .get_var("USER")
            .or_else(|| env.get_var("USERNAME"))
            .unwrap_or_else(|| "Unknown".to_string());
        writeln!(io.stdout, "{}", user)?;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// show the most recent entries of the history file, numbered
pub struct History {}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let Some(path) = &env.history_file else {
            return Ok(Flow::Continue);
        };
        // A missing or unreadable history file just means nothing to show.
        let content = match fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "history file unreadable");
                return Ok(Flow::Continue);
            }
        };
        let escaped = content.starts_with(V2_HEADER);
        let entries: Vec<String> = content
            .lines()
            .filter(|line| !is_history_header(line))
            .map(|line| if escaped { unescape(line) } else { line.to_string() })
            .collect();
        let skip = entries.len().saturating_sub(HISTORY_DISPLAY_LIMIT);
        for (i, line) in entries[skip..].iter().enumerate() {
            writeln!(io.stdout, "{}: {}", i + 1, line)?;
        }
        Ok(Flow::Continue)
    }
}

/// rustyline writes a version marker as the first line of its history files.
fn is_history_header(line: &str) -> bool {
    line.starts_with("#V")
}

const V2_HEADER: &str = "#V2";

/// Undoes the `\\` and `\n` escaping of a `#V2` history file.
fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(FromArgs)]
/// clear the terminal screen
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(self, io: &mut StageIo<'_>, _env: &mut Environment) -> Result<Flow> {
        io.stdout.write_all(b"\x1b[2J\x1b[H")?;
        Ok(Flow::Continue)
    }
}

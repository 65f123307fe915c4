//! Line-oriented front end: an interactive rustyline session on a terminal,
//! plain line reading otherwise.

use crate::command::{ExitCode, Flow};
use crate::interpreter::Interpreter;
use anyhow::{Context as _, Result};
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Context, Editor, Helper, Highlighter, Hinter, Validator};
use std::io::{self, BufRead, IsTerminal};
use std::path::Path;
use tracing::{debug, warn};

/// Completes builtin names in command position and file names everywhere else.
#[derive(Helper, Hinter, Highlighter, Validator)]
pub struct ShellHelper {
    builtins: Vec<&'static str>,
    files: FilenameCompleter,
}

impl ShellHelper {
    pub fn new(builtins: Vec<&'static str>) -> Self {
        Self {
            builtins,
            files: FilenameCompleter::new(),
        }
    }

    fn complete_command(&self, prefix: &str) -> Vec<Pair> {
        self.builtins
            .iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| Pair {
                display: name.to_string(),
                replacement: format!("{} ", name),
            })
            .collect()
    }
}

/// Byte offset where the word under the cursor starts, and whether that word
/// is the command name of its stage.
fn word_start(before_cursor: &str) -> (usize, bool) {
    let start = before_cursor
        .rfind(|c: char| c.is_ascii_whitespace() || c == '|')
        .map_or(0, |i| i + 1);
    let preceding = before_cursor[..start].trim_end();
    (start, preceding.is_empty() || preceding.ends_with('|'))
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, command_position) = word_start(&line[..pos]);
        if command_position {
            let candidates = self.complete_command(&line[start..pos]);
            if !candidates.is_empty() {
                return Ok((start, candidates));
            }
        }
        self.files.complete(line, pos, ctx)
    }
}

/// `"<last component of cwd> $ "`.
pub fn prompt(cwd: &Path) -> String {
    let name = cwd
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cwd.display().to_string());
    format!("{} $ ", name)
}

/// Runs until `exit`, end of input or an unrecoverable terminal error.
/// Returns the code the process should exit with.
pub fn run(interp: &mut Interpreter) -> Result<ExitCode> {
    if io::stdin().is_terminal() {
        interactive(interp)
    } else {
        batch(interp, io::stdin().lock())
    }
}

fn interactive(interp: &mut Interpreter) -> Result<ExitCode> {
    let mut rl: Editor<ShellHelper, DefaultHistory> =
        Editor::new().context("failed to initialise line editor")?;
    rl.set_helper(Some(ShellHelper::new(interp.registry().names())));

    let history = interp.config().history_file.clone();
    if let Some(path) = &history {
        if !path.exists() {
            if let Err(e) = std::fs::File::create(path) {
                warn!(path = %path.display(), error = %e, "cannot create history file");
            }
        }
        if let Err(e) = rl.load_history(path) {
            debug!(path = %path.display(), error = %e, "no history loaded");
        }
    }

    println!("Welcome to mysh. Type 'help' for builtin commands.");

    loop {
        match rl.readline(&prompt(&interp.env().current_dir)) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line.as_str()) {
                    warn!(error = %e, "failed to record history entry");
                }
                if let Some(path) = &history {
                    if let Err(e) = rl.append_history(path) {
                        warn!(path = %path.display(), error = %e, "failed to save history");
                    }
                }
                if let Flow::Exit(code) = interp.run_line(&line) {
                    return Ok(code);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                return Ok(0);
            }
            Err(err) => return Err(err).context("failed to read line"),
        }
    }
}

/// Executes every line of `input` in order, without prompting.
pub fn batch(interp: &mut Interpreter, mut input: impl BufRead) -> Result<ExitCode> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .context("failed to read input")?;
        if read == 0 {
            return Ok(0);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        if let Flow::Exit(code) = interp.run_line(line) {
            return Ok(code);
        }
    }
}

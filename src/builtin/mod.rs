//! Commands implemented in-process.
//!
//! Every builtin is an [`argh`] argument struct implementing
//! [`BuiltinCommand`]; [`Factory`] adapts one to the object-safe
//! [`BuiltinHandler`] capability and [`Registry`] maps names to factories.

mod files;
mod system;
mod text;

pub use files::{Cp, Find, Ls, Mkdir, Mv, Rm, Rmdir, Touch};
pub use system::{Clear, History, Info, Whoami};
pub use text::{Cat, Grep, Head, Tail, WC};

use crate::command::{BuiltinHandler, ExitCode, Flow, StageIo};
use crate::env::Environment;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use tracing::debug;

/// A command that runs inside the shell process.
///
/// Arguments arrive through `argh`; output goes to the stage's sinks.
pub trait BuiltinCommand: Sized + FromArgs {
    /// Name the command is registered under.
    fn name() -> &'static str;

    /// Extra names the command answers to.
    fn aliases() -> &'static [&'static str] {
        &[]
    }

    /// Rewrites raw arguments before `argh` sees them, for spellings argh
    /// cannot express (e.g. `head -5`).
    fn normalize_args(args: &[String]) -> Vec<String> {
        args.to_vec()
    }

    /// Runs with the stage's streams and the shell environment.
    ///
    /// An `Err` is reported as a diagnostic and does not stop the pipeline.
    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow>;
}

/// Zero-sized adapter from a [`BuiltinCommand`] type to a [`BuiltinHandler`].
pub struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> BuiltinHandler for Factory<T> {
    fn invoke(
        &self,
        name: &str,
        args: &[String],
        io: &mut StageIo<'_>,
        env: &mut Environment,
    ) -> Flow {
        let args = T::normalize_args(args);
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let cmd = match T::from_args(&[name], &args_ref) {
            Ok(cmd) => cmd,
            Err(EarlyExit { output, status }) => {
                match status {
                    Ok(()) => {
                        let _ = io.stdout.write_all(output.as_bytes());
                    }
                    Err(()) => io.diagnostic(name, output.trim_end()),
                }
                return Flow::Continue;
            }
        };

        match cmd.execute(io, env) {
            Ok(flow) => flow,
            Err(e) => {
                debug!(command = name, error = ?e, "builtin failed");
                io.diagnostic(name, format!("{:#}", e));
                Flow::Continue
            }
        }
    }
}

/// Fixed name-to-handler table, built once and only read afterwards.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn BuiltinHandler>>,
}

impl Registry {
    /// A registry with no commands at all.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Adds `T` under its name and every alias.
    pub fn with<T: BuiltinCommand + 'static>(mut self) -> Self {
        for name in std::iter::once(T::name()).chain(T::aliases().iter().copied()) {
            self.handlers
                .insert(name, Box::new(Factory::<T>::default()));
        }
        self
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<&dyn BuiltinHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// All registered names, aliases included, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for Registry {
    /// The standard builtin set.
    fn default() -> Self {
        Registry::empty()
            .with::<Pwd>()
            .with::<Cd>()
            .with::<Echo>()
            .with::<Exit>()
            .with::<Help>()
            .with::<Cat>()
            .with::<Head>()
            .with::<Tail>()
            .with::<Grep>()
            .with::<WC>()
            .with::<Ls>()
            .with::<Cp>()
            .with::<Mv>()
            .with::<Rm>()
            .with::<Mkdir>()
            .with::<Rmdir>()
            .with::<Touch>()
            .with::<Find>()
            .with::<Info>()
            .with::<Whoami>()
            .with::<History>()
            .with::<Clear>()
    }
}

#[derive(FromArgs)]
/// print the working directory
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        writeln!(io.stdout, "{}", env.current_dir.to_string_lossy())?;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// change the working directory (to $HOME when no target is given)
pub struct Cd {
    #[argh(positional)]
    /// target directory; `~` and relative paths are accepted
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let new_dir = match &self.target {
            Some(t) if !t.is_empty() => env.resolve_path(t),
            _ => env
                .home_dir()
                .ok_or_else(|| anyhow::anyhow!("no target and HOME not set"))?,
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;
        if !canonical.is_dir() {
            anyhow::bail!("{}: not a directory", canonical.display());
        }

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        debug!(dir = %canonical.display(), "changed directory");
        env.current_dir = canonical;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// leave the shell, optionally with a status code
pub struct Exit {
    #[argh(positional, greedy)]
    /// exit status (defaults to 0); taken greedily so negative values reach us intact
    pub args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn aliases() -> &'static [&'static str] {
        &["quit"]
    }

    fn execute(self, io: &mut StageIo<'_>, _env: &mut Environment) -> Result<Flow> {
        let code: ExitCode = match self.args.first() {
            None => 0,
            Some(raw) => match raw.parse() {
                Ok(code) => code,
                Err(_) => {
                    io.diagnostic("exit", format!("{}: numeric argument required", raw));
                    2
                }
            },
        };
        Ok(Flow::Exit(code))
    }
}

#[derive(FromArgs)]
/// print the arguments separated by spaces, followed by a newline
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// omit the trailing newline
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// words to print
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, io: &mut StageIo<'_>, _env: &mut Environment) -> Result<Flow> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(io.stdout, "{}", s)?;
        } else {
            writeln!(io.stdout, "{}", s)?;
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// list the builtin commands
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, io: &mut StageIo<'_>, _env: &mut Environment) -> Result<Flow> {
        writeln!(io.stdout, "Builtins: {}", io.builtins.join(", "))?;
        writeln!(
            io.stdout,
            "Supports: pipes | and redirection > >>, tab completion, history (saved)."
        )?;
        Ok(Flow::Continue)
    }
}

/// Lines of `text` with their terminators, the last one newline-terminated.
pub(crate) fn lines_terminated(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_inclusive('\n').map(|line| {
        if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{}\n", line)
        }
    })
}

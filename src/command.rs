use crate::env::Environment;
use crate::signal;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// What a builtin asks the caller to do once it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Flow {
    /// Keep going with the next stage (and the next input line).
    Continue,
    /// Stop the pipeline and the read loop, exiting with this code.
    Exit(ExitCode),
}

/// The streams one command invocation works with.
///
/// `stdin` is the previous stage's text, absent for the first stage.
/// `stdout` and `stderr` are sinks owned by the caller, so everything a
/// command writes can be captured and threaded through a pipeline.
pub struct StageIo<'a> {
    pub stdin: Option<&'a str>,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    /// Names the running shell answers to as builtins.
    pub builtins: &'a [&'static str],
    interrupted: fn() -> bool,
}

impl<'a> StageIo<'a> {
    pub fn new(
        stdin: Option<&'a str>,
        stdout: &'a mut dyn Write,
        stderr: &'a mut dyn Write,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            builtins: &[],
            interrupted: signal::interrupted,
        }
    }

    pub fn with_builtins(mut self, builtins: &'a [&'static str]) -> Self {
        self.builtins = builtins;
        self
    }

    /// Replaces the Ctrl-C check long-running builtins poll.
    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    pub fn interrupted(&self) -> bool {
        (self.interrupted)()
    }

    /// Writes a `"<cmd>: <message>"` line to the error sink.
    ///
    /// A failure to write the diagnostic itself is ignored: there is nowhere
    /// left to report it.
    pub fn diagnostic(&mut self, cmd: &str, message: impl std::fmt::Display) {
        let _ = writeln!(self.stderr, "{}: {}", cmd, message);
    }
}

/// Object-safe capability implemented by every builtin command.
///
/// Handlers never touch the process streams directly; all output goes
/// through `io`. Recoverable failures are reported on `io.stderr` and end in
/// [`Flow::Continue`].
pub trait BuiltinHandler {
    /// Runs the command `name` (the name it was invoked under) with `args`.
    fn invoke(
        &self,
        name: &str,
        args: &[String],
        io: &mut StageIo<'_>,
        env: &mut Environment,
    ) -> Flow;
}

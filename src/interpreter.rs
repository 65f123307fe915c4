use crate::builtin::Registry;
use crate::command::{ExitCode, Flow, StageIo};
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::external::{self, ExternalCommand, SpawnError};
use crate::parser::{self, Pipeline, RedirectMode, Redirection, Stage};
use crate::signal;
use std::fs::OpenOptions;
use std::io::{self, Write};
use tracing::{debug, trace, warn};

/// Result of running a single stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Text for the next stage (empty if the stage was redirected or failed).
    Output(String),
    /// A builtin asked the shell to terminate.
    Exit(ExitCode),
    /// Ctrl-C arrived while the stage ran.
    Interrupted,
}

/// A minimal shell-like interpreter that can execute built-in and external commands.
///
/// The interpreter owns the [`Environment`] that persists between lines and a
/// [`Registry`] of builtins; every other piece of state lives only for the
/// duration of one pipeline.
///
/// Example
/// ```
/// use mysh::{Flow, Interpreter};
/// let mut sh = Interpreter::default();
/// let mut out = Vec::new();
/// let mut err = Vec::new();
/// let flow = sh.run_pipeline(mysh::parse("echo hello world | wc"), &mut out, &mut err);
/// assert_eq!(flow, Flow::Continue);
/// assert_eq!(String::from_utf8(out).unwrap(), "1 2 12\n");
/// ```
pub struct Interpreter {
    env: Environment,
    registry: Registry,
    builtin_names: Vec<&'static str>,
    config: ShellConfig,
    interrupted: fn() -> bool,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of builtins.
    pub fn new(registry: Registry, config: ShellConfig) -> Self {
        let mut env = Environment::new();
        env.history_file = config.history_file.clone();
        Self {
            env,
            builtin_names: registry.names(),
            registry,
            config,
            interrupted: signal::interrupted,
        }
    }

    /// Replaces the environment, e.g. to run rooted in another directory.
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Replaces the Ctrl-C check polled while stages run.
    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Parses and runs one input line against the process stdout/stderr.
    pub fn run_line(&mut self, line: &str) -> Flow {
        signal::clear_interrupt();
        let pipeline = parser::parse(line);
        let stdout = io::stdout();
        let stderr = io::stderr();
        let flow = self.run_pipeline(pipeline, &mut stdout.lock(), &mut stderr.lock());
        if let Err(e) = io::stdout().flush() {
            warn!(error = %e, "failed to flush stdout");
        }
        flow
    }

    /// Runs the stages left to right, each one's output becoming the next
    /// one's input, and writes whatever the last stage produced to `stdout`.
    ///
    /// An exit request stops everything at once and is returned; an
    /// interrupt drops the pending output and returns [`Flow::Continue`].
    pub fn run_pipeline(
        &mut self,
        pipeline: Pipeline,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Flow {
        let mut context: Option<String> = None;

        for stage in pipeline.stages {
            // Nothing to run: earlier output passes through untouched.
            if stage.argv.is_empty() {
                continue;
            }
            match self.execute_stage(&stage, context.as_deref(), stderr) {
                StageOutcome::Output(text) => context = Some(text),
                StageOutcome::Exit(code) => {
                    debug!(code, "exit requested");
                    return Flow::Exit(code);
                }
                StageOutcome::Interrupted => {
                    let _ = writeln!(stderr, "^C");
                    return Flow::Continue;
                }
            }
        }

        if let Some(text) = context.filter(|text| !text.is_empty()) {
            if let Err(e) = stdout.write_all(text.as_bytes()) {
                warn!(error = %e, "failed to write pipeline output");
            }
        }
        Flow::Continue
    }

    /// Runs one stage with the previous stage's text as `input`.
    ///
    /// Diagnostics go to `stderr` immediately; produced text is returned, or
    /// written to the redirection target (and then an empty string returned).
    pub fn execute_stage(
        &mut self,
        stage: &Stage,
        input: Option<&str>,
        stderr: &mut dyn Write,
    ) -> StageOutcome {
        let Some(name) = stage.name() else {
            return StageOutcome::Output(String::new());
        };
        trace!(%stage, has_input = input.is_some(), "executing stage");

        let text = match self.registry.lookup(name) {
            Some(handler) => {
                let mut captured = Vec::new();
                let flow = {
                    let mut io = StageIo::new(input, &mut captured, stderr)
                        .with_builtins(&self.builtin_names)
                        .with_interrupt_check(self.interrupted);
                    handler.invoke(name, stage.args(), &mut io, &mut self.env)
                };
                if let Flow::Exit(code) = flow {
                    return StageOutcome::Exit(code);
                }
                String::from_utf8_lossy(&captured).into_owned()
            }
            None => match self.run_external(name, stage.args(), input, stderr) {
                Ok(text) => text,
                Err(SpawnError::Interrupted) => return StageOutcome::Interrupted,
                Err(e @ (SpawnError::NotFound | SpawnError::Launch(_))) => {
                    debug!(command = name, error = %e, "cannot launch");
                    let _ = writeln!(stderr, "{}: command not found", name);
                    String::new()
                }
                Err(e) => {
                    debug!(command = name, error = %e, "external command failed");
                    let _ = writeln!(stderr, "{}: {}", name, e);
                    String::new()
                }
            },
        };

        if (self.interrupted)() {
            return StageOutcome::Interrupted;
        }

        match &stage.redirection {
            Some(redirection) => {
                self.write_redirection(name, redirection, &text, stderr);
                StageOutcome::Output(String::new())
            }
            None => StageOutcome::Output(text),
        }
    }

    fn run_external(
        &self,
        name: &str,
        args: &[String],
        input: Option<&str>,
        stderr: &mut dyn Write,
    ) -> Result<String, SpawnError> {
        let cmd = ExternalCommand::resolve(&self.env, name, args)?;
        let captured = cmd.run(
            input,
            &self.env,
            self.config.external_timeout,
            &self.interrupted,
        )?;

        let child_errors = captured.stderr.trim_end();
        if !child_errors.is_empty() {
            let _ = writeln!(stderr, "{}", child_errors);
        } else if !captured.status.success() {
            let _ = writeln!(
                stderr,
                "{}: exited with status {}",
                name,
                external::exit_code(captured.status)
            );
        }
        Ok(captured.stdout)
    }

    fn write_redirection(
        &self,
        name: &str,
        redirection: &Redirection,
        text: &str,
        stderr: &mut dyn Write,
    ) {
        let path = self.env.resolve_path(&redirection.path);
        let mut options = OpenOptions::new();
        match redirection.mode {
            RedirectMode::Truncate => options.write(true).create(true).truncate(true),
            RedirectMode::Append => options.append(true).create(true),
        };

        let result = options
            .open(&path)
            .and_then(|mut file| file.write_all(text.as_bytes()));
        match result {
            Ok(()) => debug!(path = %path.display(), bytes = text.len(), "redirected output"),
            Err(e) => {
                let _ = writeln!(stderr, "{}: {}: {}", name, redirection.path, e);
            }
        }
    }
}

impl Default for Interpreter {
    /// Standard builtins and default settings.
    fn default() -> Self {
        Self::new(Registry::default(), ShellConfig::default())
    }
}

use anyhow::{Context, Result};
use argh::FromArgs;
use mysh::builtin::Registry;
use mysh::{Environment, Flow, Interpreter, ShellConfig, repl, signal};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// mysh: a small shell with builtins, pipes and redirection.
struct Args {
    #[argh(option, short = 'c')]
    /// run this line and exit instead of reading input
    command: Option<String>,

    #[argh(option)]
    /// seconds an external program may run before it is killed (default 30)
    timeout: Option<f64>,

    #[argh(option)]
    /// history file (default ~/.mysh_history)
    history: Option<PathBuf>,

    #[argh(switch)]
    /// do not load or save history
    no_history: bool,
}

fn main() {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("mysh: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    signal::install_handler().context("failed to install SIGINT handler")?;

    let env = Environment::new();
    let mut config = ShellConfig::from_env(&env);
    if let Some(secs) = args.timeout {
        config.external_timeout = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid timeout: {}", secs))?;
    }
    if let Some(path) = args.history {
        config.history_file = Some(env.resolve(&path));
    }
    if args.no_history {
        config.history_file = None;
    }
    tracing::debug!(?config, "starting");

    let mut env = env;
    env.history_file = config.history_file.clone();
    let mut interp = Interpreter::new(Registry::default(), config).with_env(env);

    match args.command {
        Some(line) => Ok(match interp.run_line(&line) {
            Flow::Exit(code) => code,
            Flow::Continue => 0,
        }),
        None => repl::run(&mut interp),
    }
}

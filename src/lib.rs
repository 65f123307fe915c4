//! mysh: a small interactive shell.
//!
//! A line is split on `|` into stages, each stage optionally ending in a
//! `>`/`>>` redirection. Stages run left to right; the text one stage
//! produces becomes the next stage's input and the last stage's text is
//! printed. Commands are either builtins implemented in Rust (see
//! [`builtin`]) or external programs found on `PATH`.
//!
//! The main entry point is [`Interpreter`]; [`repl`] wraps it in a line
//! editor for interactive use.

pub mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod external;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod signal;

pub use command::{ExitCode, Flow};
pub use config::ShellConfig;
pub use env::Environment;
/// Just a convenient re-export of the command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
pub use parser::{Pipeline, parse};

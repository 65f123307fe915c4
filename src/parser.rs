use crate::lexer::{quote, split_words};
use std::fmt;
use tracing::trace;

/// How a redirected stage opens its target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>`: create the file or truncate it.
    Truncate,
    /// `>>`: create the file or append to it.
    Append,
}

impl RedirectMode {
    fn operator(self) -> &'static str {
        match self {
            RedirectMode::Truncate => ">",
            RedirectMode::Append => ">>",
        }
    }
}

/// Output redirection attached to a stage.
///
/// The path is kept exactly as typed; it is resolved against the working
/// directory only when the stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub path: String,
    pub mode: RedirectMode,
}

/// One command of a pipeline: `argv[0]` is the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub redirection: Option<Redirection>,
}

impl Stage {
    pub fn name(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }
}

/// Stages in execution order, left to right as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<String> = self.argv.iter().map(|w| quote(w)).collect();
        f.write_str(&words.join(" "))?;
        match &self.redirection {
            Some(redirection) => {
                if !self.argv.is_empty() {
                    f.write_str(" ")?;
                }
                write!(f, "{} {}", redirection.mode.operator(), redirection.path)
            }
            // A lone operator keeps the segment from reading as blank.
            None if self.argv.is_empty() => f.write_str(RedirectMode::Truncate.operator()),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Splits off a trailing `>>` or `>` redirection from one pipe segment.
///
/// `>>` is looked for first so it is never read as two `>`. Only the first
/// whitespace-delimited word after the operator becomes the target, anything
/// after it is dropped. An operator with nothing after it is removed but
/// yields no redirection.
fn split_redirection(segment: &str) -> (&str, Option<Redirection>) {
    let found = segment
        .split_once(">>")
        .map(|(cmd, rest)| (cmd, rest, RedirectMode::Append))
        .or_else(|| {
            segment
                .split_once('>')
                .map(|(cmd, rest)| (cmd, rest, RedirectMode::Truncate))
        });

    match found {
        Some((command, rest, mode)) => {
            let redirection = rest.split_whitespace().next().map(|path| Redirection {
                path: path.to_string(),
                mode,
            });
            (command, redirection)
        }
        None => (segment, None),
    }
}

/// Parses one input line into a [`Pipeline`].
///
/// The line is cut on `|` before any quote handling, so a quoted `|` (or `>`)
/// still acts as an operator. Blank segments are dropped. Parsing never fails:
/// odd input simply produces odd (possibly empty) argument vectors.
pub fn parse(line: &str) -> Pipeline {
    let stages: Vec<Stage> = line
        .split('|')
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| {
            let (command, redirection) = split_redirection(segment);
            Stage {
                argv: split_words(command),
                redirection,
            }
        })
        .collect();
    trace!(?stages, "parsed line");
    Pipeline { stages }
}

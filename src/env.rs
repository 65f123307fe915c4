use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};

/// Shell state that outlives a single input line.
///
/// Spawned programs get `vars` as their environment and `current_dir` as
/// their working directory; builtins resolve relative paths against it.
#[derive(Debug, Clone)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    /// History file read by the `history` builtin.
    pub history_file: Option<PathBuf>,
}

impl Environment {
    /// Snapshot of the running process: its variables and working directory.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_dir(current_dir)
    }

    /// Same as [`Environment::new`] but rooted at `dir` instead of the process cwd.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: stdenv::vars().collect(),
            current_dir: dir.into(),
            history_file: None,
        }
    }

    /// Shell variable `key`, else the process variable of that name.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Home directory taken from `HOME` (or `USERPROFILE` on Windows).
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get_var("HOME")
            .or_else(|| self.get_var("USERPROFILE"))
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }

    /// Turn a user supplied path into one usable by the process.
    ///
    /// A leading `~` expands to the home directory; relative paths are joined
    /// onto `current_dir`.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = match (raw.strip_prefix('~'), self.home_dir()) {
            (Some(""), Some(home)) => home,
            (Some(rest), Some(home)) if rest.starts_with('/') || rest.starts_with('\\') => {
                home.join(&rest[1..])
            }
            _ => PathBuf::from(raw),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.current_dir.join(expanded)
        }
    }

    /// Like [`Environment::resolve_path`] for paths already split into a `Path`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.resolve_path(&path.to_string_lossy())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

use crate::env::Environment;
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on how long one external program may run.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// File name of the history file inside the home directory.
pub const HISTORY_FILE_NAME: &str = ".mysh_history";

/// Settings fixed at startup.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// External programs still running after this long are killed.
    pub external_timeout: Duration,
    /// Where input lines are persisted; `None` disables history.
    pub history_file: Option<PathBuf>,
}

impl ShellConfig {
    /// Defaults derived from the environment: history lives in `$HOME`.
    pub fn from_env(env: &Environment) -> Self {
        Self {
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            history_file: env.home_dir().map(|home| home.join(HISTORY_FILE_NAME)),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            history_file: None,
        }
    }
}

use crate::env::Environment;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How often a running child is checked for exit, timeout and Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why an external program produced no result.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("command not found")]
    NotFound,
    #[error("failed to launch: {0}")]
    Launch(#[source] io::Error),
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Everything a finished child wrote, decoded lossily.
#[derive(Debug)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

/// A program on disk plus the arguments to launch it with.
pub struct ExternalCommand {
    path: PathBuf,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(path: PathBuf, args: Vec<String>) -> Self {
        Self { path, args }
    }

    /// Looks `name` up the way a shell would, using the environment's PATH
    /// and working directory.
    pub fn resolve(env: &Environment, name: &str, args: &[String]) -> Result<Self, SpawnError> {
        let search_paths = env.get_var("PATH").unwrap_or_default();
        let path = find_command_path(OsStr::new(&search_paths), &env.current_dir, Path::new(name))
            .ok_or(SpawnError::NotFound)?;
        Ok(Self::new(path.into_owned(), args.to_vec()))
    }

    /// Runs the program to completion, feeding `input` on its stdin and
    /// collecting stdout and stderr in memory.
    ///
    /// `timeout` bounds the whole run, including draining pipes that a
    /// backgrounded grandchild may still hold open. On timeout or when
    /// `interrupted` returns true the child's process group is killed.
    /// Pipes are serviced from helper threads so a chatty child can not
    /// block on a full pipe while we wait for it.
    pub fn run(
        &self,
        input: Option<&str>,
        env: &Environment,
        timeout: Duration,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<Captured, SpawnError> {
        let mut command = Command::new(&self.path);
        command
            .args(&self.args)
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&env.current_dir)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a timeout can take down everything the child started.
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound,
            _ => SpawnError::Launch(e),
        })?;
        debug!(program = %self.path.display(), pid = child.id(), "spawned");

        if let (Some(mut pipe), Some(text)) = (child.stdin.take(), input) {
            let data = text.to_owned();
            // Never joined: the child may exit without reading, or leave the
            // pipe to a grandchild that never reads either.
            thread::spawn(move || {
                let _ = pipe.write_all(data.as_bytes());
            });
        }
        let (tx, rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            drain(pipe, Stream::Stdout, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            drain(pipe, Stream::Stderr, tx);
        }

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if interrupted() {
                kill_and_reap(&mut child);
                return Err(SpawnError::Interrupted);
            }
            if Instant::now() >= deadline {
                kill_and_reap(&mut child);
                return Err(SpawnError::Timeout(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((Stream::Stdout, bytes)) => stdout = bytes,
                Ok((Stream::Stderr, bytes)) => stderr = bytes,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if interrupted() {
                        kill_group(&child);
                        return Err(SpawnError::Interrupted);
                    }
                    if Instant::now() >= deadline {
                        warn!(pid = child.id(), "output still held open after exit");
                        kill_group(&child);
                        return Err(SpawnError::Timeout(timeout));
                    }
                }
            }
        }
        debug!(program = %self.path.display(), ?status, bytes = stdout.len(), "exited");

        Ok(Captured {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status,
        })
    }
}

enum Stream {
    Stdout,
    Stderr,
}

/// Reads `pipe` to its end on a helper thread and sends the bytes back.
/// The thread is abandoned, not joined, if the deadline passes first.
fn drain<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => {}
        // ESRCH: the whole group already exited.
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn kill_and_reap(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "kill after group kill");
    }
    let _ = child.wait();
}

/// Exit code of a finished child, using the shell convention 128+N for signals.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.signal(), status.core_dumped()) {
        (Some(signal), _) => 128 + signal,
        (None, true) => 255,
        (None, false) => -1,
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_status: ExitStatus) -> i32 {
    -1
}

/// Where a command name points, following the usual shell rules:
///
/// - `/abs/prog` is used as is;
/// - `dir/prog` (more than one component) is looked up under `cwd`;
/// - a bare `prog` is searched in each entry of `search_paths` in order.
///   On Unix `./prog` is tried under `cwd` first; elsewhere every name is.
///
/// Only regular files qualify. The input is borrowed back when it already
/// names the program.
pub fn find_command_path<'a>(
    search_paths: &OsStr,
    cwd: &Path,
    path: &'a Path,
) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return is_program(path).then_some(Cow::Borrowed(path));
    }

    let try_cwd_first = cfg!(not(unix)) || path.starts_with("./");
    if try_cwd_first {
        let candidate = cwd.join(path);
        if is_program(&candidate) {
            return Some(Cow::Owned(candidate));
        }
    }

    let mut parts = path.components();
    match (parts.next(), parts.next()) {
        (None, _) => None,
        (Some(name), None) => std::env::split_paths(search_paths)
            .map(|dir| dir.join(name))
            .find(|candidate| is_program(candidate))
            .map(Cow::Owned),
        (Some(_), Some(_)) => {
            let candidate = cwd.join(path);
            is_program(&candidate).then_some(Cow::Owned(candidate))
        }
    }
}

fn is_program(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};

    fn never() -> bool {
        false
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    #[cfg(unix)]
    fn absolute_program_is_borrowed_back() {
        let path = Path::new("/bin/sh");
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), path);
        let found = res.unwrap();
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    #[cfg(unix)]
    fn missing_absolute_program() {
        let path = Path::new("/bin/mysh-nonexistent");
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), path);
        assert!(res.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn bare_name_searches_path_in_order() {
        let res = find_command_path(OsStr::new("/nowhere:/bin"), Path::new("/"), Path::new("sh"));
        let found = res.unwrap();
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    #[cfg(unix)]
    fn bare_name_missing_from_path() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), Path::new("mysh-nonexistent"));
        assert!(res.is_none());
    }

    #[test]
    #[cfg(unix)]
    fn directories_are_not_commands() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("tool")).unwrap();
        let search = tmp.path().as_os_str();
        assert!(find_command_path(search, Path::new("/"), Path::new("tool")).is_none());
    }

    #[test]
    #[cfg(unix)]
    fn nested_relative_name_looks_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("bin")).unwrap();
        File::create(tmp.path().join("bin").join("sh")).unwrap();

        let res = find_command_path(OsStr::new("/does/not/matter"), tmp.path(), Path::new("bin/sh"));
        let found = res.unwrap();
        assert_eq!(found.as_ref(), tmp.path().join("bin/sh"));
    }

    #[test]
    #[cfg(unix)]
    fn dot_slash_looks_in_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        File::create(tmp.path().join("foo")).unwrap();

        let res = find_command_path(OsStr::new("/bin"), tmp.path(), Path::new("./foo"));
        let found = res.unwrap();
        assert_eq!(found.as_ref(), tmp.path().join("./foo"));
    }

    #[test]
    fn empty_name_resolves_to_nothing() {
        let res = find_command_path(OsStr::new("/bin"), Path::new("/"), Path::new(""));
        assert!(res.is_none());
    }

    #[test]
    fn resolve_unknown_name_is_not_found() {
        let env = Environment::with_dir(std::env::temp_dir());
        let res = ExternalCommand::resolve(&env, "definitely-not-a-command-xyz", &[]);
        assert!(matches!(res, Err(SpawnError::NotFound)));
    }

    #[test]
    #[cfg(unix)]
    fn run_captures_stdout_and_feeds_stdin() {
        let env = Environment::with_dir(std::env::temp_dir());
        let cmd = ExternalCommand::resolve(&env, "cat", &[]).unwrap();
        let out = cmd
            .run(Some("piped text\n"), &env, Duration::from_secs(10), &never)
            .unwrap();
        assert_eq!(out.stdout, "piped text\n");
        assert!(out.status.success());
    }

    #[test]
    #[cfg(unix)]
    fn run_without_input_sees_empty_stdin() {
        let env = Environment::with_dir(std::env::temp_dir());
        let cmd = ExternalCommand::resolve(&env, "cat", &[]).unwrap();
        let out = cmd.run(None, &env, Duration::from_secs(10), &never).unwrap();
        assert_eq!(out.stdout, "");
    }

    #[test]
    #[cfg(unix)]
    fn run_reports_stderr_and_exit_code() {
        let env = Environment::with_dir(std::env::temp_dir());
        let args = strings(&["-c", "echo oops >&2; exit 3"]);
        let cmd = ExternalCommand::resolve(&env, "sh", &args).unwrap();
        let out = cmd.run(None, &env, Duration::from_secs(10), &never).unwrap();
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(exit_code(out.status), 3);
    }

    #[test]
    #[cfg(unix)]
    fn run_handles_output_larger_than_a_pipe_buffer() {
        let env = Environment::with_dir(std::env::temp_dir());
        let cmd = ExternalCommand::resolve(&env, "seq", &strings(&["1", "100000"])).unwrap();
        let out = cmd.run(None, &env, Duration::from_secs(30), &never).unwrap();
        assert_eq!(out.stdout.lines().count(), 100000);
        assert!(out.stdout.ends_with("100000\n"));
    }

    #[test]
    #[cfg(unix)]
    fn run_kills_child_on_timeout() {
        let env = Environment::with_dir(std::env::temp_dir());
        let cmd = ExternalCommand::resolve(&env, "sleep", &strings(&["5"])).unwrap();
        let started = Instant::now();
        let res = cmd.run(None, &env, Duration::from_millis(200), &never);
        assert!(matches!(res, Err(SpawnError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    #[cfg(unix)]
    fn run_does_not_wait_for_background_grandchild() {
        let env = Environment::with_dir(std::env::temp_dir());
        let args = strings(&["-c", "sleep 4 &"]);
        let cmd = ExternalCommand::resolve(&env, "sh", &args).unwrap();
        let started = Instant::now();
        let res = cmd.run(None, &env, Duration::from_millis(500), &never);
        assert!(matches!(res, Err(SpawnError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    #[cfg(unix)]
    fn run_kills_grandchildren_on_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::with_dir(tmp.path());
        let args = strings(&["-c", "(sleep 1; touch late.txt) & wait"]);
        let cmd = ExternalCommand::resolve(&env, "sh", &args).unwrap();
        let res = cmd.run(None, &env, Duration::from_millis(200), &never);
        assert!(matches!(res, Err(SpawnError::Timeout(_))));
        thread::sleep(Duration::from_millis(1500));
        assert!(!tmp.path().join("late.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn run_stops_when_interrupted() {
        let env = Environment::with_dir(std::env::temp_dir());
        let cmd = ExternalCommand::resolve(&env, "sleep", &strings(&["5"])).unwrap();
        let started = Instant::now();
        let res = cmd.run(None, &env, Duration::from_secs(30), &|| true);
        assert!(matches!(res, Err(SpawnError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    #[cfg(unix)]
    fn run_uses_environment_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::with_dir(fs::canonicalize(tmp.path()).unwrap());
        let cmd = ExternalCommand::resolve(&env, "pwd", &[]).unwrap();
        let out = cmd.run(None, &env, Duration::from_secs(10), &never).unwrap();
        assert_eq!(out.stdout.trim_end(), env.current_dir.to_string_lossy());
    }
}

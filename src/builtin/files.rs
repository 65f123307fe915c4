use super::BuiltinCommand;
use crate::command::{Flow, StageIo};
use crate::env::Environment;
use anyhow::{Context, Result, bail};
use argh::FromArgs;
use glob::Pattern;
use std::cmp::Ordering;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

#[derive(FromArgs)]
/// list directory contents, sorted, with a trailing '/' on directories
pub struct Ls {
    #[argh(positional)]
    /// directory to list (defaults to the current directory)
    pub path: Option<String>,
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let raw = self.path.unwrap_or_else(|| ".".to_string());
        let dir = env.resolve_path(&raw);

        if dir.is_file() {
            writeln!(io.stdout, "{}", raw)?;
            return Ok(Flow::Continue);
        }

        let mut entries: Vec<(String, bool)> = fs::read_dir(&dir)
            .with_context(|| raw.clone())?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let is_dir = entry.path().is_dir();
                (entry.file_name().to_string_lossy().into_owned(), is_dir)
            })
            .collect();
        entries.sort();

        for (name, is_dir) in entries {
            if is_dir {
                writeln!(io.stdout, "{}/", name)?;
            } else {
                writeln!(io.stdout, "{}", name)?;
            }
        }
        Ok(Flow::Continue)
    }
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// `dst` itself, or `dst/<name of src>` when `dst` is an existing directory.
fn target_path(src: &Path, dst: &Path) -> PathBuf {
    match (dst.is_dir(), src.file_name()) {
        (true, Some(name)) => dst.join(name),
        _ => dst.to_path_buf(),
    }
}

#[derive(FromArgs)]
/// copy files; several sources are copied into a directory
pub struct Cp {
    #[argh(switch, short = 'r')]
    /// copy directories recursively
    pub recursive: bool,

    #[argh(positional, greedy)]
    /// source paths followed by the destination
    pub paths: Vec<String>,
}

impl BuiltinCommand for Cp {
    fn name() -> &'static str {
        "cp"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let Some((dst_raw, sources)) = self.paths.split_last() else {
            bail!("missing arguments");
        };
        if sources.is_empty() {
            bail!("missing destination file operand after '{}'", dst_raw);
        }

        let dst = env.resolve_path(dst_raw);
        if sources.len() > 1 && !dst.is_dir() {
            bail!("target '{}' is not a directory", dst_raw);
        }

        for src_raw in sources {
            let src = env.resolve_path(src_raw);
            let target = target_path(&src, &dst);
            let result = if src.is_dir() {
                if !self.recursive {
                    io.diagnostic("cp", format!("{}: is a directory (use -r)", src_raw));
                    continue;
                }
                copy_dir_all(&src, &target)
            } else {
                fs::copy(&src, &target).map(|_| ())
            };
            if let Err(e) = result {
                io.diagnostic("cp", format!("{}: {}", src_raw, e));
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// move or rename a file or directory
pub struct Mv {
    #[argh(positional)]
    /// path to move
    pub source: String,

    #[argh(positional)]
    /// new path, or an existing directory to move into
    pub dest: String,
}

impl BuiltinCommand for Mv {
    fn name() -> &'static str {
        "mv"
    }

    fn execute(self, _io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let src = env.resolve_path(&self.source);
        let target = target_path(&src, &env.resolve_path(&self.dest));
        move_path(&src, &target, |from, to| fs::rename(from, to))
            .with_context(|| format!("cannot move '{}' to '{}'", self.source, self.dest))?;
        Ok(Flow::Continue)
    }
}

/// Renames `src` to `dst`, copying and then deleting when they sit on
/// different filesystems.
fn move_path(
    src: &Path,
    dst: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    match rename(src, dst) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(src = %src.display(), dst = %dst.display(), "rename crosses devices, copying");
            if fs::symlink_metadata(src)?.is_dir() {
                copy_dir_all(src, dst)?;
                fs::remove_dir_all(src)
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)
            }
        }
        other => other,
    }
}

#[derive(FromArgs)]
/// remove files; directories are removed with their contents
pub struct Rm {
    #[argh(positional, greedy)]
    /// paths to remove
    pub paths: Vec<String>,
}

impl BuiltinCommand for Rm {
    fn name() -> &'static str {
        "rm"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.paths.is_empty() {
            bail!("missing operand");
        }
        for raw in &self.paths {
            let path = env.resolve_path(raw);
            let result = match fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
                Ok(_) => fs::remove_file(&path),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                io.diagnostic("rm", format!("{}: {}", raw, e));
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// create directories, including missing parents
pub struct Mkdir {
    #[argh(positional, greedy)]
    /// directories to create
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.dirs.is_empty() {
            bail!("missing operand");
        }
        for raw in &self.dirs {
            if let Err(e) = fs::create_dir_all(env.resolve_path(raw)) {
                io.diagnostic("mkdir", format!("{}: {}", raw, e));
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// remove empty directories
pub struct Rmdir {
    #[argh(positional, greedy)]
    /// directories to remove
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Rmdir {
    fn name() -> &'static str {
        "rmdir"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.dirs.is_empty() {
            bail!("missing operand");
        }
        for raw in &self.dirs {
            if let Err(e) = fs::remove_dir(env.resolve_path(raw)) {
                io.diagnostic("rmdir", format!("{}: {}", raw, e));
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// create empty files or update their modification time
pub struct Touch {
    #[argh(positional, greedy)]
    /// files to touch
    pub files: Vec<String>,
}

fn touch(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    file.set_modified(SystemTime::now())
}

impl BuiltinCommand for Touch {
    fn name() -> &'static str {
        "touch"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.files.is_empty() {
            bail!("missing file operand");
        }
        for raw in &self.files {
            if let Err(e) = touch(&env.resolve_path(raw)) {
                io.diagnostic("touch", format!("{}: {}", raw, e));
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// walk a directory tree and print paths whose name matches a glob pattern
pub struct Find {
    #[argh(positional, greedy)]
    /// start directory (default '.') and shell pattern for names (default '*')
    pub args: Vec<String>,
}

/// Directory entries sorted by name, files ahead of subdirectories.
fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// `path` (under `root`) re-expressed relative to `start` as the user typed it.
fn shown(start: &str, root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from(start),
        Ok(rel) => Path::new(start).join(rel),
        Err(_) => path.to_path_buf(),
    }
}

impl BuiltinCommand for Find {
    fn name() -> &'static str {
        "find"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let start = self.args.first().map_or(".", String::as_str);
        let raw_pattern = self.args.get(1).map_or("*", String::as_str);
        let pattern = Pattern::new(raw_pattern)
            .with_context(|| format!("invalid pattern: {}", raw_pattern))?;

        let root = env.resolve_path(start);
        let walker = WalkDir::new(&root).min_depth(1).sort_by(files_first);
        for entry in walker {
            if io.interrupted() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let shown = e.path().map_or_else(|| PathBuf::from(start), |p| shown(start, &root, p));
                    let reason = e
                        .io_error()
                        .map_or_else(|| e.to_string(), ToString::to_string);
                    io.diagnostic("find", format!("{}: {}", shown.display(), reason));
                    continue;
                }
            };
            if !pattern.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }
            writeln!(io.stdout, "{}", shown(start, &root, entry.path()).display())?;
        }
        Ok(Flow::Continue)
    }
}

use super::{BuiltinCommand, lines_terminated};
use crate::command::{Flow, StageIo};
use crate::env::Environment;
use anyhow::{Context, Result};
use argh::FromArgs;
use regex::{Regex, RegexBuilder};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Reads a file as text, replacing invalid UTF-8 instead of failing.
pub(crate) fn read_text(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Accepts `-N` and `-nN` as spellings of `-n N`.
fn normalize_count_flag(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    if let Some(first) = args.first() {
        let digits = first
            .strip_prefix("-n")
            .or_else(|| first.strip_prefix('-'))
            .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()));
        if let Some(digits) = digits {
            out.splice(0..1, ["-n".to_string(), digits.to_string()]);
        }
    }
    out
}

#[derive(FromArgs)]
/// print file(s) to stdout, or the piped input when no file is given
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to concatenate
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.files.is_empty() {
            if let Some(input) = io.stdin {
                io.stdout.write_all(input.as_bytes())?;
            }
            return Ok(Flow::Continue);
        }
        for fname in &self.files {
            match fs::read(env.resolve_path(fname)) {
                Ok(bytes) => io.stdout.write_all(&bytes)?,
                Err(e) => io.diagnostic("cat", format!("{}: {}", fname, e)),
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// print the first lines of files or of the piped input
pub struct Head {
    #[argh(option, short = 'n', default = "10")]
    /// number of lines to print (default 10)
    pub lines: usize,

    #[argh(positional, greedy)]
    /// files to read; the piped input is used when none are given
    pub files: Vec<String>,
}

impl BuiltinCommand for Head {
    fn name() -> &'static str {
        "head"
    }

    fn normalize_args(args: &[String]) -> Vec<String> {
        normalize_count_flag(args)
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let pick = |text: &str| -> String { lines_terminated(text).take(self.lines).collect() };
        for_each_source(&self.files, "head", io, env, pick)?;
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// print the last lines of files or of the piped input
pub struct Tail {
    #[argh(option, short = 'n', default = "10")]
    /// number of lines to print (default 10)
    pub lines: usize,

    #[argh(positional, greedy)]
    /// files to read; the piped input is used when none are given
    pub files: Vec<String>,
}

impl BuiltinCommand for Tail {
    fn name() -> &'static str {
        "tail"
    }

    fn normalize_args(args: &[String]) -> Vec<String> {
        normalize_count_flag(args)
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let pick = |text: &str| -> String {
            let all: Vec<String> = lines_terminated(text).collect();
            let skip = all.len().saturating_sub(self.lines);
            all[skip..].concat()
        };
        for_each_source(&self.files, "tail", io, env, pick)?;
        Ok(Flow::Continue)
    }
}

/// Applies `transform` to the piped input (no files) or to every file in turn.
fn for_each_source(
    files: &[String],
    cmd: &str,
    io: &mut StageIo<'_>,
    env: &Environment,
    transform: impl Fn(&str) -> String,
) -> Result<()> {
    if files.is_empty() {
        if let Some(input) = io.stdin {
            io.stdout.write_all(transform(input).as_bytes())?;
        }
        return Ok(());
    }
    for fname in files {
        match read_text(&env.resolve_path(fname)) {
            Ok(text) => io.stdout.write_all(transform(&text).as_bytes())?,
            Err(e) => io.diagnostic(cmd, format!("{}: {}", fname, e)),
        }
    }
    Ok(())
}

#[derive(FromArgs)]
/// print lines containing a pattern
pub struct Grep {
    #[argh(positional)]
    /// the text to search for (a regular expression with -E)
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, searches the piped input.
    pub files: Vec<String>,

    #[argh(switch, short = 'E')]
    /// treat the pattern as a regular expression instead of plain text
    pub extended_regexp: bool,

    #[argh(switch, short = 'w')]
    /// match only whole words (using non-word characters as boundaries)
    pub word_regexp: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(option, short = 'A', default = "0")]
    /// print NUM lines of trailing context after matching lines
    pub after_context: usize,
}

impl Grep {
    fn build_regex(&self) -> Result<Regex> {
        let user_pattern = if self.extended_regexp {
            self.pattern.clone()
        } else {
            regex::escape(&self.pattern)
        };

        let pattern = if self.word_regexp {
            format!(r"\b({})\b", user_pattern)
        } else {
            user_pattern
        };

        RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .with_context(|| format!("invalid pattern: {}", self.pattern))
    }

    fn process_text(
        &self,
        text: &str,
        stdout: &mut dyn Write,
        file_name: Option<&str>,
        re: &Regex,
    ) -> Result<()> {
        let lines: Vec<String> = lines_terminated(text).collect();
        let total_lines = lines.len();
        let mut to_print = vec![false; total_lines];

        for (match_line, line) in lines.iter().enumerate() {
            if re.is_match(line.trim_end_matches('\n')) {
                let end_print = (match_line + self.after_context + 1).min(total_lines);
                for flag in &mut to_print[match_line..end_print] {
                    *flag = true;
                }
            }
        }

        let prefix = file_name
            .map(|name| format!("{}:", name))
            .unwrap_or_default();
        let mut last_printed_index: Option<usize> = None;

        for (i, line) in lines.iter().enumerate() {
            if !to_print[i] {
                continue;
            }
            if let Some(last) = last_printed_index {
                if self.after_context > 0 && i > last + 1 {
                    stdout.write_all(b"--\n")?;
                }
            }
            write!(stdout, "{}{}", prefix, line)?;
            last_printed_index = Some(i);
        }

        Ok(())
    }
}

impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        let re = self.build_regex()?;

        if self.files.is_empty() {
            if let Some(input) = io.stdin {
                self.process_text(input, &mut *io.stdout, None, &re)?;
            }
            return Ok(Flow::Continue);
        }

        for file_name in &self.files {
            match read_text(&env.resolve_path(file_name)) {
                Ok(text) => self.process_text(&text, &mut *io.stdout, Some(file_name), &re)?,
                Err(e) => io.diagnostic("grep", format!("{}: {}", file_name, e)),
            }
        }
        Ok(Flow::Continue)
    }
}

#[derive(FromArgs)]
/// count lines, words and bytes
pub struct WC {
    #[argh(positional, greedy)]
    /// files to count; the piped input is counted when none are given
    pub files: Vec<String>,
}

fn counts(text: &str) -> (usize, usize, usize) {
    (text.lines().count(), text.split_whitespace().count(), text.len())
}

impl BuiltinCommand for WC {
    fn name() -> &'static str {
        "wc"
    }

    fn execute(self, io: &mut StageIo<'_>, env: &mut Environment) -> Result<Flow> {
        if self.files.is_empty() {
            let (lines, words, bytes) = counts(io.stdin.unwrap_or_default());
            writeln!(io.stdout, "{} {} {}", lines, words, bytes)?;
            return Ok(Flow::Continue);
        }
        for fname in &self.files {
            match read_text(&env.resolve_path(fname)) {
                Ok(s) => {
                    let (lines, words, bytes) = counts(&s);
                    writeln!(io.stdout, "{} {} {} {}", lines, words, bytes, fname)?;
                }
                Err(e) => io.diagnostic("wc", format!("{}: {}", fname, e)),
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{invoke, run};
    use tempfile::TempDir;

    /// Scratch directory with one `test_data.txt` file in it.
    fn setup_test_environment(content: &str) -> (TempDir, Environment) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("test_data.txt"), content).expect("write");
        let env = Environment::with_dir(dir.path());
        (dir, env)
    }

    fn grep(pattern: &str, files: &[&str]) -> Grep {
        Grep {
            pattern: pattern.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            extended_regexp: false,
            word_regexp: false,
            ignore_case: false,
            after_context: 0,
        }
    }

    #[test]
    fn test_cat_reads_file() {
        let (_dir, mut env) = setup_test_environment("hello\nworld\n");
        let cat = Cat {
            files: vec!["test_data.txt".to_string()],
        };
        assert_eq!(run(cat, None, &mut env).out, "hello\nworld\n");
    }

    #[test]
    fn test_cat_echoes_piped_input_when_no_args() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let ran = run(Cat { files: Vec::new() }, Some("from stdin\nline2\n"), &mut env);
        assert_eq!(ran.out, "from stdin\nline2\n");

        let ran = run(Cat { files: Vec::new() }, None, &mut env);
        assert_eq!(ran.out, "");
    }

    #[test]
    fn test_cat_missing_file_reports_and_keeps_going() {
        let (_dir, mut env) = setup_test_environment("data\n");
        let cat = Cat {
            files: vec!["missing.txt".to_string(), "test_data.txt".to_string()],
        };
        let ran = run(cat, None, &mut env);
        assert_eq!(ran.out, "data\n");
        assert!(ran.err.starts_with("cat: missing.txt: "));
    }

    #[test]
    fn test_head_and_tail_on_piped_input() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let input = "1\n2\n3\n4\n5";

        let ran = invoke(&["head", "-n", "2"], Some(input), &mut env);
        assert_eq!(ran.out, "1\n2\n");

        let ran = invoke(&["tail", "-2"], Some(input), &mut env);
        assert_eq!(ran.out, "4\n5\n");

        let ran = invoke(&["head", "-n3"], Some(input), &mut env);
        assert_eq!(ran.out, "1\n2\n3\n");

        let ran = invoke(&["tail", "-n", "10"], Some(input), &mut env);
        assert_eq!(ran.out, "1\n2\n3\n4\n5\n");
    }

    #[test]
    fn test_head_defaults_to_ten_lines_of_file() {
        let content: String = (1..=15).map(|i| format!("line {}\n", i)).collect();
        let (_dir, mut env) = setup_test_environment(&content);
        let ran = invoke(&["head", "test_data.txt"], None, &mut env);
        assert_eq!(ran.out.lines().count(), 10);
        assert!(ran.out.ends_with("line 10\n"));
    }

    #[test]
    fn test_normalize_count_flag() {
        let to_vec = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(normalize_count_flag(&to_vec(&["-5", "f"])), to_vec(&["-n", "5", "f"]));
        assert_eq!(normalize_count_flag(&to_vec(&["-n7"])), to_vec(&["-n", "7"]));
        assert_eq!(normalize_count_flag(&to_vec(&["-n", "7"])), to_vec(&["-n", "7"]));
        assert_eq!(normalize_count_flag(&to_vec(&["-x"])), to_vec(&["-x"]));
    }

    #[test]
    fn test_wc_counts_file() {
        let (_dir, mut env) = setup_test_environment("one two\nthree\n");
        let wc = WC {
            files: vec!["test_data.txt".to_string()],
        };
        assert_eq!(run(wc, None, &mut env).out, "2 3 14 test_data.txt\n");
    }

    #[test]
    fn test_wc_counts_piped_input() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let ran = run(WC { files: Vec::new() }, Some("a b c\n"), &mut env);
        assert_eq!(ran.out, "1 3 6\n");
    }

    #[test]
    fn test_grep_is_plain_substring_by_default() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let ran = run(grep("a.c", &[]), Some("abc\na.c here\n"), &mut env);
        assert_eq!(ran.out, "a.c here\n");
    }

    #[test]
    fn test_grep_extended_regexp() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let mut g = grep("^a.c$", &[]);
        g.extended_regexp = true;
        let ran = run(g, Some("abc\na.c here\nxabc"), &mut env);
        assert_eq!(ran.out, "abc\n");
    }

    #[test]
    fn test_grep_ignore_case_prefixes_file_name() {
        let (_dir, mut env) = setup_test_environment("Target 1\nTaRgEt 2\nNo match\n");
        let mut g = grep("target", &["test_data.txt"]);
        g.ignore_case = true;

        let ran = run(g, None, &mut env);
        assert_eq!(ran.out, "test_data.txt:Target 1\ntest_data.txt:TaRgEt 2\n");
    }

    #[test]
    fn test_grep_trailing_context_a_1() {
        let content = "Line 1\nMATCH 1\nLine 3\nLine 4\nMATCH 2\nLine 6\nLine 7\nLine 8\n";
        let mut env = Environment::with_dir(std::env::temp_dir());
        let mut g = grep("MATCH", &[]);
        g.after_context = 1;

        let ran = run(g, Some(content), &mut env);
        assert_eq!(ran.out, "MATCH 1\nLine 3\n--\nMATCH 2\nLine 6\n");
    }

    #[test]
    fn test_grep_context_overlap_a_2() {
        let content = "MATCH 1\nLine 2\nMATCH 2\nLine 4\nLine 5\nLine 6\n";
        let mut env = Environment::with_dir(std::env::temp_dir());
        let mut g = grep("MATCH", &[]);
        g.after_context = 2;

        let ran = run(g, Some(content), &mut env);
        assert_eq!(ran.out, "MATCH 1\nLine 2\nMATCH 2\nLine 4\nLine 5\n");
    }

    #[test]
    fn test_grep_word_match() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let mut g = grep("cat", &[]);
        g.word_regexp = true;
        let ran = run(g, Some("concatenate\nthe cat sat\n"), &mut env);
        assert_eq!(ran.out, "the cat sat\n");
    }

    #[test]
    fn test_grep_without_pattern_is_a_diagnostic() {
        let mut env = Environment::with_dir(std::env::temp_dir());
        let ran = invoke(&["grep"], Some("x\n"), &mut env);
        assert_eq!(ran.flow, Flow::Continue);
        assert!(ran.out.is_empty());
        assert!(ran.err.starts_with("grep: "));
    }
}

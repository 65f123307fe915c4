//! Word splitting for a single command: quotes, escapes and whitespace.
//!
//! Operators (`|`, `>`, `>>`) are not recognised here; the [`crate::parser`]
//! strips them from the line before the remaining command text is handed over.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Runs the state machine over the whole input.
    ///
    /// An unterminated quote swallows the rest of the line into the current
    /// word instead of failing, so every input yields some token list.
    fn make_words(mut self) -> Vec<String> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        if self.state != LexingState::Start {
            out.push(std::mem::take(&mut self.buffer));
        }
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Pushes the character after a backslash, or the backslash itself at end of input.
    fn take_escaped(&mut self) {
        match self.read_char() {
            Some(next) => self.buffer.push(next),
            None => self.buffer.push('\\'),
        }
    }

    fn handle_start(&mut self, ch: char) {
        match ch {
            c if c.is_whitespace() => {}
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                self.take_escaped();
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        match ch {
            c if c.is_whitespace() => {
                out.push(std::mem::take(&mut self.buffer));
                self.state = LexingState::Start;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => self.take_escaped(),
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"') | Some('\\')) => self.take_escaped(),
            c => self.buffer.push(c),
        }
    }
}

/// Splits command text into an argument vector using shell-like quoting.
///
/// Single quotes are fully literal, double quotes only honour `\"` and `\\`,
/// and outside quotes a backslash escapes any character. Adjacent quoted and
/// unquoted pieces form one word.
pub fn split_words(line: &str) -> Vec<String> {
    LexingFSM::new(line).make_words()
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./-_~^".contains(c)
}

/// Quotes `word` so that [`split_words`] reads it back as a single, identical word.
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(is_safe_char) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        split_words(line)
    }

    #[test]
    fn test_plain_whitespace_split() {
        assert_eq!(words("ls  -la\t/tmp "), vec!["ls", "-la", "/tmp"]);
        assert!(words("   ").is_empty());
    }

    #[test]
    fn test_quotes_group_and_strip() {
        assert_eq!(words(r#"echo "hello world" 'a b'"#), vec!["echo", "hello world", "a b"]);
        assert_eq!(words(r#"say pre"mid dle"post"#), vec!["say", "premid dlepost"]);
        assert_eq!(words(r#"x "" ''"#), vec!["x", "", ""]);
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(words(r"echo a\ b \'q\'"), vec!["echo", "a b", "'q'"]);
        assert_eq!(words(r#"echo "say \"hi\" \n""#), vec!["echo", r#"say "hi" \n"#]);
        assert_eq!(words(r"echo 'no \escape'"), vec!["echo", r"no \escape"]);
    }

    #[test]
    fn test_malformed_input_degrades() {
        assert_eq!(words(r#"echo "unterminated here"#), vec!["echo", "unterminated here"]);
        assert_eq!(words("echo trailing\\"), vec!["echo", "trailing\\"]);
    }

    #[test]
    fn test_quote_reads_back() {
        for w in ["plain", "", "two words", "it's", r#"dq""#, "back\\slash", "tab\tx"] {
            assert_eq!(words(&quote(w)), vec![w.to_string()], "word {:?}", w);
        }
        assert_eq!(quote("a/b.txt"), "a/b.txt");
    }
}

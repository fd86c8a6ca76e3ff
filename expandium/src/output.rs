use std::path::Path;

use crate::lexer::is_identifier_continue;
use crate::token::Token;

/// Escape a string for use inside a C string literal (`__FILE__`,
/// linemarkers).
pub(crate) fn quote_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Assembles the output text: expanded tokens, line synchronization via
/// `# <line> "<file>"` linemarkers (small gaps padded with newlines
/// instead), or nothing at all in dependency mode.
pub(crate) struct OutputWriter {
    buf: String,
    linemarkers: bool,
    /// Dependency mode: swallow all text, the rule is rendered at the end.
    discard: bool,
    out_file: String,
    out_line: u32,
    last_char: Option<char>,
}

impl OutputWriter {
    pub(crate) fn new(linemarkers: bool, discard: bool) -> Self {
        OutputWriter {
            buf: String::new(),
            linemarkers,
            discard,
            out_file: String::new(),
            out_line: 1,
            last_char: None,
        }
    }

    /// Append one token, inserting a space only where two tokens from
    /// different origins would otherwise lex back as one.
    pub(crate) fn token(&mut self, tok: &Token) {
        if self.discard {
            return;
        }
        let sp = tok.spelling();
        if let (Some(prev), Some(first)) = (self.last_char, sp.chars().next())
            && would_merge(prev, first)
        {
            self.buf.push(' ');
        }
        self.buf.push_str(sp);
        if let Some(last) = sp.chars().last() {
            self.last_char = Some(last);
        }
    }

    pub(crate) fn line_break(&mut self) {
        if self.discard {
            return;
        }
        self.buf.push('\n');
        self.out_line += 1;
        self.last_char = Some('\n');
    }

    /// Align the output position with the source position about to be
    /// emitted. Called at line starts only.
    pub(crate) fn sync(&mut self, file: &str, line: u32) {
        if self.discard {
            return;
        }
        if self.out_file == file {
            if line == self.out_line {
                return;
            }
            // a short gap reads better as blank lines than a marker
            if self.linemarkers && line > self.out_line && line - self.out_line <= 8 {
                for _ in 0..(line - self.out_line) {
                    self.buf.push('\n');
                }
                self.out_line = line;
                self.last_char = Some('\n');
                return;
            }
        }
        if self.linemarkers {
            self.buf.push_str(&format!("# {} {}\n", line, quote_c_string(file)));
            self.last_char = Some('\n');
        }
        self.out_file = file.to_string();
        self.out_line = line;
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

/// Two characters that would fuse into one token if butted together:
/// identifier/number continuations, two-character operators, and
/// accidental comment openers.
fn would_merge(prev: char, next: char) -> bool {
    if is_identifier_continue(prev) && is_identifier_continue(next) {
        return true;
    }
    matches!(
        (prev, next),
        ('<', '<' | '=')
            | ('>', '>' | '=')
            | ('=', '=')
            | ('!', '=')
            | ('&', '&' | '=')
            | ('|', '|' | '=')
            | ('+', '+' | '=')
            | ('-', '-' | '=' | '>')
            | ('*', '=')
            | ('%', '=')
            | ('^', '=')
            | ('#', '#')
            | ('/', '/' | '*' | '=')
            | ('.', '.')
    )
}

/// Render the dependency-list output form: a Makefile rule whose target
/// is the source file's object and whose prerequisites are every file
/// the run opened, continuation-wrapped near column 72.
pub(crate) fn dependency_rule(source: &str, deps: &[String]) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("a");
    let target = format!("{stem}.o");
    let mut out = format!("{target}:");
    let mut col = out.len();
    for dep in deps {
        if col + 1 + dep.len() > 72 && col > target.len() + 1 {
            out.push_str(" \\\n ");
            col = 1;
        }
        out.push(' ');
        out.push_str(dep);
        col += 1 + dep.len();
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_sync_emits_a_linemarker() {
        let mut w = OutputWriter::new(true, false);
        w.sync("main.c", 1);
        w.token(&Token::id("x"));
        assert_eq!(w.finish(), "# 1 \"main.c\"\nx");
    }

    #[test]
    fn small_gaps_become_blank_lines() {
        let mut w = OutputWriter::new(true, false);
        w.sync("main.c", 1);
        w.token(&Token::id("a"));
        w.line_break();
        w.sync("main.c", 4);
        w.token(&Token::id("b"));
        assert_eq!(w.finish(), "# 1 \"main.c\"\na\n\n\nb");
    }

    #[test]
    fn large_gaps_become_markers() {
        let mut w = OutputWriter::new(true, false);
        w.sync("main.c", 1);
        w.token(&Token::id("a"));
        w.line_break();
        w.sync("main.c", 40);
        let text = w.finish();
        assert!(text.contains("# 40 \"main.c\"\n"));
    }

    #[test]
    fn suppressed_linemarkers_emit_nothing_extra() {
        let mut w = OutputWriter::new(false, false);
        w.sync("main.c", 1);
        w.token(&Token::id("a"));
        w.line_break();
        w.sync("main.c", 10);
        w.token(&Token::id("b"));
        assert_eq!(w.finish(), "a\nb");
    }

    #[test]
    fn protective_space_between_mergeable_tokens() {
        let mut w = OutputWriter::new(false, false);
        w.sync("main.c", 1);
        w.token(&Token::Number("1".into()));
        w.token(&Token::id("x"));
        w.token(&Token::Punct("+".into()));
        w.token(&Token::Punct("+".into()));
        w.token(&Token::Punct(")".into()));
        assert_eq!(w.finish(), "1 x+ +)");
    }

    #[test]
    fn fused_other_tokens_stay_fused() {
        let mut w = OutputWriter::new(false, false);
        w.token(&Token::Other("=+".into()));
        assert_eq!(w.finish(), "=+");
    }

    #[test]
    fn dependency_rule_shape() {
        let deps = vec!["main.c".to_string(), "a.h".to_string(), "b.h".to_string()];
        assert_eq!(dependency_rule("main.c", &deps), "main.o: main.c a.h b.h\n");
    }

    #[test]
    fn dependency_rule_wraps_long_lines() {
        let deps: Vec<String> = (0..12)
            .map(|i| format!("include/subdir/header_{i}.h"))
            .collect();
        let rule = dependency_rule("main.c", &deps);
        assert!(rule.contains(" \\\n"));
        for d in &deps {
            assert!(rule.contains(d.as_str()));
        }
    }
}

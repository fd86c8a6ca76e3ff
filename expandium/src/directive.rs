use log::debug;

use crate::config::IncludeKind;
use crate::driver::Preprocessor;
use crate::error::PreprocessError;
use crate::expr;
use crate::hideset::HideSet;
use crate::lexer;
use crate::macro_def::{DefineOutcome, parse_define};
use crate::token::Token;

/// Conditional nesting ceiling; the per-level flag masks are sized to it.
pub(crate) const MAX_COND_DEPTH: u32 = 64;

/// Conditional-inclusion state: pure counters, no heap.
///
/// `tru` and `fls` count the enclosing true and false levels; once any
/// level is false, every nested level only bumps `fls`. The two masks
/// carry one bit per level: "a branch of this level has already been
/// taken" and "this level has seen its #else".
#[derive(Default)]
pub(crate) struct CondStack {
    tru: u32,
    fls: u32,
    taken: u64,
    else_seen: u64,
}

impl CondStack {
    fn bit(depth: u32) -> u64 {
        1u64 << (depth - 1)
    }

    pub(crate) fn depth(&self) -> u32 {
        self.tru + self.fls
    }

    /// True while inside any false group: text is discarded, only
    /// conditional directives are interpreted.
    pub(crate) fn skipping(&self) -> bool {
        self.fls > 0
    }

    fn at_ceiling(&self) -> bool {
        self.depth() >= MAX_COND_DEPTH
    }

    fn push(&mut self, live: bool) {
        if live && self.fls == 0 {
            self.tru += 1;
        } else {
            self.fls += 1;
        }
        let b = Self::bit(self.depth());
        if live && self.fls == 0 {
            self.taken |= b;
        } else {
            self.taken &= !b;
        }
        self.else_seen &= !b;
    }

    fn pop(&mut self) {
        let b = Self::bit(self.depth());
        self.taken &= !b;
        self.else_seen &= !b;
        if self.fls > 0 {
            self.fls -= 1;
        } else {
            self.tru -= 1;
        }
    }

    /// Innermost level is the false one deciding elif/else fate.
    fn innermost_false(&self) -> bool {
        self.fls == 1
    }

    fn taken_here(&self) -> bool {
        self.depth() > 0 && self.taken & Self::bit(self.depth()) != 0
    }

    fn else_seen_here(&self) -> bool {
        self.depth() > 0 && self.else_seen & Self::bit(self.depth()) != 0
    }

    fn mark_else(&mut self) {
        self.else_seen |= Self::bit(self.depth());
    }

    /// The live branch ends at an #elif/#else: level goes false, branch
    /// stays marked taken.
    fn retire_true(&mut self) {
        self.tru -= 1;
        self.fls += 1;
        self.taken |= Self::bit(self.depth());
    }

    /// A false-seeking level found its branch.
    fn take_branch(&mut self) {
        self.fls -= 1;
        self.tru += 1;
        self.taken |= Self::bit(self.depth());
    }
}

impl Preprocessor {
    /// Process one directive line; the introducing `#` has been consumed
    /// at the start of a line in file context.
    pub(crate) fn handle_directive_line(&mut self) -> Result<(), PreprocessError> {
        let file = self.src.current_file().to_string();
        let line = self.src.current_line();
        let toks = self.read_directive_tokens()?;
        let mut i = 0;
        while toks.get(i).is_some_and(Token::is_ws) {
            i += 1;
        }
        match toks.get(i) {
            // a `#` alone on a line is the null directive
            None => Ok(()),
            Some(Token::Identifier { name, .. }) => {
                let cmd = name.clone();
                self.dispatch(&cmd, &toks, i + 1, &file, line)
            }
            // `# 123 "file"` — linemarker-style #line
            Some(Token::Number(_)) => {
                if self.cond.skipping() {
                    Ok(())
                } else {
                    self.handle_line_directive(&toks[i..], &file, line)
                }
            }
            Some(_) => {
                if self.cond.skipping() {
                    Ok(())
                } else if self.tolerant {
                    self.passthrough_directive(&toks)
                } else {
                    Err(PreprocessError::malformed(&file, line, "unrecognized directive"))
                }
            }
        }
    }

    fn dispatch(
        &mut self,
        cmd: &str,
        toks: &[Token],
        rest_at: usize,
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        let rest = &toks[rest_at.min(toks.len())..];
        match cmd {
            // conditional directives are interpreted even while skipping,
            // so nested groups inside a false region stay balanced
            "if" => self.handle_if(rest, file, line),
            "ifdef" => self.handle_ifdef(rest, false, file, line),
            "ifndef" => self.handle_ifdef(rest, true, file, line),
            "elif" => self.handle_elif(rest, file, line),
            "else" => self.handle_else(file, line),
            "endif" => self.handle_endif(file, line),
            _ if self.cond.skipping() => Ok(()),
            "define" => self.handle_define(rest, file, line),
            "undef" => self.handle_undef(rest, file, line),
            "include" => self.handle_include(rest, false, file, line),
            "include_next" => self.handle_include(rest, true, file, line),
            "line" => self.handle_line_directive(rest, file, line),
            "error" => Err(PreprocessError::ErrorDirective {
                file: file.to_string(),
                line,
                message: spell(rest),
            }),
            "warning" => self.warn(format!("{file}:{line}: #warning: {}", spell(rest))),
            "pragma" => self.handle_pragma(rest),
            "ident" => self.handle_ident(rest),
            _ => {
                if self.tolerant {
                    self.passthrough_directive(toks)
                } else {
                    Err(PreprocessError::malformed(
                        file,
                        line,
                        format!("unknown directive '#{cmd}'"),
                    ))
                }
            }
        }
    }

    /// Lex to the end of the logical line. Comments are always stripped
    /// here, whatever the comment-retention setting says about text.
    fn read_directive_tokens(&mut self) -> Result<Vec<Token>, PreprocessError> {
        let mut out = Vec::new();
        loop {
            match lexer::next_token(&mut self.src, false)? {
                Some(Token::Newline) | None => break,
                Some(t) => out.push(t),
            }
        }
        self.at_line_start = true;
        Ok(out)
    }

    fn handle_define(
        &mut self,
        rest: &[Token],
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        let (name, mac) = parse_define(rest, file, line)?;
        debug!("#define {name}");
        match self.table.define(name.clone(), mac) {
            DefineOutcome::Replaced => {
                self.warn(format!("{file}:{line}: macro '{name}' redefined"))
            }
            _ => Ok(()),
        }
    }

    fn handle_undef(
        &mut self,
        rest: &[Token],
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        let mut it = rest.iter().filter(|t| !t.is_ws());
        match it.next() {
            Some(Token::Identifier { name, .. }) => {
                debug!("#undef {name}");
                self.table.undef(name);
                Ok(())
            }
            _ => Err(PreprocessError::malformed(file, line, "#undef needs a name")),
        }
    }

    fn handle_if(&mut self, rest: &[Token], file: &str, line: u32) -> Result<(), PreprocessError> {
        if self.cond.at_ceiling() {
            return Err(PreprocessError::conditional(
                file,
                line,
                "conditionals nested too deeply",
            ));
        }
        let live = if self.cond.skipping() {
            false
        } else {
            self.eval_if_expr(rest, file, line)?
        };
        self.cond.push(live);
        Ok(())
    }

    fn handle_ifdef(
        &mut self,
        rest: &[Token],
        negate: bool,
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        if self.cond.at_ceiling() {
            return Err(PreprocessError::conditional(
                file,
                line,
                "conditionals nested too deeply",
            ));
        }
        let name = rest.iter().find(|t| !t.is_ws());
        let live = if self.cond.skipping() {
            false
        } else {
            match name {
                Some(Token::Identifier { name, .. }) => self.table.is_defined(name) != negate,
                _ => {
                    return Err(PreprocessError::malformed(
                        file,
                        line,
                        if negate {
                            "#ifndef needs a name"
                        } else {
                            "#ifdef needs a name"
                        },
                    ));
                }
            }
        };
        self.cond.push(live);
        Ok(())
    }

    fn handle_elif(&mut self, rest: &[Token], file: &str, line: u32) -> Result<(), PreprocessError> {
        if self.cond.depth() == 0 {
            return Err(PreprocessError::conditional(file, line, "#elif without #if"));
        }
        if self.cond.else_seen_here() {
            return Err(PreprocessError::conditional(file, line, "#elif after #else"));
        }
        if !self.cond.skipping() {
            self.cond.retire_true();
        } else if self.cond.innermost_false() && !self.cond.taken_here() {
            if self.eval_if_expr(rest, file, line)? {
                self.cond.take_branch();
            }
        }
        Ok(())
    }

    fn handle_else(&mut self, file: &str, line: u32) -> Result<(), PreprocessError> {
        if self.cond.depth() == 0 {
            return Err(PreprocessError::conditional(file, line, "#else without #if"));
        }
        if self.cond.else_seen_here() {
            return Err(PreprocessError::conditional(file, line, "#else after #else"));
        }
        if !self.cond.skipping() {
            self.cond.retire_true();
        } else if self.cond.innermost_false() && !self.cond.taken_here() {
            self.cond.take_branch();
        }
        self.cond.mark_else();
        Ok(())
    }

    fn handle_endif(&mut self, file: &str, line: u32) -> Result<(), PreprocessError> {
        if self.cond.depth() == 0 {
            return Err(PreprocessError::conditional(file, line, "#endif without #if"));
        }
        self.cond.pop();
        Ok(())
    }

    /// Macro-expand and evaluate a controlling expression, with
    /// `defined` resolved before expansion so its operand is never
    /// expanded itself.
    fn eval_if_expr(
        &mut self,
        rest: &[Token],
        file: &str,
        line: u32,
    ) -> Result<bool, PreprocessError> {
        let resolved = expr::resolve_defined(rest, &self.table, file, line)?;
        let expanded = self.expand_token_list(resolved, &HideSet::new())?;
        // a macro may itself have produced a defined-expression
        let expanded = expr::resolve_defined(&expanded, &self.table, file, line)?;
        expr::evaluate(&expanded, self.int_width, file, line)
    }

    fn handle_include(
        &mut self,
        rest: &[Token],
        next: bool,
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        let (path, kind) = self.parse_include_target(rest, true, file, line)?;
        let (name, text, index) = self.resolve_include(&path, kind, next)?;
        if self.pragma_once.contains(&name) {
            debug!("skipping '{name}' (#pragma once)");
            return Ok(());
        }
        if self.src.open_file_names().contains(&name) {
            return Err(PreprocessError::other(
                file,
                line,
                format!("include cycle detected for '{name}'"),
            ));
        }
        if !self.deps.contains(&name) {
            self.deps.push(name.clone());
        }
        debug!("including '{name}'");
        self.src.push_source(&name, &text, index, self.cond.depth())?;
        self.at_line_start = true;
        Ok(())
    }

    /// `"path"`, `<path>`, or a macro expansion producing either form.
    fn parse_include_target(
        &mut self,
        rest: &[Token],
        allow_expand: bool,
        file: &str,
        line: u32,
    ) -> Result<(String, IncludeKind), PreprocessError> {
        let mut it = rest.iter().enumerate().skip_while(|(_, t)| t.is_ws());
        match it.next() {
            Some((_, Token::StringLiteral(s))) if s.len() >= 2 => {
                Ok((s[1..s.len() - 1].to_string(), IncludeKind::Quote))
            }
            Some((_, Token::Punct(p))) if p == "<" => {
                let mut path = String::new();
                for (_, t) in it {
                    if t.is_punct(">") {
                        return Ok((path.trim().to_string(), IncludeKind::System));
                    }
                    path.push_str(t.spelling());
                }
                Err(PreprocessError::malformed(file, line, "missing '>' in #include"))
            }
            Some(_) if allow_expand => {
                let expanded =
                    self.expand_token_list(rest.to_vec(), &HideSet::new())?;
                self.parse_include_target(&expanded, false, file, line)
            }
            _ => Err(PreprocessError::malformed(file, line, "bad #include target")),
        }
    }

    fn handle_line_directive(
        &mut self,
        rest: &[Token],
        file: &str,
        line: u32,
    ) -> Result<(), PreprocessError> {
        let expanded = self.expand_token_list(rest.to_vec(), &HideSet::new())?;
        let mut it = expanded.iter().filter(|t| !t.is_ws());
        let number = match it.next() {
            Some(Token::Number(n)) => n.parse::<u32>().map_err(|_| {
                PreprocessError::malformed(file, line, format!("bad line number '{n}'"))
            })?,
            _ => {
                return Err(PreprocessError::malformed(file, line, "#line needs a number"));
            }
        };
        self.src.set_line(number);
        if let Some(Token::StringLiteral(s)) = it.next()
            && s.len() >= 2
        {
            self.src.set_file_name(&s[1..s.len() - 1]);
        }
        Ok(())
    }

    fn handle_pragma(&mut self, rest: &[Token]) -> Result<(), PreprocessError> {
        let mut sig = rest.iter().filter(|t| !t.is_ws());
        if sig.next().is_some_and(|t| t.is_ident("once")) && sig.next().is_none() {
            let name = self.src.current_file().to_string();
            debug!("#pragma once in '{name}'");
            self.pragma_once.insert(name);
            return Ok(());
        }
        // everything else belongs to a downstream consumer, verbatim
        self.pending
            .push_back((Token::Punct("#".to_string()), HideSet::new()));
        self.pending
            .push_back((painted(Token::id("pragma")), HideSet::new()));
        self.pending.push_back((Token::ws(), HideSet::new()));
        for t in skip_leading_ws(rest) {
            self.pending.push_back((painted(t.clone()), HideSet::new()));
        }
        self.pending.push_back((Token::Newline, HideSet::new()));
        Ok(())
    }

    fn handle_ident(&mut self, rest: &[Token]) -> Result<(), PreprocessError> {
        let mut sig = rest.iter().filter(|t| !t.is_ws());
        match sig.next() {
            Some(Token::StringLiteral(_)) if sig.next().is_none() => Ok(()),
            _ => self.warn(format!(
                "{}:{}: #ident expects a string literal",
                self.src.current_file(),
                self.src.current_line()
            )),
        }
    }

    /// Tolerant mode: hand an unknown directive line through untouched
    /// and unexpanded.
    fn passthrough_directive(&mut self, toks: &[Token]) -> Result<(), PreprocessError> {
        debug!("passing through unknown directive");
        self.pending
            .push_back((Token::Punct("#".to_string()), HideSet::new()));
        for t in toks {
            self.pending.push_back((painted(t.clone()), HideSet::new()));
        }
        self.pending.push_back((Token::Newline, HideSet::new()));
        Ok(())
    }

    /// Discard a false group: only directive lines are interpreted, and
    /// nested `#if`/`#endif` balance is tracked so an inner group cannot
    /// end the outer one. Unterminated literals in skipped text are
    /// tolerated to end of line.
    pub(crate) fn skip_false_group(&mut self) -> Result<(), PreprocessError> {
        while self.cond.skipping() {
            // line-start scan: leading blanks and comments may precede #
            let first = loop {
                match self.src.next_logical() {
                    None => return self.finish_current_file(),
                    Some(c) if lexer::is_hspace(c) => {}
                    Some('/') => match self.src.peek_logical() {
                        Some('*') => {
                            self.src.next_logical();
                            self.src.read_block_comment()?;
                        }
                        Some('/') => {
                            self.src.next_logical();
                            self.src.read_line_comment();
                        }
                        _ => break '/',
                    },
                    Some(c) => break c,
                }
            };
            if first == '\n' {
                continue;
            }
            if first == '#' {
                self.handle_directive_line()?;
                continue;
            }
            self.discard_line_tail(first)?;
        }
        self.at_line_start = true;
        Ok(())
    }

    fn discard_line_tail(&mut self, first: char) -> Result<(), PreprocessError> {
        let mut c = first;
        loop {
            match c {
                '\n' => return Ok(()),
                '/' => match self.src.peek_logical() {
                    Some('*') => {
                        self.src.next_logical();
                        self.src.read_block_comment()?;
                    }
                    Some('/') => {
                        self.src.next_logical();
                        self.src.read_line_comment();
                    }
                    _ => {}
                },
                quote @ ('"' | '\'') => loop {
                    match self.src.next_logical() {
                        None => return Ok(()),
                        Some('\\') => {
                            self.src.next_logical();
                        }
                        // skipped vendor code gets away with an
                        // unterminated literal; the line ends it
                        Some('\n') => return Ok(()),
                        Some(q) if q == quote => break,
                        Some(_) => {}
                    }
                },
                _ => {}
            }
            c = match self.src.next_logical() {
                Some(c) => c,
                None => return Ok(()),
            };
        }
    }
}

fn spell(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(Token::spelling)
        .collect::<String>()
        .trim()
        .to_string()
}

fn skip_leading_ws(tokens: &[Token]) -> &[Token] {
    let lead = tokens.iter().take_while(|t| t.is_ws()).count();
    &tokens[lead..]
}

fn painted(tok: Token) -> Token {
    match tok {
        Token::Identifier { name, .. } => Token::Identifier {
            name,
            noexpand: true,
        },
        other => other,
    }
}

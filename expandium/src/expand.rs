use std::mem;

use log::trace;

use crate::driver::{Frame, Preprocessor};
use crate::error::PreprocessError;
use crate::hideset::HideSet;
use crate::lexer;
use crate::macro_def::{Builtin, Macro};
use crate::output::quote_c_string;
use crate::token::{BodyToken, Token};

/// Substitution output before the paste pass: runs of tokens separated
/// by the surviving `##` markers.
enum Seg {
    Toks(Vec<Token>),
    Paste,
}

impl Preprocessor {
    /// The engine's pull interface: the next fully macro-expanded token.
    ///
    /// Identifiers naming macros are expanded in place by pushing rescan
    /// frames; everything else passes through. A macro name whose
    /// identity is already in the active blocker set comes out painted
    /// (`noexpand`) and is plain text from then on.
    pub(crate) fn next_expanded_token(&mut self) -> Result<Option<Token>, PreprocessError> {
        loop {
            let Some((tok, hide)) = self.next_pp_token_h()? else {
                return Ok(None);
            };
            let Token::Identifier { name, noexpand } = &tok else {
                return Ok(Some(tok));
            };
            if *noexpand {
                return Ok(Some(tok));
            }
            let Some(mac) = self.table.lookup(name) else {
                return Ok(Some(tok));
            };
            if let Some(builtin) = mac.builtin {
                return Ok(Some(self.expand_builtin(builtin)));
            }
            if hide.contains(name) {
                trace!("blocking re-expansion of '{name}'");
                return Ok(Some(Token::Identifier {
                    name: name.clone(),
                    noexpand: true,
                }));
            }
            let name = name.clone();
            let mac = mac.clone();

            if mac.is_function_like() {
                // A function-like macro expands only when the next
                // significant token is '(' — which may sit beyond the end
                // of the current rescan buffer, in the enclosing stream.
                let mut skipped: Vec<(Token, HideSet)> = Vec::new();
                let mut invoked = None;
                loop {
                    match self.next_pp_token_h()? {
                        Some((t, h)) if t.is_punct("(") => {
                            invoked = Some(h);
                            break;
                        }
                        Some((t, h)) if t.is_ws() => skipped.push((t, h)),
                        Some(entry) => {
                            skipped.push(entry);
                            break;
                        }
                        None => break,
                    }
                }
                let Some(paren_hide) = invoked else {
                    for entry in skipped.into_iter().rev() {
                        self.pending.push_front(entry);
                    }
                    return Ok(Some(tok));
                };
                trace!("expanding function-like macro '{name}'");
                // an invocation spanning a splice boundary combines the
                // blocker sets of both contexts
                let hide = hide.union(&paren_hide);
                let args = self.read_macro_args(&name, &mac)?;
                let replaced = self.substitute(&mac, &args, &hide)?;
                self.push_expansion(&name, replaced, &hide)?;
            } else {
                trace!("expanding object-like macro '{name}'");
                let replaced = self.substitute(&mac, &[], &hide)?;
                self.push_expansion(&name, replaced, &hide)?;
            }
        }
    }

    fn push_expansion(
        &mut self,
        name: &str,
        tokens: Vec<Token>,
        hide: &HideSet,
    ) -> Result<(), PreprocessError> {
        if self.frames.len() >= self.recursion_limit {
            return Err(PreprocessError::RecursionLimit {
                file: self.src.current_file().to_string(),
                line: self.src.current_line(),
                name: name.to_string(),
            });
        }
        self.frames.push(Frame {
            tokens: tokens.into(),
            hide: hide.insert(name),
        });
        Ok(())
    }

    /// Builtins expand by direct computation, not token substitution.
    fn expand_builtin(&mut self, builtin: Builtin) -> Token {
        match builtin {
            Builtin::File => Token::StringLiteral(quote_c_string(self.src.current_file())),
            Builtin::Line => Token::Number(self.src.current_line().to_string()),
            Builtin::Counter => {
                let n = self.counter;
                self.counter += 1;
                Token::Number(n.to_string())
            }
            Builtin::Date => Token::StringLiteral(quote_c_string(&crate::date_time::date_string())),
            Builtin::Time => Token::StringLiteral(quote_c_string(&crate::date_time::time_string())),
        }
    }

    /// Read a parenthesized argument list, '(' already consumed.
    ///
    /// Commas inside nested parentheses or literals do not separate.
    /// Tokens are pulled through the same layer that dispatches
    /// directives, so a `#` line in the middle of a multi-line argument
    /// list is processed (conditional counters included) before argument
    /// scanning resumes. Produces exactly `arity` arguments, plus the
    /// joined variadic tail when the macro is variadic.
    fn read_macro_args(
        &mut self,
        name: &str,
        mac: &Macro,
    ) -> Result<Vec<Vec<Token>>, PreprocessError> {
        let arity = mac.arity();
        let mut args: Vec<Vec<Token>> = Vec::new();
        let mut cur: Vec<Token> = Vec::new();
        let mut depth = 1u32;
        loop {
            let Some((tok, _)) = self.next_pp_token_h()? else {
                return Err(self.arg_error(name, "unterminated macro argument list"));
            };
            match &tok {
                Token::Punct(p) if p == "(" => {
                    depth += 1;
                    cur.push(tok);
                }
                Token::Punct(p) if p == ")" => {
                    depth -= 1;
                    if depth == 0 {
                        args.push(trim_ws(cur));
                        break;
                    }
                    cur.push(tok);
                }
                Token::Punct(p) if p == "," && depth == 1 => {
                    args.push(trim_ws(mem::take(&mut cur)));
                }
                Token::Newline => cur.push(Token::ws()),
                _ => cur.push(tok),
            }
        }

        // `M()` supplies zero arguments, not one empty one
        if args.len() == 1 && args[0].is_empty() && arity == 0 && !mac.is_variadic() {
            args.clear();
        }
        if args.len() < arity {
            return Err(self.arg_error(
                name,
                format!("macro '{name}' needs {arity} arguments, got {}", args.len()),
            ));
        }
        if !mac.is_variadic() {
            if args.len() > arity {
                return Err(self.arg_error(
                    name,
                    format!("macro '{name}' takes {arity} arguments, got {}", args.len()),
                ));
            }
            return Ok(args);
        }

        // join everything past the named parameters into the raw tail
        let extra: Vec<Vec<Token>> = args.split_off(arity);
        let mut tail: Vec<Token> = Vec::new();
        for (i, part) in extra.into_iter().enumerate() {
            if i > 0 {
                tail.push(Token::Punct(",".to_string()));
                tail.push(Token::ws());
            }
            tail.extend(part);
        }
        args.push(trim_ws(tail));
        Ok(args)
    }

    fn arg_error(&self, _name: &str, detail: impl Into<String>) -> PreprocessError {
        PreprocessError::MacroArgMismatch {
            file: self.src.current_file().to_string(),
            line: self.src.current_line(),
            detail: detail.into(),
        }
    }

    /// Apply a replacement list to resolved arguments.
    ///
    /// A parameter next to `#` or `##` substitutes its raw argument; any
    /// other parameter is fully macro-expanded first, under the blocker
    /// set of the invocation site, never the callee's. The paste pass
    /// then joins across every surviving `##`.
    pub(crate) fn substitute(
        &mut self,
        mac: &Macro,
        args: &[Vec<Token>],
        hide: &HideSet,
    ) -> Result<Vec<Token>, PreprocessError> {
        let body = mac.body.clone();
        let va = mac.arity();
        let mut segs: Vec<Seg> = Vec::new();
        let mut skip_next = false;

        for (i, el) in body.iter().enumerate() {
            if skip_next {
                skip_next = false;
                continue;
            }
            match el {
                BodyToken::Paste
                    if mac.is_variadic()
                        && matches!(body.get(i + 1), Some(BodyToken::Param(p)) if *p == va)
                        && last_significant_is_comma(&segs) =>
                {
                    // GNU `, ## __VA_ARGS__`: an empty tail swallows the
                    // comma; a non-empty one keeps it and substitutes
                    // normally, no paste either way.
                    let empty = args.get(va).is_none_or(|a| a.iter().all(Token::is_ws));
                    if empty {
                        remove_trailing_comma(&mut segs);
                        skip_next = true;
                    }
                }
                BodyToken::Paste => segs.push(Seg::Paste),
                BodyToken::Stringize(p) => {
                    segs.push(Seg::Toks(vec![stringize_arg(args.get(*p).map_or(
                        &[][..],
                        Vec::as_slice,
                    ))]));
                }
                BodyToken::Param(p) => {
                    let next_paste = matches!(body.get(i + 1), Some(BodyToken::Paste));
                    let prev_paste = matches!(segs.last(), Some(Seg::Paste));
                    let raw = args.get(*p).cloned().unwrap_or_default();
                    let toks = if prev_paste || next_paste {
                        raw
                    } else {
                        self.expand_token_list(raw, hide)?
                    };
                    segs.push(Seg::Toks(toks));
                }
                BodyToken::Text(t) => segs.push(Seg::Toks(vec![t.clone()])),
            }
        }

        // paste pass
        let mut out: Vec<Token> = Vec::new();
        let mut it = segs.into_iter();
        while let Some(seg) = it.next() {
            match seg {
                Seg::Toks(ts) => out.extend(ts),
                Seg::Paste => {
                    let right = match it.next() {
                        Some(Seg::Toks(ts)) => ts,
                        // definition-time validation keeps ## interior
                        _ => Vec::new(),
                    };
                    paste_onto(&mut out, right);
                }
            }
        }
        Ok(out)
    }

    /// Expand a detached token list to exhaustion: argument
    /// pre-expansion and `#if` lines. The file stream is off limits
    /// here, so a function-like macro name at the end of the list simply
    /// survives unexpanded — the enclosing rescan gets another chance at
    /// it across the splice boundary.
    pub(crate) fn expand_token_list(
        &mut self,
        tokens: Vec<Token>,
        hide: &HideSet,
    ) -> Result<Vec<Token>, PreprocessError> {
        if tokens.is_empty() {
            return Ok(tokens);
        }
        if self.expand_depth >= self.recursion_limit {
            return Err(PreprocessError::RecursionLimit {
                file: self.src.current_file().to_string(),
                line: self.src.current_line(),
                name: "<argument>".to_string(),
            });
        }
        self.expand_depth += 1;
        self.isolated += 1;
        let saved_frames = mem::take(&mut self.frames);
        let saved_pending = mem::take(&mut self.pending);
        self.frames.push(Frame {
            tokens: tokens.into(),
            hide: hide.clone(),
        });

        let mut out = Vec::new();
        let result = loop {
            match self.next_expanded_token() {
                Ok(Some(t)) => out.push(t),
                Ok(None) => break Ok(out),
                Err(e) => break Err(e),
            }
        };

        self.frames = saved_frames;
        self.pending = saved_pending;
        self.isolated -= 1;
        self.expand_depth -= 1;
        result
    }
}

fn trim_ws(mut tokens: Vec<Token>) -> Vec<Token> {
    while tokens.last().is_some_and(Token::is_ws) {
        tokens.pop();
    }
    let lead = tokens.iter().take_while(|t| t.is_ws()).count();
    tokens.drain(..lead);
    tokens
}

fn last_significant_is_comma(segs: &[Seg]) -> bool {
    for seg in segs.iter().rev() {
        if let Seg::Toks(ts) = seg {
            for t in ts.iter().rev() {
                if t.is_ws() {
                    continue;
                }
                return t.is_punct(",");
            }
        }
    }
    false
}

fn remove_trailing_comma(segs: &mut [Seg]) {
    for seg in segs.iter_mut().rev() {
        if let Seg::Toks(ts) = seg {
            while ts.last().is_some_and(Token::is_ws) {
                ts.pop();
            }
            if ts.last().is_some_and(|t| t.is_punct(",")) {
                ts.pop();
                return;
            }
            if !ts.is_empty() {
                return;
            }
        }
    }
}

/// Join `right` onto the tail of `out` across a `##`: the last token of
/// the left side and the first of the right combine into one token when
/// the concatenation lexes as one. When it does not, both fragments are
/// regenerated as-is with no invented separator. An empty side is a
/// placemarker: the other side survives unchanged.
fn paste_onto(out: &mut Vec<Token>, right: Vec<Token>) {
    while out.last().is_some_and(Token::is_ws) {
        out.pop();
    }
    let mut right = right;
    let lead = right.iter().take_while(|t| t.is_ws()).count();
    right.drain(..lead);

    let Some(first) = right.first().cloned() else {
        return;
    };
    let Some(last) = out.pop() else {
        out.extend(right);
        return;
    };
    right.remove(0);
    let joined = format!("{}{}", last.spelling(), first.spelling());
    match lexer::lex_single(&joined) {
        Some(tok) => out.push(tok),
        // not a single token: both fragments as-is, butted together
        None => out.push(Token::Other(joined)),
    }
    out.extend(right);
}

/// The `#` operator: raw argument text as a string literal, interior
/// whitespace runs collapsed to single spaces, embedded `"` and `\`
/// escaped.
fn stringize_arg(tokens: &[Token]) -> Token {
    let mut s = String::from('"');
    let mut pending_space = false;
    let mut first = true;
    for t in tokens {
        if t.is_ws() {
            pending_space = !first;
            continue;
        }
        if pending_space {
            s.push(' ');
            pending_space = false;
        }
        for c in t.spelling().chars() {
            if c == '"' || c == '\\' {
                s.push('\\');
            }
            s.push(c);
        }
        first = false;
    }
    s.push('"');
    Token::StringLiteral(s)
}

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::PreprocessError;
use crate::token::{BodyToken, Token};

/// Formal-parameter ceiling for function-like macros.
pub(crate) const MAX_MACRO_ARGS: usize = 128;

/// Builtin macros recognized by a reserved tag on their table slot; they
/// expand by direct computation, never by replacement text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Builtin {
    File,
    Line,
    Counter,
    Date,
    Time,
}

/// A preprocessor macro definition
#[derive(Clone, Debug)]
pub struct Macro {
    /// Formal parameter names; `None` for an object-like macro.
    pub(crate) params: Option<Vec<String>>,
    /// Trailing `...` captures extra arguments as `__VA_ARGS__`.
    pub(crate) variadic: bool,
    /// Parsed replacement list, shared between the table and active
    /// expansions.
    pub(crate) body: Rc<Vec<BodyToken>>,
    /// Where the definition came from, for redefinition diagnostics.
    pub(crate) definition_location: Option<(String, u32)>,
    pub(crate) builtin: Option<Builtin>,
}

impl Macro {
    pub(crate) fn builtin(kind: Builtin) -> Self {
        Macro {
            params: None,
            variadic: false,
            body: Rc::new(Vec::new()),
            definition_location: None,
            builtin: Some(kind),
        }
    }

    /// Whether an invocation needs a parenthesized argument list.
    #[must_use]
    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }

    /// Number of named formal parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.as_ref().map_or(0, Vec::len)
    }

    /// Whether the macro captures trailing arguments as `__VA_ARGS__`.
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Same definition modulo whitespace width: such a redefinition is
    /// silently accepted.
    fn same_definition(&self, other: &Macro) -> bool {
        self.params == other.params
            && self.variadic == other.variadic
            && self.builtin == other.builtin
            && self.body == other.body
    }
}

/// What [`MacroTable::define`] did with a definition.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DefineOutcome {
    New,
    /// Redefined with an equivalent body; silently accepted.
    Unchanged,
    /// Redefined with a different body; the caller warns.
    Replaced,
}

/// Identifier-to-macro mapping.
///
/// The exact mapping semantics are the contract here, not the backing
/// structure; a hash map satisfies the same external behavior as the
/// classic bit-trie with ordinary O(key) lookups.
#[derive(Default)]
pub(crate) struct MacroTable {
    map: HashMap<String, Macro>,
}

impl MacroTable {
    pub(crate) fn new() -> Self {
        MacroTable {
            map: HashMap::new(),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Macro> {
        self.map.get(name)
    }

    pub(crate) fn is_defined(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub(crate) fn define(&mut self, name: String, mac: Macro) -> DefineOutcome {
        match self.map.get(&name) {
            Some(old) if old.same_definition(&mac) => DefineOutcome::Unchanged,
            Some(_) => {
                self.map.insert(name, mac);
                DefineOutcome::Replaced
            }
            None => {
                self.map.insert(name, mac);
                DefineOutcome::New
            }
        }
    }

    /// `#undef`: the slot goes back to "not a macro". Undefining an
    /// unknown name is not an error.
    pub(crate) fn undef(&mut self, name: &str) -> bool {
        self.map.remove(name).is_some()
    }

    pub(crate) fn all(&self) -> &HashMap<String, Macro> {
        &self.map
    }
}

/// Parse the token list after `#define` into a named definition.
///
/// Function-like form requires the `(` to touch the name; with any
/// whitespace between, the parenthesis belongs to the replacement text.
pub(crate) fn parse_define(
    tokens: &[Token],
    file: &str,
    line: u32,
) -> Result<(String, Macro), PreprocessError> {
    let mut it = tokens.iter().peekable();
    while it.peek().is_some_and(|t| t.is_ws()) {
        it.next();
    }
    let name = match it.next() {
        Some(Token::Identifier { name, .. }) => name.clone(),
        _ => return Err(PreprocessError::malformed(file, line, "#define needs a name")),
    };

    let mut params: Option<Vec<String>> = None;
    let mut variadic = false;

    if it.peek().is_some_and(|t| t.is_punct("(")) {
        it.next();
        let mut names: Vec<String> = Vec::new();
        loop {
            while it.peek().is_some_and(|t| t.is_ws()) {
                it.next();
            }
            match it.next() {
                Some(Token::Punct(p)) if p == ")" && names.is_empty() && !variadic => break,
                Some(Token::Punct(p)) if p == "..." => {
                    variadic = true;
                    while it.peek().is_some_and(|t| t.is_ws()) {
                        it.next();
                    }
                    match it.next() {
                        Some(Token::Punct(p)) if p == ")" => break,
                        _ => {
                            return Err(PreprocessError::malformed(
                                file,
                                line,
                                "expected ')' after '...'",
                            ));
                        }
                    }
                }
                Some(Token::Identifier { name: p, .. }) => {
                    if names.iter().any(|n| n == p) {
                        return Err(PreprocessError::malformed(
                            file,
                            line,
                            format!("duplicate macro parameter '{p}'"),
                        ));
                    }
                    names.push(p.clone());
                    if names.len() > MAX_MACRO_ARGS {
                        return Err(PreprocessError::malformed(
                            file,
                            line,
                            "too many macro parameters",
                        ));
                    }
                    while it.peek().is_some_and(|t| t.is_ws()) {
                        it.next();
                    }
                    match it.next() {
                        Some(Token::Punct(p)) if p == "," => {}
                        Some(Token::Punct(p)) if p == ")" => break,
                        _ => {
                            return Err(PreprocessError::malformed(
                                file,
                                line,
                                "expected ',' or ')' in macro parameter list",
                            ));
                        }
                    }
                }
                _ => {
                    return Err(PreprocessError::malformed(
                        file,
                        line,
                        "bad macro parameter list",
                    ));
                }
            }
        }
        params = Some(names);
    }

    let rest: Vec<Token> = it.cloned().collect();
    let body = parse_replacement_list(&rest, params.as_deref(), variadic, file, line)?;

    Ok((
        name,
        Macro {
            params,
            variadic,
            body: Rc::new(body),
            definition_location: Some((file.to_string(), line)),
            builtin: None,
        },
    ))
}

/// Turn raw replacement tokens into the tagged element list: parameter
/// references, stringize and paste markers become their own variants,
/// whitespace runs collapse to one space.
fn parse_replacement_list(
    tokens: &[Token],
    params: Option<&[String]>,
    variadic: bool,
    file: &str,
    line: u32,
) -> Result<Vec<BodyToken>, PreprocessError> {
    let param_index = |name: &str| -> Option<usize> {
        let params = params?;
        if let Some(i) = params.iter().position(|p| p == name) {
            return Some(i);
        }
        if variadic && name == "__VA_ARGS__" {
            return Some(params.len());
        }
        None
    };

    let mut out: Vec<BodyToken> = Vec::new();
    let mut it = tokens.iter().peekable();
    // leading whitespace is not part of the replacement list
    while it.peek().is_some_and(|t| t.is_ws()) {
        it.next();
    }

    while let Some(tok) = it.next() {
        match tok {
            Token::Whitespace(_) | Token::Comment(_) | Token::Newline => {
                // collapse runs; drop entirely next to a paste marker
                while it.peek().is_some_and(|t| t.is_ws()) {
                    it.next();
                }
                if it.peek().is_none() {
                    break;
                }
                if !matches!(out.last(), Some(BodyToken::Paste) | None)
                    && !it.peek().is_some_and(|t| t.is_punct("##"))
                {
                    out.push(BodyToken::Text(Token::ws()));
                }
            }
            Token::Punct(p) if p == "##" => {
                if out.is_empty() {
                    return Err(PreprocessError::malformed(
                        file,
                        line,
                        "'##' cannot begin a replacement list",
                    ));
                }
                out.push(BodyToken::Paste);
            }
            Token::Punct(p) if p == "#" && params.is_some() => {
                while it.peek().is_some_and(|t| t.is_ws()) {
                    it.next();
                }
                match it.next() {
                    Some(Token::Identifier { name, .. }) if param_index(name).is_some() => {
                        let idx = param_index(name).unwrap_or_default();
                        out.push(BodyToken::Stringize(idx));
                    }
                    _ => {
                        return Err(PreprocessError::malformed(
                            file,
                            line,
                            "'#' must be followed by a macro parameter",
                        ));
                    }
                }
            }
            Token::Identifier { name, .. } => match param_index(name) {
                Some(idx) => out.push(BodyToken::Param(idx)),
                None if name == "__VA_ARGS__" && params.is_some() => {
                    return Err(PreprocessError::malformed(
                        file,
                        line,
                        "'__VA_ARGS__' is only valid in a variadic macro",
                    ));
                }
                None => out.push(BodyToken::Text(tok.clone())),
            },
            _ => out.push(BodyToken::Text(tok.clone())),
        }
    }

    if matches!(out.last(), Some(BodyToken::Paste)) {
        return Err(PreprocessError::malformed(
            file,
            line,
            "'##' cannot end a replacement list",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<Token> {
        let mut src = crate::source::SourceStack::new();
        src.push_source("t.c", text, None, 0).unwrap();
        let mut out = Vec::new();
        while let Some(t) = crate::lexer::next_token(&mut src, false).unwrap() {
            if t == Token::Newline {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn object_like_define() {
        let (name, mac) = parse_define(&toks("PI 3.14"), "t.c", 1).unwrap();
        assert_eq!(name, "PI");
        assert!(!mac.is_function_like());
        assert_eq!(mac.body.len(), 1);
    }

    #[test]
    fn function_like_define_maps_params() {
        let (_, mac) = parse_define(&toks("ADD(a, b) ((a)+(b))"), "t.c", 1).unwrap();
        assert_eq!(mac.arity(), 2);
        assert!(mac.body.contains(&BodyToken::Param(0)));
        assert!(mac.body.contains(&BodyToken::Param(1)));
    }

    #[test]
    fn space_before_paren_means_object_like() {
        let (_, mac) = parse_define(&toks("NOT_FN (a)"), "t.c", 1).unwrap();
        assert!(!mac.is_function_like());
    }

    #[test]
    fn variadic_define() {
        let (_, mac) = parse_define(&toks("LOG(fmt, ...) f(fmt, __VA_ARGS__)"), "t.c", 1).unwrap();
        assert!(mac.is_variadic());
        // __VA_ARGS__ maps to the slot one past the named parameters
        assert!(mac.body.contains(&BodyToken::Param(1)));
    }

    #[test]
    fn stringize_marker() {
        let (_, mac) = parse_define(&toks("S(x) #x"), "t.c", 1).unwrap();
        assert_eq!(mac.body.as_ref(), &vec![BodyToken::Stringize(0)]);
    }

    #[test]
    fn paste_cannot_begin_or_end() {
        assert!(parse_define(&toks("P(a) ##a"), "t.c", 1).is_err());
        assert!(parse_define(&toks("P(a) a##"), "t.c", 1).is_err());
    }

    #[test]
    fn stringize_requires_parameter() {
        assert!(parse_define(&toks("S(x) #y"), "t.c", 1).is_err());
    }

    #[test]
    fn va_args_outside_variadic_is_rejected() {
        assert!(parse_define(&toks("F(a) __VA_ARGS__"), "t.c", 1).is_err());
    }

    #[test]
    fn redefinition_equivalence_ignores_whitespace_width() {
        let (_, a) = parse_define(&toks("M(x)  x  +  1"), "t.c", 1).unwrap();
        let (_, b) = parse_define(&toks("M(x) x + 1"), "t.c", 2).unwrap();
        let (_, c) = parse_define(&toks("M(x) x+1"), "t.c", 3).unwrap();
        let mut table = MacroTable::new();
        assert_eq!(table.define("M".into(), a), DefineOutcome::New);
        assert_eq!(table.define("M".into(), b), DefineOutcome::Unchanged);
        // presence of whitespace differs, not just its width
        assert_eq!(table.define("M".into(), c), DefineOutcome::Replaced);
    }

    #[test]
    fn undef_clears_the_slot() {
        let mut table = MacroTable::new();
        let (name, mac) = parse_define(&toks("X 1"), "t.c", 1).unwrap();
        table.define(name, mac);
        assert!(table.is_defined("X"));
        assert!(table.undef("X"));
        assert!(!table.is_defined("X"));
        assert!(!table.undef("X"));
    }
}

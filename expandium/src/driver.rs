use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

use log::debug;

use crate::config::{
    IncludeContext, IncludeKind, IncludeResolver, IntWidth, OutputMode, PreprocessorConfig,
    ResolvedInclude, WarningHandler,
};
use crate::directive::CondStack;
use crate::error::PreprocessError;
use crate::hideset::HideSet;
use crate::lexer;
use crate::macro_def::{Builtin, Macro, MacroTable, parse_define};
use crate::output::{OutputWriter, dependency_rule};
use crate::source::SourceStack;
use crate::token::Token;

/// One rescan buffer: tokens produced by a substitution, rescanned under
/// the blocker set that was active when the expansion began plus the
/// expanded macro itself.
pub(crate) struct Frame {
    pub(crate) tokens: VecDeque<Token>,
    pub(crate) hide: HideSet,
}

/// A preprocessing session.
///
/// All scan state — macro table, include stack, conditional counters,
/// active rescan frames — lives here and is threaded explicitly through
/// the pipeline; a session is created for a run and dropped afterwards.
pub struct Preprocessor {
    pub(crate) table: MacroTable,
    pub(crate) src: SourceStack,
    pub(crate) cond: CondStack,
    pub(crate) frames: Vec<Frame>,
    /// Tokens peeked past a macro name that turned out not to be an
    /// invocation, waiting to be re-delivered with their blocker sets.
    pub(crate) pending: VecDeque<(Token, HideSet)>,
    /// Nonzero while expanding a detached token list (argument
    /// pre-expansion, `#if` lines): the engine must not pull file text.
    pub(crate) isolated: usize,
    pub(crate) expand_depth: usize,
    pub(crate) counter: u32,
    pub(crate) at_line_start: bool,
    pub(crate) deps: Vec<String>,
    pub(crate) pragma_once: HashSet<String>,

    pub(crate) quote_dirs: Vec<std::path::PathBuf>,
    pub(crate) system_dirs: Vec<std::path::PathBuf>,
    pub(crate) output_mode: OutputMode,
    pub(crate) linemarkers: bool,
    pub(crate) keep_comments: bool,
    pub(crate) warnings_as_errors: bool,
    pub(crate) tolerant: bool,
    pub(crate) int_width: IntWidth,
    pub(crate) recursion_limit: usize,
    pub(crate) include_resolver: Option<IncludeResolver>,
    pub(crate) warning_handler: Option<WarningHandler>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Create a session with default configuration and the builtin
    /// macros installed.
    #[must_use]
    pub fn new() -> Self {
        let mut pp = Preprocessor {
            table: MacroTable::new(),
            src: SourceStack::new(),
            cond: CondStack::default(),
            frames: Vec::new(),
            pending: VecDeque::new(),
            isolated: 0,
            expand_depth: 0,
            counter: 0,
            at_line_start: true,
            deps: Vec::new(),
            pragma_once: HashSet::new(),
            quote_dirs: Vec::new(),
            system_dirs: Vec::new(),
            output_mode: OutputMode::Expanded,
            linemarkers: true,
            keep_comments: false,
            warnings_as_errors: false,
            tolerant: false,
            int_width: IntWidth::Bits64,
            recursion_limit: 128,
            include_resolver: None,
            warning_handler: None,
        };
        pp.install_builtins();
        pp
    }

    /// Create a session with the given configuration applied.
    #[must_use]
    pub fn with_config(config: &PreprocessorConfig) -> Self {
        let mut pp = Self::new();
        pp.apply_config(config);
        pp
    }

    /// Apply configuration: copies the option set and installs the
    /// requested predefines and undefines.
    pub fn apply_config(&mut self, config: &PreprocessorConfig) {
        self.quote_dirs.clone_from(&config.quote_include_dirs);
        self.system_dirs.clone_from(&config.system_include_dirs);
        self.output_mode = config.output;
        self.linemarkers = config.linemarkers;
        self.keep_comments = config.keep_comments;
        self.warnings_as_errors = config.warnings_as_errors;
        self.tolerant = config.tolerant_directives;
        self.int_width = config.int_width;
        self.recursion_limit = config.recursion_limit;
        self.include_resolver.clone_from(&config.include_resolver);
        self.warning_handler.clone_from(&config.warning_handler);

        for def in &config.defines {
            // command-line definition errors are non-fatal; bad text just
            // fails to define, mirroring the diagnostics of a #define
            if let Err(e) = self.define(def) {
                log::warn!("bad predefine '{def}': {e}");
            }
        }
        for name in &config.undefines {
            self.table.undef(name);
        }
    }

    fn install_builtins(&mut self) {
        self.table
            .define("__FILE__".into(), Macro::builtin(Builtin::File));
        self.table
            .define("__LINE__".into(), Macro::builtin(Builtin::Line));
        self.table
            .define("__COUNTER__".into(), Macro::builtin(Builtin::Counter));
        self.table
            .define("__DATE__".into(), Macro::builtin(Builtin::Date));
        self.table
            .define("__TIME__".into(), Macro::builtin(Builtin::Time));
        // ordinary predefines, replaceable like any other definition
        let _ = self.define("__STDC__=1");
        let _ = self.define("__STDC_VERSION__=199901L");
    }

    /// Define a macro from command-line style text: `NAME`, `NAME=value`
    /// or `NAME(params)=body`.
    ///
    /// # Errors
    /// Returns `PreprocessError` when the definition does not parse.
    pub fn define(&mut self, def: &str) -> Result<(), PreprocessError> {
        let text = match def.split_once('=') {
            Some((name, value)) => format!("{name} {value}"),
            None => format!("{def} 1"),
        };
        let tokens = lex_detached(&text)?;
        let (name, mac) = parse_define(&tokens, "<command line>", 0)?;
        self.table.define(name, mac);
        Ok(())
    }

    /// Set the maximum recursion depth for macro expansion.
    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit;
    }

    /// Remove a macro definition.
    pub fn undef(&mut self, name: &str) {
        self.table.undef(name);
    }

    /// Check if a macro is defined.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.table.is_defined(name)
    }

    /// The currently defined macros.
    #[must_use]
    pub fn macros(&self) -> &std::collections::HashMap<String, Macro> {
        self.table.all()
    }

    /// Preprocess `text` presented under the name `name`.
    ///
    /// # Errors
    /// Returns `PreprocessError` on any malformed directive, unterminated
    /// construct or failed include; there is no partial output.
    pub fn process_source(&mut self, name: &str, text: &str) -> Result<String, PreprocessError> {
        self.reset_run_state();
        self.deps.push(name.to_string());
        self.src.push_source(name, text, None, 0)?;
        let mut out = OutputWriter::new(
            self.linemarkers && self.output_mode == OutputMode::Expanded,
            self.output_mode == OutputMode::Dependencies,
        );
        self.run(&mut out)?;
        Ok(match self.output_mode {
            OutputMode::Expanded => out.finish(),
            OutputMode::Dependencies => dependency_rule(name, &self.deps),
        })
    }

    /// Preprocess a file from disk.
    ///
    /// # Errors
    /// As [`Preprocessor::process_source`], plus I/O failure on the input.
    pub fn process_file<P: AsRef<Path>>(&mut self, path: P) -> Result<String, PreprocessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        self.process_source(&path.display().to_string(), &text)
    }

    fn reset_run_state(&mut self) {
        self.src = SourceStack::new();
        self.cond = CondStack::default();
        self.frames.clear();
        self.pending.clear();
        self.isolated = 0;
        self.expand_depth = 0;
        self.counter = 0;
        self.at_line_start = true;
        self.deps.clear();
        self.pragma_once.clear();
    }

    fn run(&mut self, out: &mut OutputWriter) -> Result<(), PreprocessError> {
        let mut need_sync = true;
        while let Some(tok) = self.next_expanded_token()? {
            if tok == Token::Newline {
                out.line_break();
                need_sync = true;
                continue;
            }
            if need_sync {
                out.sync(self.src.current_file(), self.src.current_line());
                need_sync = false;
            }
            out.token(&tok);
        }
        Ok(())
    }

    /// Report a warning; fatal when warnings-as-errors is set.
    pub(crate) fn warn(&mut self, message: String) -> Result<(), PreprocessError> {
        if self.warnings_as_errors {
            return Err(PreprocessError::other(
                self.src.current_file(),
                self.src.current_line(),
                format!("{message} (warnings are errors)"),
            ));
        }
        log::warn!("{message}");
        if let Some(handler) = &self.warning_handler {
            handler(&message);
        }
        Ok(())
    }

    /// Next token and the blocker set it was produced under. Pending
    /// lookahead first, then rescan frames, then (unless isolated) the
    /// file stream, which is where directives are dispatched.
    pub(crate) fn next_pp_token_h(
        &mut self,
    ) -> Result<Option<(Token, HideSet)>, PreprocessError> {
        if let Some(entry) = self.pending.pop_front() {
            return Ok(Some(entry));
        }
        while let Some(frame) = self.frames.last_mut() {
            match frame.tokens.pop_front() {
                Some(tok) => {
                    let hide = frame.hide.clone();
                    return Ok(Some((tok, hide)));
                }
                None => {
                    self.frames.pop();
                }
            }
        }
        if self.isolated > 0 {
            return Ok(None);
        }
        Ok(self.next_file_token()?.map(|t| (t, HideSet::new())))
    }

    /// Pull from the innermost file, dispatching directives at line
    /// starts, skipping false conditional groups, and popping finished
    /// include files.
    fn next_file_token(&mut self) -> Result<Option<Token>, PreprocessError> {
        loop {
            if self.src.is_empty() {
                return Ok(None);
            }
            if self.cond.skipping() {
                self.skip_false_group()?;
                continue;
            }
            match lexer::next_token(&mut self.src, self.keep_comments)? {
                Some(tok) => {
                    if self.at_line_start && tok.is_punct("#") {
                        self.handle_directive_line()?;
                        // a passthrough directive queues its own line; it
                        // must come out before the next file token
                        if let Some((queued, _)) = self.pending.pop_front() {
                            return Ok(Some(queued));
                        }
                        continue;
                    }
                    match &tok {
                        Token::Newline => self.at_line_start = true,
                        Token::Whitespace(_) | Token::Comment(_) => {}
                        _ => self.at_line_start = false,
                    }
                    return Ok(Some(tok));
                }
                None => {
                    self.finish_current_file()?;
                    if self.src.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// End-of-file bookkeeping: conditionals opened in the file must be
    /// closed in it.
    pub(crate) fn finish_current_file(&mut self) -> Result<(), PreprocessError> {
        let file = self.src.current_file().to_string();
        let line = self.src.current_line();
        let entry = self.src.current().map_or(0, |f| f.cond_depth_at_entry);
        if self.cond.depth() != entry {
            return Err(PreprocessError::conditional(
                &file,
                line,
                "missing #endif at end of file",
            ));
        }
        debug!("leaving {file}");
        self.src.pop_file();
        self.at_line_start = true;
        Ok(())
    }
}

/// Lex a detached piece of text (command-line define, paste candidate)
/// into tokens, without newline or EOF tokens.
pub(crate) fn lex_detached(text: &str) -> Result<Vec<Token>, PreprocessError> {
    let mut src = SourceStack::new();
    src.push_source("<command line>", text, None, 0)?;
    let mut out = Vec::new();
    while let Some(t) = lexer::next_token(&mut src, false)? {
        if t == Token::Newline {
            break;
        }
        out.push(t);
    }
    Ok(out)
}

/// Resolve an include against the resolver hook or the directory search.
impl Preprocessor {
    pub(crate) fn resolve_include(
        &mut self,
        path: &str,
        kind: IncludeKind,
        next: bool,
    ) -> Result<(String, String, Option<usize>), PreprocessError> {
        if let Some(hook) = &self.include_resolver {
            let ctx = IncludeContext {
                include_stack: self.src.open_file_names(),
                search_dirs: self
                    .quote_dirs
                    .iter()
                    .chain(self.system_dirs.iter())
                    .cloned()
                    .collect(),
            };
            let hook = Rc::clone(hook);
            return match hook(path, kind, &ctx) {
                Some(ResolvedInclude { path, text }) => Ok((path, text, None)),
                None => Err(PreprocessError::IncludeNotFound {
                    file: self.src.current_file().to_string(),
                    line: self.src.current_line(),
                    path: path.to_string(),
                }),
            };
        }

        // `"..."` includes try the including file's own directory first,
        // unless this is an include_next continuation.
        if kind == IncludeKind::Quote && !next {
            let dir = Path::new(self.src.current_file())
                .parent()
                .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
            let cand = dir.join(path);
            if let Ok(text) = std::fs::read_to_string(&cand) {
                return Ok((cand.display().to_string(), text, None));
            }
        }

        // combined search list; angle includes skip the quote part
        let combined: Vec<&std::path::PathBuf> =
            self.quote_dirs.iter().chain(self.system_dirs.iter()).collect();
        let mut start = if kind == IncludeKind::System {
            self.quote_dirs.len()
        } else {
            0
        };
        if next {
            let after = self
                .src
                .current()
                .and_then(|f| f.search_index)
                .map_or(0, |i| i + 1);
            start = start.max(after);
        }
        for (i, dir) in combined.iter().enumerate().skip(start) {
            let cand = dir.join(path);
            if let Ok(text) = std::fs::read_to_string(&cand) {
                return Ok((cand.display().to_string(), text, Some(i)));
            }
        }
        Err(PreprocessError::IncludeNotFound {
            file: self.src.current_file().to_string(),
            line: self.src.current_line(),
            path: path.to_string(),
        })
    }
}

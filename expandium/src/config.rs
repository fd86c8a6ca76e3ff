use std::path::PathBuf;
use std::rc::Rc;

/// Kind of include directive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "file.h"` — searched relative to the including file first
    Quote,
    /// `#include <file.h>` — searched in the system directories only
    System,
}

/// Context handed to a custom include resolver
#[derive(Clone, Debug, Default)]
pub struct IncludeContext {
    /// Files currently open, outermost first
    pub include_stack: Vec<String>,
    /// The directories the default search would consult, in order
    pub search_dirs: Vec<PathBuf>,
}

/// A resolved include: the name the file will be known as (used in
/// linemarkers, diagnostics and dependency output) and its text.
#[derive(Clone, Debug)]
pub struct ResolvedInclude {
    /// Path or display name of the resolved file
    pub path: String,
    /// Full file contents
    pub text: String,
}

/// Type alias for include resolver hooks. Returning `None` falls back to
/// the error path, not to the default search.
pub type IncludeResolver = Rc<dyn Fn(&str, IncludeKind, &IncludeContext) -> Option<ResolvedInclude>>;

/// Type alias for warning handler hooks
pub type WarningHandler = Rc<dyn Fn(&str)>;

/// What the run produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// The expanded, directive-free token stream
    Expanded,
    /// A Makefile rule naming every file the run opened
    Dependencies,
}

/// Width of `#if` arithmetic. Signedness promotion follows the width, so
/// `(1 << 31) < 0` holds under `Bits32` and not under `Bits64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntWidth {
    /// 32-bit target integers
    Bits32,
    /// 64-bit target integers
    Bits64,
}

/// Configuration for a preprocessing run
pub struct PreprocessorConfig {
    /// Macros to predefine before reading input, as `NAME` (defined to `1`)
    /// or `NAME=value`
    pub defines: Vec<String>,
    /// Macros to undefine after the predefines are installed
    pub undefines: Vec<String>,
    /// Directories searched for `"..."` includes, before the system set
    pub quote_include_dirs: Vec<PathBuf>,
    /// Directories searched for `<...>` includes
    pub system_include_dirs: Vec<PathBuf>,
    /// Output form
    pub output: OutputMode,
    /// Emit `# <line> "<file>"` linemarkers in expanded output
    pub linemarkers: bool,
    /// Copy comments through instead of replacing them with a space
    pub keep_comments: bool,
    /// Promote every warning to a fatal error
    pub warnings_as_errors: bool,
    /// Pass unknown directives through instead of failing (legacy /
    /// assembler input)
    pub tolerant_directives: bool,
    /// Width of `#if` constant arithmetic
    pub int_width: IntWidth,
    /// Maximum macro expansion nesting
    pub recursion_limit: usize,
    /// Custom include resolver, consulted before the directory search
    pub include_resolver: Option<IncludeResolver>,
    /// Optional warning sink; defaults to the `log` facade only
    pub warning_handler: Option<WarningHandler>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PreprocessorConfig {
    /// A configuration with no predefines, linemarkers on, 64-bit `#if`
    /// arithmetic and the default recursion ceiling.
    #[must_use]
    pub fn new() -> Self {
        PreprocessorConfig {
            defines: Vec::new(),
            undefines: Vec::new(),
            quote_include_dirs: Vec::new(),
            system_include_dirs: Vec::new(),
            output: OutputMode::Expanded,
            linemarkers: true,
            keep_comments: false,
            warnings_as_errors: false,
            tolerant_directives: false,
            int_width: IntWidth::Bits64,
            recursion_limit: 128,
            include_resolver: None,
            warning_handler: None,
        }
    }

    /// Predefine a macro, `NAME` or `NAME=value`.
    #[must_use]
    pub fn define<S: Into<String>>(mut self, def: S) -> Self {
        self.defines.push(def.into());
        self
    }

    /// Undefine a macro after predefines are installed.
    #[must_use]
    pub fn undefine<S: Into<String>>(mut self, name: S) -> Self {
        self.undefines.push(name.into());
        self
    }

    /// Append a `"..."`-include search directory.
    #[must_use]
    pub fn quote_include_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.quote_include_dirs.push(dir.into());
        self
    }

    /// Append a `<...>`-include search directory.
    #[must_use]
    pub fn system_include_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.system_include_dirs.push(dir.into());
        self
    }

    /// Select the output form.
    #[must_use]
    pub const fn with_output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// Enable or disable linemarker generation.
    #[must_use]
    pub const fn with_linemarkers(mut self, on: bool) -> Self {
        self.linemarkers = on;
        self
    }

    /// Keep comments in the output.
    #[must_use]
    pub const fn with_comments(mut self, on: bool) -> Self {
        self.keep_comments = on;
        self
    }

    /// Treat warnings as fatal.
    #[must_use]
    pub const fn with_warnings_as_errors(mut self, on: bool) -> Self {
        self.warnings_as_errors = on;
        self
    }

    /// Pass unknown directives through instead of failing.
    #[must_use]
    pub const fn with_tolerant_directives(mut self, on: bool) -> Self {
        self.tolerant_directives = on;
        self
    }

    /// Select the `#if` arithmetic width.
    #[must_use]
    pub const fn with_int_width(mut self, width: IntWidth) -> Self {
        self.int_width = width;
        self
    }

    /// Set a warning handler.
    #[must_use]
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> Self {
        self.warning_handler = Some(handler);
        self
    }

    /// Set a custom include resolver.
    #[must_use]
    pub fn with_include_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, IncludeKind, &IncludeContext) -> Option<ResolvedInclude> + 'static,
    {
        self.include_resolver = Some(Rc::new(f));
        self
    }
}

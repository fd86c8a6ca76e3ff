use std::fmt;

/// Errors that abort a preprocessing run.
///
/// Every variant that originates in source text carries the (file, line)
/// pair that was current when the problem was detected; the pair stays
/// accurate across `#line`, spliced lines and multi-line comments.
#[derive(Debug)]
pub enum PreprocessError {
    /// A directive line that does not parse
    MalformedDirective { file: String, line: u32, detail: String },
    /// Function-like macro invoked with the wrong number of arguments
    MacroArgMismatch { file: String, line: u32, detail: String },
    /// Macro expansion exceeded the configured nesting ceiling
    RecursionLimit { file: String, line: u32, name: String },
    /// Conditional structure error (`#else` after `#else`, stray `#endif`, ...)
    Conditional { file: String, line: u32, detail: String },
    /// An include file that could not be resolved
    IncludeNotFound { file: String, line: u32, path: String },
    /// Include nesting exceeded the fixed ceiling, or a cycle was detected
    IncludeDepth { file: String, line: u32, path: String },
    /// End of file inside a comment
    UnterminatedComment { file: String, line: u32 },
    /// End of line or file inside a string or character literal
    UnterminatedLiteral { file: String, line: u32 },
    /// A `#if` expression that does not evaluate
    Expression { file: String, line: u32, detail: String },
    /// A `#error` directive in live text
    ErrorDirective { file: String, line: u32, message: String },
    /// I/O failure reading a source or include file
    Io(std::io::Error),
    /// Anything else, including warnings promoted to errors
    Other { file: String, line: u32, detail: String },
}

impl PreprocessError {
    pub(crate) fn malformed(file: &str, line: u32, detail: impl Into<String>) -> Self {
        PreprocessError::MalformedDirective {
            file: file.to_string(),
            line,
            detail: detail.into(),
        }
    }

    pub(crate) fn conditional(file: &str, line: u32, detail: impl Into<String>) -> Self {
        PreprocessError::Conditional {
            file: file.to_string(),
            line,
            detail: detail.into(),
        }
    }

    pub(crate) fn expression(file: &str, line: u32, detail: impl Into<String>) -> Self {
        PreprocessError::Expression {
            file: file.to_string(),
            line,
            detail: detail.into(),
        }
    }

    pub(crate) fn other(file: &str, line: u32, detail: impl Into<String>) -> Self {
        PreprocessError::Other {
            file: file.to_string(),
            line,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessError::MalformedDirective { file, line, detail } => {
                write!(f, "{file}:{line}: malformed directive: {detail}")
            }
            PreprocessError::MacroArgMismatch { file, line, detail } => {
                write!(f, "{file}:{line}: macro argument mismatch: {detail}")
            }
            PreprocessError::RecursionLimit { file, line, name } => {
                write!(f, "{file}:{line}: macro expansion too deep expanding '{name}'")
            }
            PreprocessError::Conditional { file, line, detail } => {
                write!(f, "{file}:{line}: {detail}")
            }
            PreprocessError::IncludeNotFound { file, line, path } => {
                write!(f, "{file}:{line}: include not found: {path}")
            }
            PreprocessError::IncludeDepth { file, line, path } => {
                write!(f, "{file}:{line}: include nesting too deep at '{path}'")
            }
            PreprocessError::UnterminatedComment { file, line } => {
                write!(f, "{file}:{line}: unterminated comment")
            }
            PreprocessError::UnterminatedLiteral { file, line } => {
                write!(f, "{file}:{line}: unterminated string or character constant")
            }
            PreprocessError::Expression { file, line, detail } => {
                write!(f, "{file}:{line}: bad #if expression: {detail}")
            }
            PreprocessError::ErrorDirective { file, line, message } => {
                write!(f, "{file}:{line}: #error: {message}")
            }
            PreprocessError::Io(err) => write!(f, "I/O error: {err}"),
            PreprocessError::Other { file, line, detail } => {
                write!(f, "{file}:{line}: {detail}")
            }
        }
    }
}

impl std::error::Error for PreprocessError {}

impl From<std::io::Error> for PreprocessError {
    fn from(err: std::io::Error) -> Self {
        PreprocessError::Io(err)
    }
}

/// A single preprocessing token.
///
/// Control information that the expansion engine needs (parameter slots,
/// stringize/paste markers) never lives in the token text itself; it is
/// carried by [`BodyToken`] in replacement lists.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    /// An identifier. `noexpand` is the "blue paint": once a macro name has
    /// been refused expansion because it was already being expanded, the
    /// identifier is never reconsidered, not even by an enclosing rescan.
    Identifier { name: String, noexpand: bool },
    /// A pp-number (a superset of valid C numeric constants).
    Number(String),
    /// A string literal, including the surrounding quotes.
    StringLiteral(String),
    /// A character constant, including the surrounding quotes.
    CharLiteral(String),
    /// An operator or punctuator, longest-match (`"##"`, `"<<="`, ...).
    Punct(String),
    /// A run of horizontal whitespace.
    Whitespace(String),
    /// End of a logical source line.
    Newline,
    /// A comment, full spelling retained. Only produced when comment
    /// preservation is enabled; otherwise comments become one space.
    Comment(String),
    /// A stray byte that fits no other class; passed through untouched.
    Other(String),
}

impl Token {
    pub(crate) fn id<S: Into<String>>(name: S) -> Self {
        Token::Identifier {
            name: name.into(),
            noexpand: false,
        }
    }

    pub(crate) fn ws() -> Self {
        Token::Whitespace(" ".to_string())
    }

    /// The textual spelling of the token.
    pub(crate) fn spelling(&self) -> &str {
        match self {
            Token::Identifier { name, .. } => name,
            Token::Number(s)
            | Token::StringLiteral(s)
            | Token::CharLiteral(s)
            | Token::Punct(s)
            | Token::Whitespace(s)
            | Token::Comment(s)
            | Token::Other(s) => s,
            Token::Newline => "\n",
        }
    }

    /// Whitespace in the pp-token sense: blanks, comments and newlines all
    /// separate tokens without being tokens a macro can match on.
    pub(crate) fn is_ws(&self) -> bool {
        matches!(
            self,
            Token::Whitespace(_) | Token::Comment(_) | Token::Newline
        )
    }

    pub(crate) fn is_punct(&self, s: &str) -> bool {
        matches!(self, Token::Punct(p) if p == s)
    }

    pub(crate) fn is_ident(&self, s: &str) -> bool {
        matches!(self, Token::Identifier { name, .. } if name == s)
    }
}

/// One element of a macro replacement list.
///
/// `Param(i)` refers to the i-th formal parameter; for a variadic macro the
/// index one past the last named parameter denotes `__VA_ARGS__`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BodyToken {
    /// A literal token copied into the expansion.
    Text(Token),
    /// A parameter reference, substituted with the (usually pre-expanded)
    /// argument.
    Param(usize),
    /// `#` applied to a parameter: the raw argument text becomes a string
    /// literal.
    Stringize(usize),
    /// `##` between the two neighboring elements.
    Paste,
}

impl BodyToken {
    pub(crate) fn is_ws_text(&self) -> bool {
        matches!(self, BodyToken::Text(t) if t.is_ws())
    }
}

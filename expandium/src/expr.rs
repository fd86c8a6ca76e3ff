use crate::config::IntWidth;
use crate::error::PreprocessError;
use crate::macro_def::MacroTable;
use crate::token::Token;

/// An intermediate `#if` value: two's-complement bits, a signedness tag
/// that goes unsigned as soon as either operand does, and a poison flag
/// for division by zero. Poison suppresses the offending operator and is
/// only surfaced as an error if it reaches the final branch decision.
#[derive(Clone, Copy, Debug)]
struct Value {
    num: u64,
    unsigned: bool,
    poison: bool,
}

impl Value {
    fn signed(num: u64) -> Self {
        Value {
            num,
            unsigned: false,
            poison: false,
        }
    }
}

/// Replace `defined NAME` and `defined(NAME)` with `1`/`0` against the
/// macro table. This runs on the raw directive line, before macro
/// expansion, so the operand is never itself expanded.
pub(crate) fn resolve_defined(
    tokens: &[Token],
    table: &MacroTable,
    file: &str,
    line: u32,
) -> Result<Vec<Token>, PreprocessError> {
    let mut out: Vec<Token> = Vec::new();
    let mut it = tokens.iter().peekable();
    while let Some(tok) = it.next() {
        if !tok.is_ident("defined") {
            out.push(tok.clone());
            continue;
        }
        while it.peek().is_some_and(|t| t.is_ws()) {
            it.next();
        }
        let parenthesized = it.peek().is_some_and(|t| t.is_punct("("));
        if parenthesized {
            it.next();
            while it.peek().is_some_and(|t| t.is_ws()) {
                it.next();
            }
        }
        let name = match it.next() {
            Some(Token::Identifier { name, .. }) => name.clone(),
            _ => {
                return Err(PreprocessError::expression(
                    file,
                    line,
                    "'defined' needs an identifier",
                ));
            }
        };
        if parenthesized {
            while it.peek().is_some_and(|t| t.is_ws()) {
                it.next();
            }
            match it.next() {
                Some(t) if t.is_punct(")") => {}
                _ => {
                    return Err(PreprocessError::expression(
                        file,
                        line,
                        "missing ')' after 'defined'",
                    ));
                }
            }
        }
        out.push(Token::Number(
            if table.is_defined(&name) { "1" } else { "0" }.to_string(),
        ));
    }
    Ok(out)
}

/// Evaluate a fully macro-expanded `#if` controlling expression.
pub(crate) fn evaluate(
    tokens: &[Token],
    width: IntWidth,
    file: &str,
    line: u32,
) -> Result<bool, PreprocessError> {
    let toks: Vec<&Token> = tokens.iter().filter(|t| !t.is_ws()).collect();
    if toks.is_empty() {
        return Err(PreprocessError::expression(file, line, "empty expression"));
    }
    let mut p = Parser {
        toks,
        pos: 0,
        width,
        file,
        line,
    };
    let v = p.conditional(true)?;
    if p.pos != p.toks.len() {
        return Err(p.err("trailing tokens after expression"));
    }
    if v.poison {
        return Err(p.err("division by zero"));
    }
    Ok(p.truthy(v))
}

/// Recursive descent over the C conditional-expression ladder.
///
/// `live` is false inside the dead arm of a short-circuited `&&`/`||` or
/// an untaken `?:` branch: those operands are parsed, but arithmetic
/// faults in them neither poison nor error.
struct Parser<'a> {
    toks: Vec<&'a Token>,
    pos: usize,
    width: IntWidth,
    file: &'a str,
    line: u32,
}

impl<'a> Parser<'a> {
    fn err(&self, detail: impl Into<String>) -> PreprocessError {
        PreprocessError::expression(self.file, self.line, detail)
    }

    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos).copied()
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(p)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn bits(&self) -> u32 {
        match self.width {
            IntWidth::Bits32 => 32,
            IntWidth::Bits64 => 64,
        }
    }

    fn mask(&self, v: u64) -> u64 {
        match self.width {
            IntWidth::Bits32 => v & 0xFFFF_FFFF,
            IntWidth::Bits64 => v,
        }
    }

    fn to_signed(&self, v: u64) -> i64 {
        match self.width {
            IntWidth::Bits32 => i64::from(v as u32 as i32),
            IntWidth::Bits64 => v as i64,
        }
    }

    fn truthy(&self, v: Value) -> bool {
        self.mask(v.num) != 0
    }

    fn conditional(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let cond = self.logical_or(live)?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let taken = self.truthy(cond);
        let then = self.conditional(live && taken)?;
        if !self.eat_punct(":") {
            return Err(self.err("missing ':' in conditional"));
        }
        let alt = self.conditional(live && !taken)?;
        let mut chosen = if taken { then } else { alt };
        chosen.unsigned = then.unsigned || alt.unsigned;
        chosen.poison |= cond.poison;
        Ok(chosen)
    }

    fn logical_or(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.logical_and(live)?;
        while self.eat_punct("||") {
            let decided = self.truthy(left);
            let right = self.logical_and(live && !decided)?;
            let result = decided || self.truthy(right);
            let poison = left.poison || (!decided && right.poison);
            left = Value {
                num: u64::from(result),
                unsigned: false,
                poison,
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.bit_or(live)?;
        while self.eat_punct("&&") {
            let decided = !self.truthy(left);
            let right = self.bit_or(live && !decided)?;
            let result = !decided && self.truthy(right);
            let poison = left.poison || (!decided && right.poison);
            left = Value {
                num: u64::from(result),
                unsigned: false,
                poison,
            };
        }
        Ok(left)
    }

    fn bit_or(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.bit_xor(live)?;
        while self.peek().is_some_and(|t| t.is_punct("|")) {
            self.pos += 1;
            let right = self.bit_xor(live)?;
            left = self.combine(left, right, |l, r| l | r);
        }
        Ok(left)
    }

    fn bit_xor(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.bit_and(live)?;
        while self.eat_punct("^") {
            let right = self.bit_and(live)?;
            left = self.combine(left, right, |l, r| l ^ r);
        }
        Ok(left)
    }

    fn bit_and(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.equality(live)?;
        while self.peek().is_some_and(|t| t.is_punct("&")) {
            self.pos += 1;
            let right = self.equality(live)?;
            left = self.combine(left, right, |l, r| l & r);
        }
        Ok(left)
    }

    fn equality(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.relational(live)?;
        loop {
            let eq = if self.eat_punct("==") {
                true
            } else if self.eat_punct("!=") {
                false
            } else {
                break;
            };
            let right = self.relational(live)?;
            let same = self.mask(left.num) == self.mask(right.num);
            left = Value {
                num: u64::from(same == eq),
                unsigned: false,
                poison: left.poison || right.poison,
            };
        }
        Ok(left)
    }

    fn relational(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.shift(live)?;
        loop {
            let op = if self.eat_punct("<=") {
                "<="
            } else if self.eat_punct(">=") {
                ">="
            } else if self.peek().is_some_and(|t| t.is_punct("<")) {
                self.pos += 1;
                "<"
            } else if self.peek().is_some_and(|t| t.is_punct(">")) {
                self.pos += 1;
                ">"
            } else {
                break;
            };
            let right = self.shift(live)?;
            let unsigned = left.unsigned || right.unsigned;
            let (l, r) = (self.mask(left.num), self.mask(right.num));
            let holds = if unsigned {
                match op {
                    "<" => l < r,
                    ">" => l > r,
                    "<=" => l <= r,
                    _ => l >= r,
                }
            } else {
                let (l, r) = (self.to_signed(l), self.to_signed(r));
                match op {
                    "<" => l < r,
                    ">" => l > r,
                    "<=" => l <= r,
                    _ => l >= r,
                }
            };
            left = Value {
                num: u64::from(holds),
                unsigned: false,
                poison: left.poison || right.poison,
            };
        }
        Ok(left)
    }

    fn shift(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.additive(live)?;
        loop {
            let shl = if self.eat_punct("<<") {
                true
            } else if self.eat_punct(">>") {
                false
            } else {
                break;
            };
            let right = self.additive(live)?;
            let count = (self.mask(right.num) % u64::from(self.bits())) as u32;
            // result keeps the left operand's type
            let num = if shl {
                self.mask(left.num.wrapping_shl(count))
            } else if left.unsigned {
                self.mask(left.num) >> count
            } else {
                self.mask((self.to_signed(left.num) >> count) as u64)
            };
            left = Value {
                num,
                unsigned: left.unsigned,
                poison: left.poison || right.poison,
            };
        }
        Ok(left)
    }

    fn additive(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.multiplicative(live)?;
        loop {
            let add = if self.eat_punct("+") {
                true
            } else if self.eat_punct("-") {
                false
            } else {
                break;
            };
            let right = self.multiplicative(live)?;
            left = if add {
                self.combine(left, right, u64::wrapping_add)
            } else {
                self.combine(left, right, u64::wrapping_sub)
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self, live: bool) -> Result<Value, PreprocessError> {
        let mut left = self.unary(live)?;
        loop {
            let op = if self.eat_punct("*") {
                '*'
            } else if self.eat_punct("/") {
                '/'
            } else if self.eat_punct("%") {
                '%'
            } else {
                break;
            };
            let right = self.unary(live)?;
            if op == '*' {
                left = self.combine(left, right, u64::wrapping_mul);
                continue;
            }
            let unsigned = left.unsigned || right.unsigned;
            let mut poison = left.poison || right.poison;
            let num = if self.mask(right.num) == 0 {
                // suppressed: keep the left operand, poison if this side
                // of the expression is actually evaluated
                if live {
                    poison = true;
                }
                left.num
            } else if unsigned {
                let (l, r) = (self.mask(left.num), self.mask(right.num));
                if op == '/' { l / r } else { l % r }
            } else {
                let (l, r) = (self.to_signed(left.num), self.to_signed(right.num));
                let v = if op == '/' {
                    l.wrapping_div(r)
                } else {
                    l.wrapping_rem(r)
                };
                v as u64
            };
            left = Value {
                num: self.mask(num),
                unsigned,
                poison,
            };
        }
        Ok(left)
    }

    fn unary(&mut self, live: bool) -> Result<Value, PreprocessError> {
        if self.eat_punct("!") {
            let v = self.unary(live)?;
            return Ok(Value {
                num: u64::from(!self.truthy(v)),
                unsigned: false,
                poison: v.poison,
            });
        }
        if self.eat_punct("-") {
            let v = self.unary(live)?;
            return Ok(Value {
                num: self.mask(v.num.wrapping_neg()),
                ..v
            });
        }
        if self.eat_punct("+") {
            return self.unary(live);
        }
        if self.eat_punct("~") {
            let v = self.unary(live)?;
            return Ok(Value {
                num: self.mask(!v.num),
                ..v
            });
        }
        self.primary(live)
    }

    fn primary(&mut self, live: bool) -> Result<Value, PreprocessError> {
        match self.peek() {
            Some(Token::Number(text)) => {
                let text = text.clone();
                self.pos += 1;
                self.constant(&text)
            }
            Some(Token::CharLiteral(text)) => {
                let text = text.clone();
                self.pos += 1;
                self.char_constant(&text)
            }
            Some(Token::Identifier { .. }) => {
                // surviving identifiers are not macros; they evaluate to 0
                self.pos += 1;
                Ok(Value::signed(0))
            }
            Some(t) if t.is_punct("(") => {
                self.pos += 1;
                let v = self.conditional(live)?;
                if !self.eat_punct(")") {
                    return Err(self.err("missing ')'"));
                }
                Ok(v)
            }
            Some(t) => Err(self.err(format!("unexpected '{}'", t.spelling()))),
            None => Err(self.err("unexpected end of expression")),
        }
    }

    fn combine(&self, l: Value, r: Value, op: impl Fn(u64, u64) -> u64) -> Value {
        Value {
            num: self.mask(op(l.num, r.num)),
            unsigned: l.unsigned || r.unsigned,
            poison: l.poison || r.poison,
        }
    }

    /// Integer constant: decimal, octal or hex, with `u`/`l` suffixes.
    /// An unsuffixed hex or octal constant whose top bit lands in the
    /// sign position goes unsigned, as in C.
    fn constant(&mut self, text: &str) -> Result<Value, PreprocessError> {
        let lower = text.to_ascii_lowercase();
        let mut digits = lower.as_str();
        let mut unsigned = false;
        while let Some(stripped) = digits.strip_suffix(['u', 'l']) {
            if digits.ends_with('u') {
                unsigned = true;
            }
            digits = stripped;
        }
        let (radix, body, from_prefix) = if let Some(hex) = digits.strip_prefix("0x") {
            (16, hex, true)
        } else if digits.len() > 1 && digits.starts_with('0') {
            (8, &digits[1..], true)
        } else {
            (10, digits, false)
        };
        let num = u64::from_str_radix(body, radix)
            .map_err(|_| self.err(format!("bad integer constant '{text}'")))?;
        if self.mask(num) != num {
            return Err(self.err(format!("integer constant '{text}' out of range")));
        }
        if !unsigned && from_prefix && self.to_signed(num) < 0 {
            unsigned = true;
        }
        Ok(Value {
            num,
            unsigned,
            poison: false,
        })
    }

    /// Character constant value: the first character, with the usual
    /// escapes honored.
    fn char_constant(&mut self, text: &str) -> Result<Value, PreprocessError> {
        let inner = text
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .ok_or_else(|| self.err("bad character constant"))?;
        let mut chars = inner.chars();
        let value = match chars.next() {
            Some('\\') => match chars.next() {
                Some('n') => 10,
                Some('t') => 9,
                Some('r') => 13,
                Some('0'..='7') => {
                    let mut v = 0u32;
                    for c in inner[1..].chars().take(3) {
                        match c.to_digit(8) {
                            Some(d) => v = v * 8 + d,
                            None => break,
                        }
                    }
                    v
                }
                Some('x') => {
                    let mut v = 0u32;
                    for c in inner[2..].chars() {
                        match c.to_digit(16) {
                            Some(d) => v = v.wrapping_mul(16).wrapping_add(d),
                            None => break,
                        }
                    }
                    v
                }
                Some('\\') => 92,
                Some('\'') => 39,
                Some('"') => 34,
                Some(c) => c as u32,
                None => return Err(self.err("bad character constant")),
            },
            Some(c) => c as u32,
            None => return Err(self.err("empty character constant")),
        };
        Ok(Value::signed(u64::from(value)))
    }
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

    fn eval64(text: &str) -> Result<bool, PreprocessError> {
        evaluate(&toks(text), IntWidth::Bits64, "t.c", 1)
    }

    fn eval32(text: &str) -> Result<bool, PreprocessError> {
        evaluate(&toks(text), IntWidth::Bits32, "t.c", 1)
    }

    #[test]
    fn precedence_ladder() {
        assert!(eval64("1 + 2 * 3 == 7").unwrap());
        assert!(eval64("(2 + 3) * 4 == 20").unwrap());
        assert!(eval64("1 << 4 == 16").unwrap());
        assert!(eval64("0xff & 0x0f | 0x30 == 0x3f").unwrap());
        assert!(eval64("7 % 4 == 3 && 7 / 2 == 3").unwrap());
    }

    #[test]
    fn unary_operators() {
        assert!(eval64("!0 && !!1 && -(-5) == 5").unwrap());
        assert!(eval64("~0 == -1").unwrap());
        assert!(eval64("+3 == 3").unwrap());
    }

    #[test]
    fn ternary_selects() {
        assert!(eval64("1 ? 2 : 3") .unwrap());
        assert!(eval64("(0 ? 2 : 3) == 3").unwrap());
    }

    #[test]
    fn short_circuit_suppresses_division_by_zero() {
        assert!(eval64("0 && 1/0").is_ok());
        assert!(eval64("1 || 1/0").unwrap());
        assert!(eval64("1 ? 2 : 1/0").unwrap());
        assert!(eval64("0 ? 1/0 : 2").unwrap());
    }

    #[test]
    fn live_division_by_zero_errors() {
        assert!(eval64("1/0").is_err());
        assert!(eval64("1 % 0 || 1").is_err());
    }

    #[test]
    fn signedness_follows_width() {
        // 1 << 31 lands in the sign bit only on a 32-bit target
        assert!(eval32("(1 << 31) < 0").unwrap());
        assert!(!eval64("(1 << 31) < 0").unwrap());
        assert!(eval64("(1 << 63) < 0").unwrap());
    }

    #[test]
    fn unsigned_propagates() {
        // -1 converts to the maximum value once either side is unsigned
        assert!(eval64("-1 > 0u").unwrap());
        assert!(!eval64("-1 > 0").unwrap());
        assert!(eval32("0xffffffff > 0").unwrap());
    }

    #[test]
    fn octal_hex_and_char_constants() {
        assert!(eval64("010 == 8").unwrap());
        assert!(eval64("0x10 == 16").unwrap());
        assert!(eval64("'A' == 65").unwrap());
        assert!(eval64("'\\n' == 10").unwrap());
        assert!(eval64("'\\0' == 0").unwrap());
    }

    #[test]
    fn unknown_identifiers_are_zero() {
        assert!(!eval64("NOT_DEFINED_ANYWHERE").unwrap());
        assert!(eval64("SOMETHING == 0").unwrap());
    }

    #[test]
    fn resolve_defined_both_forms() {
        let mut table = MacroTable::new();
        let (name, mac) = crate::macro_def::parse_define(&toks("X 1"), "t.c", 1).unwrap();
        table.define(name, mac);
        let resolved = resolve_defined(&toks("defined X && defined(Y)"), &table, "t.c", 1).unwrap();
        let text: String = resolved.iter().map(Token::spelling).collect();
        assert_eq!(text, "1 && 0");
    }

    #[test]
    fn malformed_defined_is_an_error() {
        let table = MacroTable::new();
        assert!(resolve_defined(&toks("defined(X"), &table, "t.c", 1).is_err());
        assert!(resolve_defined(&toks("defined 3"), &table, "t.c", 1).is_err());
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        assert!(eval64("1 2").is_err());
        assert!(eval64("1 +").is_err());
        assert!(eval64("").is_err());
    }
}

//! Trusted literal-structure evaluator for model output.
//!
//! Models are asked for "a Python dictionary" and answer with Python literal
//! syntax: single-quoted strings, `True`/`False`/`None`, tuples, trailing
//! commas, the odd `# comment`. This module decodes exactly that literal
//! subset into `serde_json::Value`. Nothing is ever evaluated: there are no
//! names, calls, operators or attribute lookups, so the worst malformed input
//! can do is fail to parse.
//!
//! Trust boundary: the decoder assumes the model endpoint is local and the
//! output is non-adversarial, only malformed. It bounds nesting depth so
//! pathological output cannot overflow the stack, but it does not try to be
//! a hardened parser for hostile input.
//!
//! Accepted:
//! - dict `{k: v, ...}` → object (non-string keys are rendered to text)
//! - list `[...]`, tuple `(...)`, set `{a, b}` → array
//! - str with `'`, `"`, `'''`, `"""` quotes, `r`/`u`/`b` prefixes, escapes,
//!   and implicit concatenation of adjacent literals
//! - int (decimal, `0x`, `0o`, `0b`, `_` separators), float, unary `+`/`-`
//! - `True`, `False`, `None`
//!
//! Rejected: JSON `true`/`false`/`null`, complex numbers, `inf`/`nan`,
//! any other identifier or expression.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Maximum container nesting depth.
pub const MAX_DEPTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected character {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),

    #[error("invalid number {text:?} at offset {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("{name:?} at offset {offset} is not a literal")]
    NotALiteral { name: String, offset: usize },

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("trailing content at offset {0}")]
    TrailingContent(usize),
}

/// Decode one literal occupying the whole of `text` (surrounding whitespace
/// and comments allowed).
pub fn parse_literal(text: &str) -> Result<Value, LiteralError> {
    let mut parser = LiteralParser { text, pos: 0 };
    parser.skip_trivia();
    let value = parser.parse_value(0)?;
    parser.skip_trivia();
    if parser.pos < text.len() {
        return Err(LiteralError::TrailingContent(parser.pos));
    }
    Ok(value)
}

struct LiteralParser<'a> {
    text: &'a str,
    /// Byte offset into `text`, always on a char boundary.
    pos: usize,
}

impl LiteralParser<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_at(&self, chars_ahead: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(chars_ahead)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn unexpected(&self) -> LiteralError {
        match self.peek() {
            Some(found) => LiteralError::Unexpected {
                found,
                offset: self.pos,
            },
            None => LiteralError::UnexpectedEnd,
        }
    }

    /// Skip whitespace, `#` comments and backslash line continuations.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('\\') if matches!(self.peek_at(1), Some('\n' | '\r')) => {
                    self.bump();
                }
                _ => return,
            }
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), LiteralError> {
        if self.peek() == Some(wanted) {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(LiteralError::TooDeep);
        }
        match self.peek() {
            None => Err(LiteralError::UnexpectedEnd),
            Some('{') => self.parse_brace(depth),
            Some('[') => {
                self.bump();
                Ok(Value::Array(self.parse_sequence(']', depth)?))
            }
            Some('(') => self.parse_paren(depth),
            Some('\'' | '"') => self.parse_strings(),
            Some('-' | '+') => self.parse_signed(),
            Some(c) if c.is_ascii_digit() => self.parse_number(false),
            Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.parse_number(false)
            }
            Some(c) if is_string_prefix_start(c) && self.string_prefix_len().is_some() => {
                self.parse_strings()
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_name(),
            Some(_) => Err(self.unexpected()),
        }
    }

    /// `{}` is an empty dict, `{k: v}` a dict, `{a, b}` a set.
    fn parse_brace(&mut self, depth: usize) -> Result<Value, LiteralError> {
        self.expect('{')?;
        self.skip_trivia();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Value::Object(Map::new()));
        }

        let first = self.parse_value(depth + 1)?;
        self.skip_trivia();
        if self.peek() != Some(':') {
            let mut items = vec![first];
            if self.peek() == Some(',') {
                self.bump();
                items.extend(self.parse_sequence('}', depth)?);
            } else {
                self.expect('}')?;
            }
            return Ok(Value::Array(items));
        }

        let mut map = Map::new();
        let mut key = first;
        loop {
            self.expect(':')?;
            self.skip_trivia();
            let value = self.parse_value(depth + 1)?;
            map.insert(key_to_string(key), value);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    self.skip_trivia();
                    if self.peek() == Some('}') {
                        self.bump();
                        return Ok(Value::Object(map));
                    }
                    key = self.parse_value(depth + 1)?;
                    self.skip_trivia();
                }
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(map));
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    /// `()` is an empty tuple, `(x)` is `x`, `(x,)` and `(x, y)` are tuples.
    fn parse_paren(&mut self, depth: usize) -> Result<Value, LiteralError> {
        self.expect('(')?;
        self.skip_trivia();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.parse_value(depth + 1)?;
        self.skip_trivia();
        match self.peek() {
            Some(')') => {
                self.bump();
                Ok(first)
            }
            Some(',') => {
                self.bump();
                let mut items = vec![first];
                items.extend(self.parse_sequence(')', depth)?);
                Ok(Value::Array(items))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Comma-separated values up to `close`, trailing comma allowed. The
    /// opening bracket has already been consumed.
    fn parse_sequence(&mut self, close: char, depth: usize) -> Result<Vec<Value>, LiteralError> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.parse_value(depth + 1)?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_name(&mut self) -> Result<Value, LiteralError> {
        let offset = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        match &self.text[offset..self.pos] {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            name => Err(LiteralError::NotALiteral {
                name: name.to_string(),
                offset,
            }),
        }
    }

    fn parse_signed(&mut self) -> Result<Value, LiteralError> {
        let negative = self.bump() == Some('-');
        self.skip_trivia();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(negative),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_number(&mut self, negative: bool) -> Result<Value, LiteralError> {
        let offset = self.pos;
        let mut prev = '\0';
        while let Some(c) = self.peek() {
            let so_far = &self.text[offset..self.pos];
            let is_hex = so_far.starts_with("0x") || so_far.starts_with("0X");
            let exponent_sign = matches!(c, '+' | '-') && matches!(prev, 'e' | 'E') && !is_hex;
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                prev = c;
                self.bump();
            } else {
                break;
            }
        }
        let raw = &self.text[offset..self.pos];
        let invalid = || LiteralError::InvalidNumber {
            text: raw.to_string(),
            offset,
        };

        if raw.starts_with('_') || raw.ends_with('_') || raw.contains("__") {
            return Err(invalid());
        }
        let digits: String = raw.chars().filter(|&c| c != '_').collect();
        let lower = digits.to_ascii_lowercase();

        let radix = match lower.get(..2) {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            let magnitude = i64::from_str_radix(&lower[2..], radix).map_err(|_| invalid())?;
            return Ok(Value::from(if negative { -magnitude } else { magnitude }));
        }

        if lower.ends_with('j') {
            return Err(LiteralError::NotALiteral {
                name: raw.to_string(),
                offset,
            });
        }

        let is_float = lower.contains(['.', 'e']);
        if !is_float {
            if lower.len() > 1 && lower.starts_with('0') && lower.chars().any(|c| c != '0') {
                return Err(invalid());
            }
            let signed = if negative { format!("-{lower}") } else { lower.clone() };
            if let Ok(n) = signed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            if let Ok(n) = signed.parse::<u64>() {
                return Ok(Value::from(n));
            }
        }

        let magnitude: f64 = lower.parse().map_err(|_| invalid())?;
        let n = if negative { -magnitude } else { magnitude };
        Number::from_f64(n).map(Value::Number).ok_or_else(invalid)
    }

    /// Length in bytes of a valid string prefix (`r`, `u`, `b`, `rb`, `br`)
    /// immediately followed by a quote.
    fn string_prefix_len(&self) -> Option<usize> {
        let rest = self.rest();
        let prefix_len = rest
            .char_indices()
            .find(|&(_, c)| !is_string_prefix_start(c))
            .map(|(i, _)| i)?;
        let prefix = rest[..prefix_len].to_ascii_lowercase();
        let quote_follows = rest[prefix_len..].starts_with(['\'', '"']);
        let valid = matches!(prefix.as_str(), "" | "r" | "u" | "b" | "rb" | "br");
        (quote_follows && valid).then_some(prefix_len)
    }

    /// One or more adjacent string literals, concatenated.
    fn parse_strings(&mut self) -> Result<Value, LiteralError> {
        let mut out = self.parse_string()?;
        loop {
            let checkpoint = self.pos;
            self.skip_trivia();
            let more = match self.peek() {
                Some('\'' | '"') => true,
                Some(c) if is_string_prefix_start(c) => self.string_prefix_len().is_some(),
                _ => false,
            };
            if !more {
                self.pos = checkpoint;
                return Ok(Value::String(out));
            }
            out.push_str(&self.parse_string()?);
        }
    }

    fn parse_string(&mut self) -> Result<String, LiteralError> {
        let start = self.pos;
        let prefix_len = self.string_prefix_len().ok_or_else(|| self.unexpected())?;
        let raw = self.text[self.pos..self.pos + prefix_len]
            .to_ascii_lowercase()
            .contains('r');
        self.pos += prefix_len;

        let quote = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
        let triple = self.rest().starts_with([quote]) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let c = self.bump().ok_or(LiteralError::UnterminatedString(start))?;
            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    return Ok(out);
                }
                out.push(c);
                continue;
            }
            match c {
                '\n' if !triple => return Err(LiteralError::UnterminatedString(start)),
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.parse_escape(&mut out)?,
                _ => out.push(c),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
        let offset = self.pos - 1;
        let c = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
        match c {
            '\n' => {}
            '\r' => {
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0C}'),
            'v' => out.push('\u{0B}'),
            'x' => out.push(self.parse_hex_escape(2, offset)?),
            'u' => out.push(self.parse_hex_escape(4, offset)?),
            'U' => out.push(self.parse_hex_escape(8, offset)?),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.bump();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or(LiteralError::InvalidEscape(offset))?);
            }
            // Unknown escapes keep their backslash, as Python does.
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn parse_hex_escape(&mut self, len: usize, offset: usize) -> Result<char, LiteralError> {
        let mut code = 0u32;
        for _ in 0..len {
            let digit = self
                .bump()
                .and_then(|d| d.to_digit(16))
                .ok_or(LiteralError::InvalidEscape(offset))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or(LiteralError::InvalidEscape(offset))
    }
}

fn is_string_prefix_start(c: char) -> bool {
    matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B')
}

/// Dict keys become column names, so non-string keys are rendered the way
/// Python would print them.
fn key_to_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

//! Parser for the literal subset the request middleware writes: dicts, lists, tuples,
//! quoted strings, numbers, `True`/`False`/`None`, and `<...>` object reprs.
//!
//! Nothing here evaluates input. Object reprs are handed to [`super::repr`] and come back as
//! plain strings or `null`.

use serde_json::{Map, Number, Value};

use super::repr;
use crate::error::ParseError;

const MAX_DEPTH: usize = 32;

/// Parses `src` as a single literal mapping followed only by whitespace.
pub(crate) fn parse_mapping(src: &str) -> Result<Map<String, Value>, ParseError> {
    let mut parser = LiteralParser::new(src);
    parser.skip_ws();
    let map = parser.parse_dict(0)?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing characters after mapping"));
    }
    Ok(map)
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(ch) if ch == want => {
                self.pos += ch.len_utf8();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected `{want}`, found `{ch}`"))),
            None => Err(self.error(format!("expected `{want}`, found end of input"))),
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, ParseError> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nests too deeply"));
        }
        match self.peek() {
            Some('{') => self.parse_dict(depth).map(Value::Object),
            Some('[') => self.parse_sequence('[', ']', depth),
            Some('(') => self.parse_sequence('(', ')', depth),
            Some('\'') | Some('"') => self.parse_string().map(Value::String),
            Some('<') => self.parse_repr(),
            Some(ch) if ch == '-' || ch == '+' || ch.is_ascii_digit() => self.parse_number(),
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.parse_word(),
            Some(ch) => Err(self.error(format!("unexpected character `{ch}`"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_dict(&mut self, depth: usize) -> Result<Map<String, Value>, ParseError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(map);
            }
            let key = match self.parse_value(depth + 1)? {
                Value::String(key) => key,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => python_bool(b).to_string(),
                Value::Null => "None".to_string(),
                _ => return Err(self.error("mapping keys must be scalars")),
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.parse_value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(map),
                Some(ch) => {
                    self.pos -= ch.len_utf8();
                    return Err(self.error(format!("expected `,` or `}}`, found `{ch}`")));
                }
                None => return Err(self.error("unbalanced braces: mapping is not closed")),
            }
        }
    }

    fn parse_sequence(&mut self, open: char, close: char, depth: usize) -> Result<Value, ParseError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.parse_value(depth + 1)?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(ch) if ch == close => return Ok(Value::Array(items)),
                Some(ch) => {
                    self.pos -= ch.len_utf8();
                    return Err(self.error(format!("expected `,` or `{close}`, found `{ch}`")));
                }
                None => return Err(self.error(format!("unbalanced `{open}`: sequence is not closed"))),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated string"));
                }
                Some(ch) if ch == quote => return Ok(out),
                Some('\\') => self.parse_escape(&mut out)?,
                Some(ch) => out.push(ch),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        match self.bump() {
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('x') => out.push(self.parse_code_point(2)?),
            Some('u') => out.push(self.parse_code_point(4)?),
            Some('U') => out.push(self.parse_code_point(8)?),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(self.error("unterminated escape sequence")),
        }
        Ok(())
    }

    fn parse_code_point(&mut self, digits: usize) -> Result<char, ParseError> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid escape sequence"))?;
        let ch = char::from_u32(code).ok_or_else(|| self.error("escape is not a valid character"))?;
        self.pos = end;
        Ok(ch)
    }

    fn parse_number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '+' | '_') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        if let Ok(n) = text.parse::<u64>() {
            return Ok(Value::Number(n.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                self.pos = start;
                self.error(format!("invalid number `{text}`"))
            })
    }

    fn parse_word(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];
        match word {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            // String prefixes: b'..', u'..', r'..' carry no meaning once decoded.
            "b" | "u" | "r" | "br" | "rb" if matches!(self.peek(), Some('\'') | Some('"')) => {
                self.parse_string().map(Value::String)
            }
            _ => {
                self.pos = start;
                Err(self.error(format!("unsupported bare word `{word}`")))
            }
        }
    }

    fn parse_repr(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(ch) = self.bump() {
            match ch {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(repr::normalize_repr(&self.src[start..self.pos]));
                    }
                }
                _ => {}
            }
        }
        self.pos = start;
        Err(self.error("unterminated object repr"))
    }
}

pub(crate) fn python_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

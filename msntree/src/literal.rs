//! A small reader and writer for the literal text used to carry list and mapping
//! valued attributes through GML, which only permits scalar attributes.
//!
//! The accepted grammar covers what tree producers emit, such as `[1, 2]`,
//! `('a', 'b')`, `{'k': {'mass': 1.0}}`, `None` and `True`, plus the JSON spellings
//! `null`, `true` and `false`.
use std::fmt::{self, Display, Write};
use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

/// A parsed literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiteralError {
    #[error("Unexpected end of literal text")]
    UnexpectedEnd,
    #[error("Unexpected character {1:?} at offset {0}")]
    UnexpectedChar(usize, char),
    #[error("Malformed number {0:?}")]
    MalformedNumber(String),
    #[error("Unknown escape sequence \\{0}")]
    UnknownEscape(char),
    #[error("Trailing text after literal at offset {0}")]
    TrailingText(usize),
}

impl Literal {
    pub fn parse(text: &str) -> Result<Self, LiteralError> {
        let mut parser = LiteralParser::new(text);
        let value = parser.parse_value()?;
        parser.skip_whitespace();
        match parser.chars.peek() {
            Some((offset, _)) => Err(LiteralError::TrailingText(*offset)),
            None => Ok(value),
        }
    }
}

struct LiteralParser<'a> {
    text: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.char_indices().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some((_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn peek_char(&mut self) -> Result<(usize, char), LiteralError> {
        self.skip_whitespace();
        self.chars.peek().copied().ok_or(LiteralError::UnexpectedEnd)
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        match self.peek_char()? {
            (_, c) if c == expected => {
                self.chars.next();
                Ok(())
            }
            (i, c) => Err(LiteralError::UnexpectedChar(i, c)),
        }
    }

    fn parse_value(&mut self) -> Result<Literal, LiteralError> {
        let (offset, c) = self.peek_char()?;
        match c {
            '[' => self.parse_sequence('[', ']'),
            '(' => self.parse_sequence('(', ')'),
            '{' => self.parse_dict(),
            '\'' | '"' => self.parse_string().map(Literal::Str),
            '-' | '+' | '.' | '0'..='9' => self.parse_number(),
            c if c.is_alphabetic() => self.parse_word(),
            c => Err(LiteralError::UnexpectedChar(offset, c)),
        }
    }

    fn parse_sequence(&mut self, open: char, close: char) -> Result<Literal, LiteralError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            if self.peek_char()?.1 == close {
                self.chars.next();
                break;
            }
            items.push(self.parse_value()?);
            match self.peek_char()? {
                (_, ',') => {
                    self.chars.next();
                }
                (_, c) if c == close => {
                    self.chars.next();
                    break;
                }
                (i, c) => return Err(LiteralError::UnexpectedChar(i, c)),
            }
        }
        Ok(Literal::List(items))
    }

    fn parse_dict(&mut self) -> Result<Literal, LiteralError> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            if self.peek_char()?.1 == '}' {
                self.chars.next();
                break;
            }
            let key = self.parse_value()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            match self.peek_char()? {
                (_, ',') => {
                    self.chars.next();
                }
                (_, '}') => {
                    self.chars.next();
                    break;
                }
                (i, c) => return Err(LiteralError::UnexpectedChar(i, c)),
            }
        }
        Ok(Literal::Dict(entries))
    }

    fn parse_string(&mut self) -> Result<String, LiteralError> {
        let (_, quote) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
        let mut buffer = String::new();
        loop {
            let (_, c) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
            match c {
                '\\' => {
                    let (_, e) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
                    match e {
                        '\\' | '\'' | '"' => buffer.push(e),
                        'n' => buffer.push('\n'),
                        't' => buffer.push('\t'),
                        'r' => buffer.push('\r'),
                        'x' => buffer.push(self.parse_hex_escape(2)?),
                        'u' => buffer.push(self.parse_hex_escape(4)?),
                        e => return Err(LiteralError::UnknownEscape(e)),
                    }
                }
                c if c == quote => break,
                c => buffer.push(c),
            }
        }
        Ok(buffer)
    }

    fn parse_hex_escape(&mut self, width: usize) -> Result<char, LiteralError> {
        let mut code = String::with_capacity(width);
        for _ in 0..width {
            let (_, c) = self.chars.next().ok_or(LiteralError::UnexpectedEnd)?;
            code.push(c);
        }
        u32::from_str_radix(&code, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or(LiteralError::UnknownEscape('x'))
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> &'a str {
        let start = match self.chars.peek() {
            Some((i, _)) => *i,
            None => return "",
        };
        let mut end = self.text.len();
        while let Some((i, c)) = self.chars.peek() {
            if predicate(*c) {
                self.chars.next();
            } else {
                end = *i;
                break;
            }
        }
        &self.text[start..end]
    }

    fn parse_number(&mut self) -> Result<Literal, LiteralError> {
        let token =
            self.take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
        if token == "-" || token == "+" {
            return match self.parse_word()? {
                Literal::Float(x) if token == "-" => Ok(Literal::Float(-x)),
                Literal::Float(x) => Ok(Literal::Float(x)),
                _ => Err(LiteralError::MalformedNumber(token.to_string())),
            };
        }
        let is_float = token.contains(['.', 'e', 'E']);
        if is_float {
            token
                .parse::<f64>()
                .map(Literal::Float)
                .map_err(|_| LiteralError::MalformedNumber(token.to_string()))
        } else {
            token
                .parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| LiteralError::MalformedNumber(token.to_string()))
        }
    }

    fn parse_word(&mut self) -> Result<Literal, LiteralError> {
        let offset = self.chars.peek().map(|(i, _)| *i).unwrap_or_default();
        let word = self.take_while(|c| c.is_alphanumeric() || c == '_');
        match word {
            "None" | "null" => Ok(Literal::None),
            "True" | "true" => Ok(Literal::Bool(true)),
            "False" | "false" => Ok(Literal::Bool(false)),
            "nan" | "NaN" => Ok(Literal::Float(f64::NAN)),
            "inf" | "Infinity" => Ok(Literal::Float(f64::INFINITY)),
            _ => Err(LiteralError::UnexpectedChar(
                offset,
                word.chars().next().unwrap_or(' '),
            )),
        }
    }
}

/// Write a float so that it reads back as a float, never as an integer.
pub(crate) fn write_float<W: Write>(f: &mut W, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("nan")
    } else if value.is_infinite() {
        if value > 0.0 {
            f.write_str("inf")
        } else {
            f.write_str("-inf")
        }
    } else {
        write!(f, "{value:?}")
    }
}

fn write_quoted<W: Write>(f: &mut W, value: &str) -> fmt::Result {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    f.write_char(quote)?;
    for c in value.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write_float(f, *x),
            Literal::Str(s) => write_quoted(f, s),
            Literal::List(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            Literal::Dict(entries) => {
                f.write_char('{')?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_char('}')
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_literals() -> Result<(), LiteralError> {
        assert_eq!(Literal::parse("None")?, Literal::None);
        assert_eq!(
            Literal::parse("[1, 2, 3]")?,
            Literal::List(vec![Literal::Int(1), Literal::Int(2), Literal::Int(3)])
        );
        assert_eq!(
            Literal::parse("(0.5, -1e-3,)")?,
            Literal::List(vec![Literal::Float(0.5), Literal::Float(-1e-3)])
        );
        let parsed = Literal::parse(
            "{'C6H12O6': {'mass': 180.0634, 'adduct': \"[M+H]+\", 'mf': 'C6H12O6'}}",
        )?;
        match parsed {
            Literal::Dict(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].0, Literal::Str("C6H12O6".to_string()));
            }
            other => panic!("Expected a dict, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_string_escapes() -> Result<(), LiteralError> {
        let value = Literal::Str("it's a \"quote\"\n".to_string());
        let text = value.to_string();
        assert_eq!(text, "'it\\'s a \"quote\"\\n'");
        assert_eq!(Literal::parse(&text)?, value);
        assert_eq!(Literal::Str("it's".into()).to_string(), "\"it's\"");
        Ok(())
    }

    #[test]
    fn test_float_keeps_decimal_point() {
        assert_eq!(Literal::Float(1.0).to_string(), "1.0");
        assert_eq!(Literal::List(vec![Literal::Float(2.5), Literal::Int(3)]).to_string(), "[2.5, 3]");
    }

    #[test]
    fn test_errors() {
        assert_eq!(Literal::parse("[1, 2"), Err(LiteralError::UnexpectedEnd));
        assert!(matches!(
            Literal::parse("[1] x"),
            Err(LiteralError::TrailingText(4))
        ));
        assert!(matches!(
            Literal::parse("{'a' 1}"),
            Err(LiteralError::UnexpectedChar(5, '1'))
        ));
        assert!(Literal::parse("definitely").is_err());
    }
}

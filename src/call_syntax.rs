//! Parser for the textual call form found in transcripts and ground truth,
//! e.g. `mkdir(dir_name='temp')` or `mean(numbers=[1, 2.5, 3])`.
//!
//! Only literal arguments are accepted: strings (single, double or triple
//! quoted), integers, floats, `True`/`False`/`None`, lists, tuples and dicts.
//! A dotted prefix (`fs.cd(...)`) is allowed and the last segment names the
//! function.

use serde_json::{Map, Number, Value};

use crate::functions::FunctionCall;
use crate::RunnerError;

pub fn parse_call(source: &str) -> Result<FunctionCall, RunnerError> {
    let mut parser = CallParser::new(source);
    parser.skip_whitespace();
    let name = parser.dotted_identifier()?;
    parser.skip_whitespace();
    parser.expect('(')?;

    let mut arguments = Map::new();
    let mut positional = Vec::new();

    loop {
        parser.skip_whitespace();
        if parser.eat(')') {
            break;
        }

        let checkpoint = parser.pos;
        let keyword = match parser.identifier() {
            Some(ident) => {
                parser.skip_whitespace();
                if parser.peek() == Some('=') && parser.peek_at(1) != Some('=') {
                    parser.pos += 1;
                    Some(ident)
                } else {
                    parser.pos = checkpoint;
                    None
                }
            }
            None => None,
        };

        parser.skip_whitespace();
        let value = parser.value()?;

        match keyword {
            Some(keyword) => {
                if arguments.insert(keyword.clone(), value).is_some() {
                    return Err(parser.error(&format!("keyword argument repeated: {keyword}")));
                }
            }
            None if !arguments.is_empty() => {
                return Err(parser.error("positional argument follows keyword argument"));
            }
            None => positional.push(value),
        }

        parser.skip_whitespace();
        if parser.eat(',') {
            continue;
        }
        parser.expect(')')?;
        break;
    }

    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }

    Ok(FunctionCall {
        name,
        arguments,
        positional,
    })
}

struct CallParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> CallParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> RunnerError {
        RunnerError::CallSyntax(format!(
            "{message} at position {} in `{}`",
            self.pos, self.source
        ))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), RunnerError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn dotted_identifier(&mut self) -> Result<String, RunnerError> {
        let mut name = self
            .identifier()
            .ok_or_else(|| self.error("expected function name"))?;
        while self.eat('.') {
            name = self
                .identifier()
                .ok_or_else(|| self.error("expected identifier after '.'"))?;
        }
        Ok(name)
    }

    fn value(&mut self) -> Result<Value, RunnerError> {
        match self.peek() {
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some('[') => {
                self.pos += 1;
                self.sequence(']').map(Value::Array)
            }
            Some('(') => {
                self.pos += 1;
                self.sequence(')').map(Value::Array)
            }
            Some('{') => {
                self.pos += 1;
                self.dict()
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let checkpoint = self.pos;
                let ident = self.identifier().unwrap_or_default();
                match ident.as_str() {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::Null),
                    _ => {
                        self.pos = checkpoint;
                        Err(self.error(&format!("unsupported expression `{ident}`")))
                    }
                }
            }
            Some(c) => Err(self.error(&format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Value>, RunnerError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_whitespace();
            if self.eat(',') {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn dict(&mut self) -> Result<Value, RunnerError> {
        let mut map = Map::new();
        loop {
            self.skip_whitespace();
            if self.eat('}') {
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(key) => key,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => (if flag { "True" } else { "False" }).to_string(),
                _ => return Err(self.error("unsupported dict key")),
            };
            self.skip_whitespace();
            self.expect(':')?;
            self.skip_whitespace();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_whitespace();
            if self.eat(',') {
                continue;
            }
            self.expect('}')?;
            return Ok(Value::Object(map));
        }
    }

    fn string(&mut self) -> Result<String, RunnerError> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.error("unterminated string literal"))?;
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            self.pos += 1;
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self
                .peek()
                .ok_or_else(|| self.error("unterminated escape sequence"))?;
            self.pos += 1;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(escaped),
                '\n' => {}
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn number(&mut self) -> Result<Value, RunnerError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '-' || c == '+')
                && matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e') | Some('E'));
            if c.is_ascii_digit() || c == '.' || c == '_' || c == 'e' || c == 'E' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let is_float = text.contains(['.', 'e', 'E']);

        if !is_float {
            if let Ok(integer) = text.parse::<i64>() {
                return Ok(Value::Number(integer.into()));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error(&format!("invalid number literal `{text}`")))
    }
}

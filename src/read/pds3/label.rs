//! Parsing of PDS3 labels, written in the Object Description Language (ODL).

use std::{fmt, iter::Peekable, str::Chars};

use itertools::Itertools;
use regex::Regex;
use thiserror::Error;

lazy_static::lazy_static! {
    static ref RADIX_INTEGER: Regex = Regex::new(r"^([+-]?)(\d+)#([0-9A-Fa-f]+)#$").unwrap();
}

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("Label line {line}: unterminated {what}")]
    Unterminated { line: usize, what: &'static str },

    #[error("Label line {line}: expected {expected}, found {found}")]
    Unexpected {
        line: usize,
        expected: &'static str,
        found: String,
    },

    #[error("Label line {line}: {found} doesn't close {expected}")]
    MismatchedEnd {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("Label line {line}: bad radix integer '{value}'")]
    BadRadixInteger { line: usize, value: String },

    #[error("The label has no END statement")]
    MissingEnd,
}

/// The value on the right-hand side of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer { value: i64, unit: Option<String> },
    Real { value: f64, unit: Option<String> },
    /// A double-quoted string.
    Text(String),
    /// A single-quoted string.
    Symbol(String),
    /// Anything else, e.g. `MSB_INTEGER` or `2004-01-01T00:00:00.000`.
    Identifier(String),
    Sequence(Vec<Value>),
    Set(Vec<Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer { value, .. } => Some(*value as f64),
            Value::Real { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The contents of any of the string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Symbol(s) | Value::Identifier(s) => Some(s),
            _ => None,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            Value::Integer { unit, .. } | Value::Real { unit, .. } => unit.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer { value, unit } => {
                write!(f, "{value}")?;
                if let Some(unit) = unit {
                    write!(f, " <{unit}>")?;
                }
                Ok(())
            }
            Value::Real { value, unit } => {
                write!(f, "{value}")?;
                if let Some(unit) = unit {
                    write!(f, " <{unit}>")?;
                }
                Ok(())
            }
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Symbol(s) => write!(f, "'{s}'"),
            Value::Identifier(s) => write!(f, "{s}"),
            Value::Sequence(v) => write!(f, "({})", v.iter().join(", ")),
            Value::Set(v) => write!(f, "{{{}}}", v.iter().join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The label itself.
    Root,
    Object,
    Group,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub key: String,
    pub value: Value,
    pub line: usize,
}

/// An `OBJECT` or `GROUP` block, or the whole label.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub kind: BlockKind,
    pub name: String,
    pub statements: Vec<Statement>,
    pub children: Vec<Object>,
}

impl Object {
    fn new(kind: BlockKind, name: String) -> Object {
        Object {
            kind,
            name,
            statements: vec![],
            children: vec![],
        }
    }

    /// Keywords are case insensitive.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.statements
            .iter()
            .find(|s| s.key.eq_ignore_ascii_case(key))
            .map(|s| &s.value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// The `OBJECT` blocks directly inside this one.
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.children
            .iter()
            .filter(|c| c.kind == BlockKind::Object)
    }

    /// The first `OBJECT` directly inside this one with the given name.
    pub fn find_object(&self, name: &str) -> Option<&Object> {
        self.objects().find(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// Every `^NAME` pointer statement, without the caret.
    pub fn pointers(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.statements
            .iter()
            .filter_map(|s| s.key.strip_prefix('^').map(|name| (name, &s.value)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Symbol(String),
    Unit(String),
    Equals,
    Comma,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "'{w}'"),
            Token::Quoted(s) => write!(f, "string \"{s}\""),
            Token::Symbol(s) => write!(f, "symbol '{s}'"),
            Token::Unit(u) => write!(f, "unit <{u}>"),
            Token::Equals => write!(f, "'='"),
            Token::Comma => write!(f, "','"),
            Token::OpenParen => write!(f, "'('"),
            Token::CloseParen => write!(f, "')'"),
            Token::OpenBrace => write!(f, "'{{'"),
            Token::CloseBrace => write!(f, "'}}'"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '=' | ',' | '(' | ')' | '{' | '}' | '<' | '>' | '"' | '\'')
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Lexer<'a> {
        Lexer {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    /// Consume characters up to and including `end`, returning what came
    /// before it.
    fn until(&mut self, end: char, what: &'static str) -> Result<String, LabelError> {
        let start_line = self.line;
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == end => return Ok(s),
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    s.push(c);
                }
                None => {
                    return Err(LabelError::Unterminated {
                        line: start_line,
                        what,
                    })
                }
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), LabelError> {
        let start_line = self.line;
        let mut prev = '\0';
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.line += 1;
            }
            if prev == '*' && c == '/' {
                return Ok(());
            }
            prev = c;
        }
        Err(LabelError::Unterminated {
            line: start_line,
            what: "comment",
        })
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize)>, LabelError> {
        loop {
            let c = match self.chars.next() {
                Some(c) => c,
                None => return Ok(None),
            };
            let line = self.line;
            let token = match c {
                '\n' => {
                    self.line += 1;
                    continue;
                }
                c if c.is_whitespace() => continue,
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    self.skip_comment()?;
                    continue;
                }
                '=' => Token::Equals,
                ',' => Token::Comma,
                '(' => Token::OpenParen,
                ')' => Token::CloseParen,
                '{' => Token::OpenBrace,
                '}' => Token::CloseBrace,
                '"' => Token::Quoted(self.until('"', "string")?),
                '\'' => Token::Symbol(self.until('\'', "symbol")?),
                '<' => Token::Unit(self.until('>', "unit")?.trim().to_string()),
                c => {
                    let mut word = String::from(c);
                    while let Some(&c) = self.chars.peek() {
                        if !is_word_char(c) {
                            break;
                        }
                        word.push(c);
                        self.chars.next();
                    }
                    Token::Word(word)
                }
            };
            return Ok(Some((token, line)));
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<(Token, usize)>,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Result<Option<(Token, usize)>, LabelError> {
        match self.peeked.take() {
            Some(t) => Ok(Some(t)),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, LabelError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref().map(|(t, _)| t))
    }

    /// The next token, where running out of label is an error.
    fn expect_token(&mut self, expected: &'static str) -> Result<(Token, usize), LabelError> {
        match self.next()? {
            Some(t) => Ok(t),
            None => Err(LabelError::Unexpected {
                line: self.lexer.line,
                expected,
                found: "the end of the label".to_string(),
            }),
        }
    }

    fn expect_equals(&mut self) -> Result<(), LabelError> {
        match self.expect_token("'='")? {
            (Token::Equals, _) => Ok(()),
            (other, line) => Err(LabelError::Unexpected {
                line,
                expected: "'='",
                found: other.to_string(),
            }),
        }
    }

    /// A block name, as written after `OBJECT =` or `END_OBJECT =`.
    fn block_name(&mut self) -> Result<String, LabelError> {
        match self.expect_token("a name")? {
            (Token::Word(w), _) | (Token::Quoted(w), _) | (Token::Symbol(w), _) => Ok(w),
            (other, line) => Err(LabelError::Unexpected {
                line,
                expected: "a name",
                found: other.to_string(),
            }),
        }
    }

    fn block(&mut self, kind: BlockKind, name: String) -> Result<Object, LabelError> {
        let mut object = Object::new(kind, name);
        loop {
            let (token, line) = match self.next()? {
                Some(t) => t,
                None if kind == BlockKind::Root => return Err(LabelError::MissingEnd),
                None => {
                    return Err(LabelError::Unterminated {
                        line: self.lexer.line,
                        what: "OBJECT or GROUP block",
                    })
                }
            };
            let key = match token {
                Token::Word(w) => w,
                other => {
                    return Err(LabelError::Unexpected {
                        line,
                        expected: "a keyword",
                        found: other.to_string(),
                    })
                }
            };

            match key.to_ascii_uppercase().as_str() {
                "END" => {
                    if kind == BlockKind::Root {
                        return Ok(object);
                    }
                    return Err(LabelError::MismatchedEnd {
                        line,
                        expected: object.name,
                        found: key,
                    });
                }

                "OBJECT" | "GROUP" => {
                    self.expect_equals()?;
                    let name = self.block_name()?;
                    let child_kind = if key.eq_ignore_ascii_case("OBJECT") {
                        BlockKind::Object
                    } else {
                        BlockKind::Group
                    };
                    let child = self.block(child_kind, name)?;
                    object.children.push(child);
                }

                end @ ("END_OBJECT" | "END_GROUP") => {
                    let matches_kind = matches!(
                        (kind, end),
                        (BlockKind::Object, "END_OBJECT") | (BlockKind::Group, "END_GROUP")
                    );
                    if !matches_kind {
                        return Err(LabelError::MismatchedEnd {
                            line,
                            expected: object.name,
                            found: key,
                        });
                    }
                    // The name after END_OBJECT is optional.
                    if self.peek()? == Some(&Token::Equals) {
                        self.next()?;
                        let name = self.block_name()?;
                        if !name.eq_ignore_ascii_case(&object.name) {
                            return Err(LabelError::MismatchedEnd {
                                line,
                                expected: object.name,
                                found: format!("{key} = {name}"),
                            });
                        }
                    }
                    return Ok(object);
                }

                _ => {
                    self.expect_equals()?;
                    let value = self.value()?;
                    object.statements.push(Statement { key, value, line });
                }
            }
        }
    }

    fn value(&mut self) -> Result<Value, LabelError> {
        let (token, line) = self.expect_token("a value")?;
        match token {
            Token::Quoted(s) => Ok(Value::Text(s)),
            Token::Symbol(s) => Ok(Value::Symbol(s)),
            Token::OpenParen => Ok(Value::Sequence(self.list(Token::CloseParen)?)),
            Token::OpenBrace => Ok(Value::Set(self.list(Token::CloseBrace)?)),
            Token::Word(w) => {
                let value = scalar(&w, line)?;
                let has_unit = matches!(self.peek()?, Some(Token::Unit(_)));
                if has_unit {
                    if let Some((Token::Unit(u), _)) = self.next()? {
                        return Ok(match value {
                            Value::Integer { value, .. } => Value::Integer {
                                value,
                                unit: Some(u),
                            },
                            Value::Real { value, .. } => Value::Real {
                                value,
                                unit: Some(u),
                            },
                            // Units only mean something on numbers.
                            other => other,
                        });
                    }
                }
                Ok(value)
            }
            other => Err(LabelError::Unexpected {
                line,
                expected: "a value",
                found: other.to_string(),
            }),
        }
    }

    /// The comma-separated values of a sequence or set, up to `close`.
    fn list(&mut self, close: Token) -> Result<Vec<Value>, LabelError> {
        let mut values = vec![];
        if self.peek()? == Some(&close) {
            self.next()?;
            return Ok(values);
        }
        loop {
            values.push(self.value()?);
            match self.expect_token("',' or a closing bracket")? {
                (Token::Comma, _) => continue,
                (t, _) if t == close => return Ok(values),
                (other, line) => {
                    return Err(LabelError::Unexpected {
                        line,
                        expected: "',' or a closing bracket",
                        found: other.to_string(),
                    })
                }
            }
        }
    }
}

/// Interpret a bare word as a number if it looks like one.
fn scalar(word: &str, line: usize) -> Result<Value, LabelError> {
    if let Some(caps) = RADIX_INTEGER.captures(word) {
        let bad = || LabelError::BadRadixInteger {
            line,
            value: word.to_string(),
        };
        let radix: u32 = caps[2].parse().map_err(|_| bad())?;
        if !(2..=16).contains(&radix) {
            return Err(bad());
        }
        let magnitude = i64::from_str_radix(&caps[3], radix).map_err(|_| bad())?;
        let value = if &caps[1] == "-" {
            -magnitude
        } else {
            magnitude
        };
        return Ok(Value::Integer { value, unit: None });
    }
    if let Ok(value) = word.parse::<i64>() {
        return Ok(Value::Integer { value, unit: None });
    }
    // Guard against "NaN" and "inf", which Rust would otherwise parse.
    let numeric_start = word
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        .unwrap_or(false);
    if numeric_start {
        if let Ok(value) = word.parse::<f64>() {
            return Ok(Value::Real { value, unit: None });
        }
    }
    Ok(Value::Identifier(word.to_string()))
}

/// Parse the text of a label, up to its `END` statement.
pub fn parse(text: &str) -> Result<Object, LabelError> {
    let mut parser = Parser {
        lexer: Lexer::new(text),
        peeked: None,
    };
    parser.block(BlockKind::Root, "ROOT".to_string())
}

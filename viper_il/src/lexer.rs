//! Lexer for textual IL

use thiserror::Error;
use viper_common::SrcLoc;

/// Tokens of the textual IL format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    /// Bare identifier: keywords, mnemonics (dots allowed), type names
    Ident(String),
    /// `@name` — function, extern or global reference
    AtName(String),
    /// `%name` — SSA temp
    Percent(String),
    /// `^label` — block reference
    Caret(String),
    /// Integer literal text, optionally signed
    Int(String),
    /// Float literal text (fraction, exponent, `inf`, `nan`)
    Float(String),
    /// Three-component dotted version number
    Version(String),
    /// Decoded string literal
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Assign,
    Arrow,
    Bang,
    Eof,
}

impl Tok {
    /// Short description for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("'{}'", s),
            Tok::AtName(s) => format!("'@{}'", s),
            Tok::Percent(s) => format!("'%{}'", s),
            Tok::Caret(s) => format!("'^{}'", s),
            Tok::Int(s) | Tok::Float(s) | Tok::Version(s) => format!("'{}'", s),
            Tok::Str(_) => "string literal".to_string(),
            Tok::LParen => "'('".to_string(),
            Tok::RParen => "')'".to_string(),
            Tok::LBrace => "'{'".to_string(),
            Tok::RBrace => "'}'".to_string(),
            Tok::LBracket => "'['".to_string(),
            Tok::RBracket => "']'".to_string(),
            Tok::Colon => "':'".to_string(),
            Tok::Comma => "','".to_string(),
            Tok::Assign => "'='".to_string(),
            Tok::Arrow => "'->'".to_string(),
            Tok::Bang => "'!'".to_string(),
            Tok::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {position}")]
pub struct LexError {
    pub message: String,
    pub position: SrcLoc,
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer {
    input: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self { input: input.chars().collect(), index: 0, line: 1, column: 1 }
    }

    /// Tokenize the whole input, positions attached
    pub fn tokenize(input: &str) -> LexResult<Vec<(Tok, SrcLoc)>> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let (tok, pos) = lexer.next_token()?;
            let done = tok == Tok::Eof;
            tokens.push((tok, pos));
            if done {
                return Ok(tokens);
            }
        }
    }

    fn loc(&self) -> SrcLoc {
        SrcLoc::new(self.line, self.column)
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.index).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.index + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.index += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                while let Some(c) = self.current() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    pub fn next_token(&mut self) -> LexResult<(Tok, SrcLoc)> {
        self.skip_whitespace_and_comments();
        let start = self.loc();

        let ch = match self.current() {
            None => return Ok((Tok::Eof, start)),
            Some(ch) => ch,
        };

        let tok = match ch {
            '(' => {
                self.advance();
                Tok::LParen
            }
            ')' => {
                self.advance();
                Tok::RParen
            }
            '{' => {
                self.advance();
                Tok::LBrace
            }
            '}' => {
                self.advance();
                Tok::RBrace
            }
            '[' => {
                self.advance();
                Tok::LBracket
            }
            ']' => {
                self.advance();
                Tok::RBracket
            }
            ':' => {
                self.advance();
                Tok::Colon
            }
            ',' => {
                self.advance();
                Tok::Comma
            }
            '=' => {
                self.advance();
                Tok::Assign
            }
            '!' => {
                self.advance();
                Tok::Bang
            }
            '@' => {
                self.advance();
                Tok::AtName(self.read_name(start, "extern/function name")?)
            }
            '%' => {
                self.advance();
                Tok::Percent(self.read_name(start, "temp name")?)
            }
            '^' => {
                self.advance();
                Tok::Caret(self.read_name(start, "block label")?)
            }
            '"' => self.read_string(start)?,
            '-' => {
                self.advance();
                match self.current() {
                    Some('>') => {
                        self.advance();
                        Tok::Arrow
                    }
                    Some(c) if c.is_ascii_digit() => self.read_number(start, true)?,
                    Some(c) if c.is_ascii_alphabetic() => {
                        // -inf / -nan
                        let word = self.read_ident_text();
                        if word == "inf" || word == "nan" {
                            Tok::Float(format!("-{}", word))
                        } else {
                            return Err(LexError {
                                message: format!("unexpected '-{}'", word),
                                position: start,
                            });
                        }
                    }
                    _ => {
                        return Err(LexError {
                            message: "unexpected character: '-'".to_string(),
                            position: start,
                        })
                    }
                }
            }
            c if c.is_ascii_digit() => self.read_number(start, false)?,
            c if is_ident_start(c) => Tok::Ident(self.read_ident_text()),
            c => {
                return Err(LexError {
                    message: format!("unexpected character: '{}'", c),
                    position: start,
                })
            }
        };
        Ok((tok, start))
    }

    fn read_name(&mut self, start: SrcLoc, what: &str) -> LexResult<String> {
        match self.current() {
            Some(c) if is_ident_start(c) => Ok(self.read_ident_text()),
            _ => Err(LexError { message: format!("expected {}", what), position: start }),
        }
    }

    fn read_ident_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // A trailing dot belongs to the surrounding syntax, not the name
        while text.ends_with('.') {
            text.pop();
            self.index -= 1;
            self.column -= 1;
        }
        text
    }

    fn read_number(&mut self, start: SrcLoc, negative: bool) -> LexResult<Tok> {
        let mut text = String::new();
        if negative {
            text.push('-');
        }
        self.read_digits(&mut text);

        let mut dots = 0;
        while self.current() == Some('.') && self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            dots += 1;
            if dots > 2 {
                return Err(LexError { message: "malformed number".to_string(), position: start });
            }
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }

        if dots == 2 {
            if negative {
                return Err(LexError { message: "malformed version".to_string(), position: start });
            }
            return Ok(Tok::Version(text));
        }

        let mut is_float = dots == 1;
        if matches!(self.current(), Some('e') | Some('E')) {
            is_float = true;
            text.push('e');
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                text.push(self.advance().unwrap());
            }
            if !matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                return Err(LexError { message: "malformed exponent".to_string(), position: start });
            }
            self.read_digits(&mut text);
        }

        Ok(if is_float { Tok::Float(text) } else { Tok::Int(text) })
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, start: SrcLoc) -> LexResult<Tok> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(LexError {
                        message: "unterminated string literal".to_string(),
                        position: start,
                    })
                }
                Some('"') => return Ok(Tok::Str(value)),
                Some('\\') => {
                    let escaped = self.advance().ok_or_else(|| LexError {
                        message: "unterminated escape".to_string(),
                        position: start,
                    })?;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        'u' => {
                            if self.advance() != Some('{') {
                                return Err(LexError {
                                    message: "expected '{' in unicode escape".to_string(),
                                    position: start,
                                });
                            }
                            let mut hex = String::new();
                            loop {
                                match self.advance() {
                                    Some('}') => break,
                                    Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                                    _ => {
                                        return Err(LexError {
                                            message: "malformed unicode escape".to_string(),
                                            position: start,
                                        })
                                    }
                                }
                            }
                            let code = u32::from_str_radix(&hex, 16).map_err(|_| LexError {
                                message: "malformed unicode escape".to_string(),
                                position: start,
                            })?;
                            value.push(char::from_u32(code).ok_or_else(|| LexError {
                                message: format!("invalid code point \\u{{{}}}", hex),
                                position: start,
                            })?);
                        }
                        c => {
                            return Err(LexError {
                                message: format!("unknown escape: '\\{}'", c),
                                position: start,
                            })
                        }
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

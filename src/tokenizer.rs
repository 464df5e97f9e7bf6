use log::debug;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,

    Comma,
    Dot,
    Semicolon,

    Plus,
    Minus,
    Star,
    Slash,

    Bang,
    Equal,
    Greater,
    Less,

    BangEqual,
    EqualEqual,
    GreaterEqual,
    LessEqual,
    PlusPlus,
    MinusMinus,

    Identifier,
    String,
    Number,

    And,
    Or,
    If,
    Else,
    True,
    False,
    Nil,
    For,
    While,
    Fun,
    Var,
    Print,
    Return,

    Eof,
}

/// Decoded literal payload for `String` and `Number` tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
}

/// Immutable lexical unit. Built once by the scanner, consumed by the
/// parser, and carried into the syntax tree for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: String, literal: Option<Literal>, line: usize) -> Self {
        Self {
            kind,
            lexeme,
            literal,
            line,
        }
    }
}

/// Scans `source` into a token stream terminated by an `Eof` token.
///
/// Lexical errors never abort the scan: each one is recorded and
/// scanning resumes at the next character, so a single pass reports
/// every bad character in the input.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Error>) {
    debug!("scanning {} bytes", source.len());

    let mut scanner = Scanner::new(source);
    while !scanner.at_end() {
        scanner.start = scanner.current;
        scanner.scan_token();
    }
    scanner.tokens.push(Token::new(
        TokenKind::Eof,
        String::new(),
        None,
        scanner.line,
    ));

    (scanner.tokens, scanner.errors)
}

struct Scanner {
    chars: Vec<char>,
    start: usize,
    current: usize,
    line: usize,
    tokens: Vec<Token>,
    errors: Vec<Error>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            line: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn scan_token(&mut self) {
        let ch = self.advance();
        match ch {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            ',' => self.add_token(TokenKind::Comma),
            '.' => self.add_token(TokenKind::Dot),
            ';' => self.add_token(TokenKind::Semicolon),
            '*' => self.add_token(TokenKind::Star),
            '/' => self.add_token(TokenKind::Slash),
            '+' => {
                let kind = if self.matches('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.matches('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '!' => {
                let kind = if self.matches('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.matches('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.matches('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.matches('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '"' => self.string(),
            ' ' | '\t' | '\r' => (),
            '\n' => self.line += 1,
            _ => {
                if ch.is_ascii_digit() {
                    self.number();
                } else if ch.is_alphabetic() || ch == '_' {
                    self.identifier();
                } else {
                    self.error("unknown character");
                }
            }
        }
    }

    fn string(&mut self) {
        while !self.at_end() && self.peek() != '"' {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.current += 1;
        }

        if self.at_end() {
            // The partial lexeme spans from the opening quote to the
            // end of input.
            self.error("unclosed string");
            return;
        }

        self.current += 1; // closing quote
        let value: String = self.chars[self.start + 1..self.current - 1].iter().collect();
        self.add_literal(TokenKind::String, Some(Literal::String(value)));
    }

    fn number(&mut self) {
        while !self.at_end() && self.peek().is_ascii_digit() {
            self.current += 1;
        }

        // A '.' not followed by a digit ends the number unconsumed.
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.current += 1;
            while !self.at_end() && self.peek().is_ascii_digit() {
                self.current += 1;
            }
        }

        let lexeme = self.lexeme();
        match lexeme.parse::<f64>() {
            Ok(value) => self.add_literal(TokenKind::Number, Some(Literal::Number(value))),
            Err(_) => self.error("malformed number"),
        }
    }

    fn identifier(&mut self) {
        while !self.at_end() && (self.peek().is_alphanumeric() || self.peek() == '_') {
            self.current += 1;
        }

        let kind = match self.lexeme().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "fun" => TokenKind::Fun,
            "var" => TokenKind::Var,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            _ => TokenKind::Identifier,
        };
        self.add_token(kind);
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.current];
        self.current += 1;
        ch
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.at_end() || self.chars[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn peek(&self) -> char {
        if self.at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 < self.chars.len() {
            self.chars[self.current + 1]
        } else {
            '\0'
        }
    }

    fn at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn lexeme(&self) -> String {
        self.chars[self.start..self.current].iter().collect()
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.add_literal(kind, None);
    }

    fn add_literal(&mut self, kind: TokenKind, literal: Option<Literal>) {
        let lexeme = self.lexeme();
        self.tokens.push(Token::new(kind, lexeme, literal, self.line));
    }

    fn error(&mut self, message: &str) {
        self.errors.push(Error::Lexical {
            line: self.line,
            lexeme: self.lexeme(),
            message: message.to_string(),
        });
    }
}

use std::rc::Rc;

use crate::{
    error::{Error, Result},
    tokenizer::{Literal, Token, TokenKind},
};

/// Decoded literal carried by a `Literal` expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Nil,
}

/// Expression nodes. Operators are kept as full tokens so every
/// runtime error can report the offending line and lexeme.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LiteralValue),
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Grouping(Box<Expr>),
    Variable(Token),
    Assign {
        name: Token,
        value: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Prefix {
        operator: Token,
        name: Token,
    },
    Postfix {
        name: Token,
        operator: Token,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        paren: Token,
    },
}

/// A function declaration, shared between the `Function` statement
/// and any closure values created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),
    Print(Expr),
    Var {
        name: Token,
        initializer: Option<Expr>,
    },
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Function(Rc<FunctionDecl>),
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
}

/// Parses a full program into a statement sequence.
///
/// Recovery is per declaration: a parse error is recorded, the parser
/// resynchronizes at the next statement boundary, and parsing
/// continues, so one pass reports as many errors as possible.
pub fn parse(tokens: &[Token]) -> (Vec<Stmt>, Vec<Error>) {
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();

    while !parser.at_end() {
        if let Some(stmt) = parser.declaration() {
            statements.push(stmt);
        }
    }

    (statements, parser.errors)
}

/// Parses a sequence of bare expressions, each followed by a required
/// `;` terminator. Used by the REPL.
pub fn parse_expressions(tokens: &[Token]) -> (Vec<Expr>, Vec<Error>) {
    let mut parser = Parser::new(tokens);
    let mut expressions = Vec::new();

    while !parser.at_end() {
        match parser.expression_unit() {
            Ok(expr) => expressions.push(expr),
            Err(err) => {
                parser.errors.push(err);
                parser.synchronize();
            }
        }
    }

    (expressions, parser.errors)
}

struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    errors: Vec<Error>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        assert!(
            tokens.last().is_some_and(|t| t.kind == TokenKind::Eof),
            "token stream must be terminated by Eof"
        );
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.matches(&[TokenKind::Var]) {
            self.var_declaration()
        } else if self.matches(&[TokenKind::Fun]) {
            self.function_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(err) => {
                self.errors.push(err);
                self.synchronize();
                None
            }
        }
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let name = self.consume(TokenKind::Identifier, "variable name expected")?;
        let initializer = if self.matches(&[TokenKind::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expected ';' after var declaration")?;
        Ok(Stmt::Var { name, initializer })
    }

    fn function_declaration(&mut self) -> Result<Stmt> {
        let name = self.consume(TokenKind::Identifier, "function name expected")?;
        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                params.push(self.consume(TokenKind::Identifier, "parameter name expected")?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;

        self.consume(TokenKind::LeftBrace, "Expected '{' before function body")?;
        let body = self.block_statements()?;

        Ok(Stmt::Function(Rc::new(FunctionDecl { name, params, body })))
    }

    fn statement(&mut self) -> Result<Stmt> {
        if self.matches(&[TokenKind::If]) {
            return self.if_statement();
        }
        if self.matches(&[TokenKind::While]) {
            return self.while_statement();
        }
        if self.matches(&[TokenKind::For]) {
            return self.for_statement();
        }
        if self.matches(&[TokenKind::Return]) {
            return self.return_statement();
        }
        if self.matches(&[TokenKind::Print]) {
            return self.print_statement();
        }
        if self.matches(&[TokenKind::LeftBrace]) {
            return Ok(Stmt::Block(self.block_statements()?));
        }
        self.expression_statement()
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expected ')' after condition")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(&[TokenKind::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expected ')' after while condition")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    /// Desugars `for` into a `while` at parse time: the initializer
    /// moves into an enclosing block, the increment is appended to
    /// the loop body, and an omitted condition defaults to `true`.
    fn for_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'for'")?;

        let initializer = if self.matches(&[TokenKind::Semicolon]) {
            None
        } else if self.matches(&[TokenKind::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(TokenKind::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expected ';' after loop condition")?;

        let increment = if !self.check(TokenKind::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::RightParen, "Expected ')' after 'for' clauses")?;

        let mut body = self.statement()?;
        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
        }

        let condition = condition.unwrap_or(Expr::Literal(LiteralValue::Boolean(true)));
        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }

        Ok(body)
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let keyword = self.previous().clone();
        let value = if !self.check(TokenKind::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expected ';' after return value")?;

        Ok(Stmt::Return { keyword, value })
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after print value")?;
        Ok(Stmt::Print(expr))
    }

    fn block_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.at_end() && !self.check(TokenKind::RightBrace) {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after expression")?;
        Ok(Stmt::Expression(expr))
    }

    fn expression_unit(&mut self) -> Result<Expr> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expected ';' after expression")?;
        Ok(expr)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr> {
        let expr = self.logic_or()?;

        if self.matches(&[TokenKind::Equal]) {
            let equals = self.previous().clone();
            let value = self.assignment()?;

            return match expr {
                Expr::Variable(name) => Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                }),
                _ => Err(self.error_at(&equals, "Invalid assignment target")),
            };
        }

        Ok(expr)
    }

    fn logic_or(&mut self) -> Result<Expr> {
        let mut expr = self.logic_and()?;

        while self.matches(&[TokenKind::Or]) {
            let operator = self.previous().clone();
            let right = self.logic_and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn logic_and(&mut self) -> Result<Expr> {
        let mut expr = self.equality()?;

        while self.matches(&[TokenKind::And]) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut expr = self.comparison()?;

        while self.matches(&[TokenKind::EqualEqual, TokenKind::BangEqual]) {
            let operator = self.previous().clone();
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;

        while self.matches(&[
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
        ]) {
            let operator = self.previous().clone();
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;

        while self.matches(&[TokenKind::Plus, TokenKind::Minus]) {
            let operator = self.previous().clone();
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        while self.matches(&[TokenKind::Star, TokenKind::Slash]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.matches(&[TokenKind::Bang, TokenKind::Minus, TokenKind::Plus]) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }
        self.prefix()
    }

    fn prefix(&mut self) -> Result<Expr> {
        if self.matches(&[TokenKind::PlusPlus, TokenKind::MinusMinus]) {
            let operator = self.previous().clone();
            let operand = self.postfix()?;
            return match operand {
                Expr::Variable(name) => Ok(Expr::Prefix { operator, name }),
                _ => Err(self.error_at(&operator, "'++'/'--' operand must be a variable")),
            };
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let expr = self.call()?;

        if self.matches(&[TokenKind::PlusPlus, TokenKind::MinusMinus]) {
            let operator = self.previous().clone();
            return match expr {
                Expr::Variable(name) => Ok(Expr::Postfix { name, operator }),
                _ => Err(self.error_at(&operator, "'++'/'--' operand must be a variable")),
            };
        }

        Ok(expr)
    }

    fn call(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        while self.matches(&[TokenKind::LeftParen]) {
            expr = self.finish_call(expr)?;
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut arguments = Vec::new();

        if !self.check(TokenKind::RightParen) {
            loop {
                if arguments.len() == 255 {
                    // Recorded, not raised: the argument list keeps
                    // being parsed past the cap.
                    let err = self.error_at(self.peek(), "Cannot have more than 255 arguments");
                    self.errors.push(err);
                }
                arguments.push(self.expression()?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }

        let paren = self.consume(TokenKind::RightParen, "Expected ')' after arguments")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            arguments,
            paren,
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.matches(&[TokenKind::True]) {
            return Ok(Expr::Literal(LiteralValue::Boolean(true)));
        }
        if self.matches(&[TokenKind::False]) {
            return Ok(Expr::Literal(LiteralValue::Boolean(false)));
        }
        if self.matches(&[TokenKind::Nil]) {
            return Ok(Expr::Literal(LiteralValue::Nil));
        }
        if self.matches(&[TokenKind::Number]) {
            return match &self.previous().literal {
                Some(Literal::Number(n)) => Ok(Expr::Literal(LiteralValue::Number(*n))),
                _ => Err(self.error_at(self.previous(), "number token without a value")),
            };
        }
        if self.matches(&[TokenKind::String]) {
            return match &self.previous().literal {
                Some(Literal::String(s)) => Ok(Expr::Literal(LiteralValue::String(s.clone()))),
                _ => Err(self.error_at(self.previous(), "string token without a value")),
            };
        }
        if self.matches(&[TokenKind::LeftParen]) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "Expected ')' after expression")?;
            return Ok(Expr::Grouping(Box::new(expr)));
        }
        if self.matches(&[TokenKind::Identifier]) {
            return Ok(Expr::Variable(self.previous().clone()));
        }

        Err(self.error_at(self.peek(), "Expected expression"))
    }

    /// Panic-mode recovery: discard tokens until past the next `;` or
    /// just before a statement-starting keyword.
    fn synchronize(&mut self) {
        self.advance();

        while !self.at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek().kind {
                TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token> {
        if self.check(kind) {
            return Ok(self.advance().clone());
        }
        Err(self.error_at(self.peek(), message))
    }

    fn matches(&mut self, kinds: &[TokenKind]) -> bool {
        for &kind in kinds {
            if self.check(kind) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn error_at(&self, token: &Token, message: &str) -> Error {
        let lexeme = if token.kind == TokenKind::Eof {
            "end".to_string()
        } else {
            token.lexeme.clone()
        };
        Error::Parse {
            line: token.line,
            lexeme,
            message: message.to_string(),
        }
    }
}

use log::debug;
use std::{
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    io::{self, Write},
    mem,
    rc::Rc,
};

use crate::{
    environment::Environment,
    error::{Error, Result},
    parser::{Expr, FunctionDecl, LiteralValue, Stmt},
    tokenizer::{Token, TokenKind},
};

#[derive(Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Function(Function),
    Nil,
}

/// A closure value: the shared declaration node plus the environment
/// frame that was active when the declaration executed.
#[derive(Clone)]
pub struct Function {
    pub decl: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.decl, &b.decl),
            (Value::Nil, Value::Nil) => true,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Number(n) => {
                // Drop the trailing ".0" only where the i64 cast is
                // exact; beyond 2^53 the float form is already the
                // honest one.
                if n.fract() == 0.0 && n.abs() < 9.007199254740992e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Function(func) => write!(f, "<fn {}>", func.decl.name.lexeme),
            Value::Nil => write!(f, "nil"),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Value::String(s) = self {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// Outcome of executing a statement. `Return` is the control-flow
/// unwind produced by a `return` statement; it propagates outward
/// until the nearest function-call boundary consumes it. It is never
/// an error.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
}

/// Tree-walking evaluator. Generic over the output sink so tests can
/// run programs against an in-memory buffer.
pub struct Interpreter<W: Write> {
    env: Rc<RefCell<Environment>>,
    out: W,
}

impl Interpreter<io::Stdout> {
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for Interpreter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Interpreter<W> {
    pub fn with_output(out: W) -> Self {
        Self {
            env: Environment::new(),
            out,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Executes each top-level statement in sequence, collecting
    /// runtime errors. See [`Self::interpret_with`].
    pub fn interpret(&mut self, statements: &[Stmt]) -> Vec<Error> {
        let mut errors = Vec::new();
        self.interpret_with(statements, |err| errors.push(err));
        errors
    }

    /// Executes each top-level statement in sequence. A runtime error
    /// is handed to `report` as the failing statement finishes, so
    /// diagnostics stay next to the output that preceded them, and
    /// execution continues with the next statement. A return signal
    /// reaching this loop stops the run.
    pub fn interpret_with<F>(&mut self, statements: &[Stmt], mut report: F)
    where
        F: FnMut(Error),
    {
        debug!("interpreting {} statements", statements.len());

        for stmt in statements {
            match self.execute(stmt) {
                Ok(Flow::Normal) => (),
                Ok(Flow::Return(_)) => break,
                Err(err) => report(err),
            }
        }
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.out, "{}", value)?;
                Ok(Flow::Normal)
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                self.env.borrow_mut().define(name, value)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(statements) => {
                let frame = Environment::with_enclosing(self.env.clone());
                self.execute_block(statements, frame)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                while is_truthy(&self.evaluate(condition)?) {
                    match self.execute(body)? {
                        Flow::Normal => (),
                        ret => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(decl) => {
                let function = Value::Function(Function {
                    decl: decl.clone(),
                    closure: self.env.clone(),
                });
                self.env.borrow_mut().define(&decl.name, function)?;
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    /// Runs `statements` with `frame` as the current environment,
    /// restoring the previous frame on every exit path: normal
    /// completion, a propagating return signal, or an error.
    fn execute_block(
        &mut self,
        statements: &[Stmt],
        frame: Rc<RefCell<Environment>>,
    ) -> Result<Flow> {
        let previous = mem::replace(&mut self.env, frame);
        let result = self.run_sequence(statements);
        self.env = previous;
        result
    }

    fn run_sequence(&mut self, statements: &[Stmt]) -> Result<Flow> {
        for stmt in statements {
            match self.execute(stmt)? {
                Flow::Normal => (),
                ret => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::String(s) => Value::String(s.clone()),
                LiteralValue::Boolean(b) => Value::Boolean(*b),
                LiteralValue::Nil => Value::Nil,
            }),
            Expr::Grouping(inner) => self.evaluate(inner),
            Expr::Variable(name) => Ok(self.env.borrow().get(&name.lexeme)),
            Expr::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.env.borrow_mut().assign(name, value.clone())?;
                Ok(value)
            }
            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),
            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right),
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                // Short-circuit: the result is the deciding operand
                // itself, not a boolean.
                match operator.kind {
                    TokenKind::Or if is_truthy(&left) => Ok(left),
                    TokenKind::And if !is_truthy(&left) => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expr::Prefix { operator, name } => {
                let (_, updated) = self.step_variable(name, operator)?;
                Ok(Value::Number(updated))
            }
            Expr::Postfix { name, operator } => {
                let (prior, _) = self.step_variable(name, operator)?;
                Ok(Value::Number(prior))
            }
            Expr::Call {
                callee,
                arguments,
                paren,
            } => self.evaluate_call(callee, arguments, paren),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value> {
        let value = self.evaluate(right)?;
        match operator.kind {
            TokenKind::Bang => Ok(Value::Boolean(!is_truthy(&value))),
            TokenKind::Minus => match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(runtime_error(operator, "Operand must be a number")),
            },
            TokenKind::Plus => match value {
                Value::Number(n) => Ok(Value::Number(n)),
                _ => Err(runtime_error(operator, "Operand must be a number")),
            },
            _ => unreachable!("parser only builds unary nodes for '!', '-', '+'"),
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value> {
        let left_val = self.evaluate(left)?;
        let right_val = self.evaluate(right)?;

        match operator.kind {
            TokenKind::Plus => match (&left_val, &right_val) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                // A string on the left concatenates the string forms
                // of both operands; nothing else mixes.
                (Value::String(a), _) => Ok(Value::String(format!("{}{}", a, right_val))),
                _ => Err(runtime_error(
                    operator,
                    "Operands must be numbers, or the left operand a string",
                )),
            },
            TokenKind::Minus => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Number(a - b))
            }
            TokenKind::Star => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Number(a * b))
            }
            TokenKind::Slash => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Number(a / b))
            }
            TokenKind::Greater => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Boolean(a > b))
            }
            TokenKind::GreaterEqual => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Boolean(a >= b))
            }
            TokenKind::Less => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Boolean(a < b))
            }
            TokenKind::LessEqual => {
                numeric_op(operator, &left_val, &right_val, |a, b| Value::Boolean(a <= b))
            }
            TokenKind::EqualEqual => Ok(Value::Boolean(left_val == right_val)),
            TokenKind::BangEqual => Ok(Value::Boolean(left_val != right_val)),
            _ => unreachable!("parser only builds binary nodes for arithmetic and comparison"),
        }
    }

    /// Shared by prefix and postfix `++`/`--`: reads the variable,
    /// writes back the stepped value, and returns (prior, updated).
    fn step_variable(&mut self, name: &Token, operator: &Token) -> Result<(f64, f64)> {
        let Value::Number(prior) = self.env.borrow().get(&name.lexeme) else {
            return Err(runtime_error(name, "Value must be a number"));
        };
        let updated = match operator.kind {
            TokenKind::PlusPlus => prior + 1.0,
            _ => prior - 1.0,
        };
        self.env.borrow_mut().assign(name, Value::Number(updated))?;
        Ok((prior, updated))
    }

    fn evaluate_call(&mut self, callee: &Expr, arguments: &[Expr], paren: &Token) -> Result<Value> {
        let callee_val = self.evaluate(callee)?;

        let mut args = Vec::with_capacity(arguments.len());
        for arg in arguments {
            args.push(self.evaluate(arg)?);
        }

        let Value::Function(function) = callee_val else {
            return Err(runtime_error(paren, "Can only call functions"));
        };

        if args.len() != function.decl.params.len() {
            return Err(runtime_error(
                paren,
                format!(
                    "Expected {} arguments but got {}",
                    function.decl.params.len(),
                    args.len()
                ),
            ));
        }

        let frame = Environment::with_enclosing(function.closure.clone());
        for (param, arg) in function.decl.params.iter().zip(args) {
            frame.borrow_mut().define(param, arg)?;
        }

        match self.execute_block(&function.decl.body, frame)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
}

fn numeric_op(
    operator: &Token,
    left: &Value,
    right: &Value,
    op: fn(f64, f64) -> Value,
) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(op(*a, *b)),
        _ => Err(runtime_error(operator, "Operands must be numbers")),
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Boolean(false) | Value::Nil)
}

fn runtime_error(token: &Token, message: impl Into<String>) -> Error {
    Error::Runtime {
        line: token.line,
        lexeme: token.lexeme.clone(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    fn run(source: &str) -> (String, Vec<Error>) {
        let (tokens, scan_errors) = tokenize(source);
        assert!(scan_errors.is_empty(), "lexical errors: {:?}", scan_errors);
        let (statements, parse_errors) = parse(&tokens);
        assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);

        let mut interpreter = Interpreter::with_output(Vec::new());
        let errors = interpreter.interpret(&statements);
        let output = String::from_utf8(interpreter.into_output()).unwrap();
        (output, errors)
    }

    fn run_ok(source: &str) -> String {
        let (output, errors) = run(source);
        assert!(errors.is_empty(), "runtime errors: {:?}", errors);
        output
    }

    #[test]
    fn test_block_shadowing_restores_on_exit() {
        let output = run_ok("var x = 1; { var x = 2; print x; } print x;");
        assert_eq!(output, "2\n1\n");
    }

    #[test]
    fn test_function_call_and_arity() {
        let output = run_ok("fun add(a, b) { return a + b; } print add(2, 3);");
        assert_eq!(output, "5\n");

        let (_, errors) = run("fun add(a, b) { return a + b; } add(1);");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Error::Runtime { message, .. } if message == "Expected 2 arguments but got 1"
        ));
    }

    #[test]
    fn test_for_loop() {
        let output = run_ok("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn test_assignment_to_undefined_variable_does_not_stop_the_run() {
        let (output, errors) = run("x = 1; print 2;");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Error::Runtime { lexeme, .. } if lexeme == "x"
        ));
        assert_eq!(output, "2\n");
    }

    #[test]
    fn test_string_concatenation_is_left_biased() {
        assert_eq!(run_ok("print \"a\" + 1;"), "a1\n");
        assert_eq!(run_ok("print \"n = \" + nil;"), "n = nil\n");

        let (_, errors) = run("print 1 + \"a\";");
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::Runtime { lexeme, .. } if lexeme == "+"));
    }

    #[test]
    fn test_arithmetic_type_errors() {
        for source in ["print 1 - \"a\";", "print true * 2;", "print -\"a\";"] {
            let (_, errors) = run(source);
            assert_eq!(errors.len(), 1, "expected an error for {:?}", source);
        }
    }

    #[test]
    fn test_division_follows_ieee754() {
        assert_eq!(run_ok("print 1 / 0;"), "inf\n");
        assert_eq!(run_ok("print 7 / 2;"), "3.5\n");
    }

    #[test]
    fn test_truthiness() {
        // Only false and nil are falsy; 0 and "" are truthy.
        let output = run_ok(
            "if (0) print \"zero\";
             if (\"\") print \"empty\";
             if (nil) print \"nil\"; else print \"no nil\";
             if (false) print \"false\"; else print \"no false\";",
        );
        assert_eq!(output, "zero\nempty\nno nil\nno false\n");
    }

    #[test]
    fn test_logical_operators_yield_operands() {
        assert_eq!(run_ok("print nil or \"fallback\";"), "fallback\n");
        assert_eq!(run_ok("print 1 and 2;"), "2\n");
        assert_eq!(run_ok("print false and 2;"), "false\n");

        // The right operand is not evaluated when the left decides.
        let output = run_ok(
            "var a = 0;
             fun bump() { a = a + 1; return true; }
             false and bump();
             true or bump();
             print a;",
        );
        assert_eq!(output, "0\n");
    }

    #[test]
    fn test_prefix_and_postfix_step() {
        let output = run_ok("var i = 1; print ++i; print i++; print i; print --i;");
        assert_eq!(output, "2\n2\n3\n2\n");
    }

    #[test]
    fn test_step_requires_a_number() {
        let (_, errors) = run("var s = \"a\"; s++;");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Error::Runtime { lexeme, message, .. }
                if lexeme == "s" && message == "Value must be a number"
        ));
    }

    #[test]
    fn test_closures_capture_the_defining_environment() {
        let output = run_ok(
            "fun outer(x) {
                 fun inner() { return x + 1; }
                 return inner();
             }
             print outer(41);",
        );
        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_closure_mutates_captured_variable() {
        let output = run_ok(
            "fun make() {
                 var n = 0;
                 fun inc() { n = n + 1; return n; }
                 return inc;
             }
             var counter = make();
             print counter();
             print counter();",
        );
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_return_unwinds_through_loops_and_blocks() {
        let output = run_ok(
            "fun f() {
                 while (true) {
                     { return 7; }
                 }
             }
             print f();",
        );
        assert_eq!(output, "7\n");
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!(run_ok("fun f() { 1 + 1; } print f();"), "nil\n");
    }

    #[test]
    fn test_top_level_return_stops_the_run() {
        let (output, errors) = run("print 1; return; print 2;");
        assert!(errors.is_empty());
        assert_eq!(output, "1\n");
    }

    #[test]
    fn test_recursion() {
        let output = run_ok(
            "fun fact(n) {
                 if (n < 2) return 1;
                 return n * fact(n - 1);
             }
             print fact(5);",
        );
        assert_eq!(output, "120\n");
    }

    #[test]
    fn test_redefinition_in_same_frame_is_an_error() {
        let (_, errors) = run("var x = 1; var x = 2;");
        assert_eq!(errors.len(), 1);

        // Shadowing in a child frame is fine.
        let (_, errors) = run("var x = 1; { var x = 2; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_calling_a_non_function() {
        let (_, errors) = run("var x = 1; x();");
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            Error::Runtime { message, .. } if message == "Can only call functions"
        ));
    }

    #[test]
    fn test_unknown_variable_reads_as_nil() {
        assert_eq!(run_ok("print ghost;"), "nil\n");
    }

    #[test]
    fn test_value_equality() {
        let output = run_ok(
            "print 1 == 1;
             print \"a\" == \"a\";
             print nil == nil;
             print 1 == \"1\";
             print 1 != 2;",
        );
        assert_eq!(output, "true\ntrue\ntrue\nfalse\ntrue\n");
    }

    #[test]
    fn test_number_display_drops_integral_fraction() {
        let output = run_ok("print 3.0; print 2.5; print -0.5 + 0.25;");
        assert_eq!(output, "3\n2.5\n-0.25\n");
    }

    #[test]
    fn test_large_integral_numbers_display_exactly() {
        let output = run_ok("print 10000000000000000000.0;");
        assert_eq!(output, "10000000000000000000\n");

        assert_eq!(format!("{}", Value::Number(-1e19)), "-10000000000000000000");
        // 2^53, the first magnitude past the guarded cast.
        assert_eq!(
            format!("{}", Value::Number(9007199254740992.0)),
            "9007199254740992"
        );
    }

    #[test]
    fn test_if_else_chains() {
        let output = run_ok(
            "var x = 2;
             if (x == 1) print \"one\";
             else if (x == 2) print \"two\";
             else print \"many\";",
        );
        assert_eq!(output, "two\n");
    }

    #[test]
    fn test_while_reevaluates_condition() {
        let output = run_ok(
            "var i = 3;
             while (i > 0) { print i; i = i - 1; }",
        );
        assert_eq!(output, "3\n2\n1\n");
    }

    #[test]
    fn test_runtime_error_inside_block_restores_frame() {
        // The failing statement sits inside a block; the following
        // top-level statement must still see the outer frame.
        let (output, errors) = run("var x = 1; { y = 2; } print x;");
        assert_eq!(errors.len(), 1);
        assert_eq!(output, "1\n");
    }

    #[derive(Clone)]
    struct SharedOut(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.borrow_mut().flush()
        }
    }

    #[test]
    fn test_errors_are_reported_as_statements_fail() {
        let (tokens, _) = tokenize("print 1; x = 2; print 3;");
        let (statements, _) = parse(&tokens);

        let buffer = Rc::new(RefCell::new(Vec::new()));
        let mut interpreter = Interpreter::with_output(SharedOut(buffer.clone()));

        let mut snapshots = Vec::new();
        interpreter.interpret_with(&statements, |_| {
            snapshots.push(buffer.borrow().clone());
        });

        // The error arrives after "1" has printed and before "3" has.
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0], b"1\n");
        assert_eq!(*buffer.borrow(), b"1\n3\n");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::String("hi".to_string())), "hi");
        assert_eq!(format!("{:?}", Value::String("hi".to_string())), "\"hi\"");
        assert_eq!(format!("{}", Value::Boolean(true)), "true");
        assert_eq!(format!("{}", Value::Nil), "nil");
    }
}

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::{
    error::{Error, Result},
    runtime::Value,
    tokenizer::Token,
};

/// A single scope frame: a name-to-value mapping plus a shared
/// reference to the enclosing frame (absent for the global frame).
/// Frames form a strict tree rooted at the global frame.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }))
    }

    /// Binds a new name in this exact frame. Redefining a name that
    /// already exists in the frame is an error.
    pub fn define(&mut self, name: &Token, value: Value) -> Result<()> {
        if self.values.contains_key(&name.lexeme) {
            return Err(Error::Runtime {
                line: name.line,
                lexeme: name.lexeme.clone(),
                message: format!("Variable '{}' already defined", name.lexeme),
            });
        }
        self.values.insert(name.lexeme.clone(), value);
        Ok(())
    }

    /// Mutates the first frame on the chain that contains the name.
    /// Assigning to a name no frame defines is an error.
    pub fn assign(&mut self, name: &Token, value: Value) -> Result<()> {
        if let Some(slot) = self.values.get_mut(&name.lexeme) {
            *slot = value;
            return Ok(());
        }
        match &self.enclosing {
            Some(parent) => parent.borrow_mut().assign(name, value),
            None => Err(Error::Runtime {
                line: name.line,
                lexeme: name.lexeme.clone(),
                message: format!("Variable '{}' must be defined first", name.lexeme),
            }),
        }
    }

    /// Walks outward through enclosing frames; an unknown name yields
    /// `Nil` rather than an error.
    pub fn get(&self, name: &str) -> Value {
        if let Some(value) = self.values.get(name) {
            return value.clone();
        }
        match &self.enclosing {
            Some(parent) => parent.borrow().get(name),
            None => Value::Nil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenKind;

    fn ident(name: &str) -> Token {
        Token::new(TokenKind::Identifier, name.to_string(), None, 1)
    }

    #[test]
    fn test_define_and_get() -> Result<()> {
        let env = Environment::new();
        env.borrow_mut().define(&ident("x"), Value::Number(1.0))?;
        assert_eq!(env.borrow().get("x"), Value::Number(1.0));
        assert_eq!(env.borrow().get("missing"), Value::Nil);
        Ok(())
    }

    #[test]
    fn test_redefinition_in_same_frame_is_rejected() -> Result<()> {
        let env = Environment::new();
        env.borrow_mut().define(&ident("x"), Value::Number(1.0))?;
        let result = env.borrow_mut().define(&ident("x"), Value::Number(2.0));
        assert!(matches!(
            result,
            Err(Error::Runtime { lexeme, .. }) if lexeme == "x"
        ));
        Ok(())
    }

    #[test]
    fn test_shadowing_in_child_frame() -> Result<()> {
        let global = Environment::new();
        global.borrow_mut().define(&ident("x"), Value::Number(1.0))?;

        let child = Environment::with_enclosing(global.clone());
        child.borrow_mut().define(&ident("x"), Value::Number(2.0))?;

        assert_eq!(child.borrow().get("x"), Value::Number(2.0));
        assert_eq!(global.borrow().get("x"), Value::Number(1.0));
        Ok(())
    }

    #[test]
    fn test_assign_walks_the_chain() -> Result<()> {
        let global = Environment::new();
        global.borrow_mut().define(&ident("x"), Value::Number(1.0))?;

        let child = Environment::with_enclosing(global.clone());
        child.borrow_mut().assign(&ident("x"), Value::Number(5.0))?;

        assert_eq!(global.borrow().get("x"), Value::Number(5.0));
        Ok(())
    }

    #[test]
    fn test_assign_requires_prior_definition() {
        let env = Environment::new();
        let result = env.borrow_mut().assign(&ident("x"), Value::Number(1.0));
        assert!(matches!(
            result,
            Err(Error::Runtime { lexeme, .. }) if lexeme == "x"
        ));
    }
}

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::interpreter::value::Value;
use crate::interpreter::RuntimeError;
use crate::scanner::token::Token;

/// One mutable scope frame. Frames are chained through `enclosing` and
/// shared by reference counting: a frame may be kept alive by any number of
/// closures and bound methods long after the block that created it is gone.
#[derive(Debug, Default)]
pub struct Environment {
    enclosing: Option<Rc<Environment>>,
    values: RefCell<HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_enclosing(enclosing: Rc<Environment>) -> Rc<Self> {
        Rc::new(Self {
            enclosing: Some(enclosing),
            values: RefCell::new(HashMap::new()),
        })
    }

    /// Always succeeds, shadowing any same-name binding in this frame.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.values.borrow_mut().insert(name.into(), value);
    }

    pub fn get(&self, name: &Token) -> Result<Value, RuntimeError> {
        if let Some(value) = self.values.borrow().get(&name.lexeme) {
            return Ok(value.clone());
        }

        if let Some(enclosing) = &self.enclosing {
            return enclosing.get(name);
        }

        Err(RuntimeError::new(
            name.clone(),
            format!("Undefined variable '{}'.", name.lexeme),
        ))
    }

    pub fn assign(&self, name: &Token, value: Value) -> Result<(), RuntimeError> {
        if self.values.borrow().contains_key(&name.lexeme) {
            self.values.borrow_mut().insert(name.lexeme.clone(), value);
            return Ok(());
        }

        if let Some(enclosing) = &self.enclosing {
            return enclosing.assign(name, value);
        }

        Err(RuntimeError::new(
            name.clone(),
            format!("Undefined variable '{}'.", name.lexeme),
        ))
    }

    // Walks up the chain exactly `distance` times. The distance comes from
    // the resolver; a chain shorter than that is a broken invariant, not a
    // user-facing fault.
    fn ancestor(&self, distance: usize) -> &Environment {
        let mut current = self;
        for _ in 0..distance {
            current = current
                .enclosing
                .as_deref()
                .expect("resolved distance exceeds environment chain");
        }
        current
    }

    pub fn get_at(&self, distance: usize, name: &str) -> Value {
        self.ancestor(distance)
            .values
            .borrow()
            .get(name)
            .cloned()
            .expect("resolved variable missing from its frame")
    }

    pub fn assign_at(&self, distance: usize, name: &Token, value: Value) {
        self.ancestor(distance)
            .values
            .borrow_mut()
            .insert(name.lexeme.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::token::TokenType;

    fn name(text: &str) -> Token {
        Token::new(TokenType::Identifier, text, 1)
    }

    #[test]
    fn define_then_get() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));
        assert_eq!(env.get(&name("x")).unwrap(), Value::Num(1.0));
    }

    #[test]
    fn get_walks_the_parent_chain() {
        let globals = Environment::new();
        globals.define("x", Value::Num(1.0));
        let inner = Environment::with_enclosing(globals);
        assert_eq!(inner.get(&name("x")).unwrap(), Value::Num(1.0));
    }

    #[test]
    fn define_shadows_without_touching_the_parent() {
        let globals = Environment::new();
        globals.define("x", Value::Num(1.0));
        let inner = Environment::with_enclosing(globals.clone());
        inner.define("x", Value::Num(2.0));
        assert_eq!(inner.get(&name("x")).unwrap(), Value::Num(2.0));
        assert_eq!(globals.get(&name("x")).unwrap(), Value::Num(1.0));
    }

    #[test]
    fn assign_writes_to_the_defining_frame() {
        let globals = Environment::new();
        globals.define("x", Value::Num(1.0));
        let inner = Environment::with_enclosing(globals.clone());
        inner.assign(&name("x"), Value::Num(5.0)).unwrap();
        assert_eq!(globals.get(&name("x")).unwrap(), Value::Num(5.0));
    }

    #[test]
    fn undefined_variable_faults_with_the_token() {
        let env = Environment::new();
        let err = env.get(&name("missing")).unwrap_err();
        assert_eq!(err.message, "Undefined variable 'missing'.");
        assert_eq!(err.token.lexeme, "missing");
    }

    #[test]
    fn get_at_skips_name_search_in_intervening_frames() {
        let globals = Environment::new();
        globals.define("x", Value::Num(1.0));
        let middle = Environment::with_enclosing(globals);
        middle.define("x", Value::Num(2.0));
        let inner = Environment::with_enclosing(middle);
        assert_eq!(inner.get_at(1, "x"), Value::Num(2.0));
        assert_eq!(inner.get_at(2, "x"), Value::Num(1.0));
    }

    #[test]
    fn assign_at_targets_the_exact_frame() {
        let globals = Environment::new();
        globals.define("x", Value::Num(1.0));
        let inner = Environment::with_enclosing(globals.clone());
        inner.assign_at(1, &name("x"), Value::Num(9.0));
        assert_eq!(globals.get(&name("x")).unwrap(), Value::Num(9.0));
    }

    #[test]
    fn one_frame_shared_by_two_handles_sees_mutation() {
        let shared = Environment::new();
        shared.define("count", Value::Num(0.0));
        let a = Environment::with_enclosing(shared.clone());
        let b = Environment::with_enclosing(shared);
        a.assign(&name("count"), Value::Num(1.0)).unwrap();
        assert_eq!(b.get(&name("count")).unwrap(), Value::Num(1.0));
    }
}

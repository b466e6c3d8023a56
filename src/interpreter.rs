pub mod class;
pub mod environment;
pub mod native_function;
pub mod value;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::diagnostics::Diagnostic;
use crate::interpreter::class::{Class, Instance};
use crate::interpreter::environment::Environment;
use crate::interpreter::native_function::all_native_functions;
use crate::interpreter::value::{Function, Value};
use crate::parser::ast::{Expr, ExprId, FunctionDecl, Literal, Stmt};
use crate::scanner::token::{Token, TokenType};

/// A fault raised during evaluation. Carries the token closest to the
/// failing operation so the report can name a line.
#[derive(Clone, Debug)]
pub struct RuntimeError {
    pub token: Token,
    pub message: String,
}

impl RuntimeError {
    pub fn new(token: Token, message: impl Into<String>) -> Self {
        RuntimeError {
            token,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Diagnostic::from(self))
    }
}

impl Error for RuntimeError {}

impl From<&RuntimeError> for Diagnostic {
    fn from(error: &RuntimeError) -> Diagnostic {
        Diagnostic::at_token(&error.token, error.message.clone())
    }
}

// How a statement finished: fell through, or hit `return`. A return unwinds
// through blocks and loops and is caught at the nearest function-call
// boundary. Kept strictly apart from RuntimeError, which unwinds all the
// way to the top-level driver.
#[derive(Debug)]
enum ControlFlow {
    Normal,
    Return(Value),
}

// Propagate a non-normal outcome to the caller, keep going otherwise
macro_rules! prop {
    ($expr:expr) => {
        match $expr? {
            ControlFlow::Normal => {}
            flow @ ControlFlow::Return(_) => return Ok(flow),
        }
    };
}

/// Tree-walk evaluator.
///
/// Owns the global frame, the current-frame pointer, and the resolution
/// table the resolver fills in. Program output goes to the borrowed writer,
/// so callers can capture it.
///
/// # Example
///
/// ```
/// use rill::interpreter::Interpreter;
/// use rill::parser::ast::NodeIds;
/// use rill::parser::Parser;
/// use rill::resolver::Resolver;
/// use rill::scanner::Scanner;
///
/// let mut output: Vec<u8> = Vec::new();
/// let mut ids = NodeIds::new();
/// let mut interpreter = Interpreter::new(&mut output);
///
/// let source = r#"
///     fun greet(name) { print "hi " + name; }
///     greet("rill");
/// "#;
/// let scan = Scanner::new(source).scan_tokens();
/// assert!(scan.errors.is_empty());
/// let (statements, errors) = Parser::new(scan.tokens, &mut ids).parse();
/// assert!(errors.is_empty());
/// assert!(Resolver::new(&mut interpreter).resolve(&statements).is_empty());
/// interpreter.interpret(&statements).expect("runtime fault");
/// assert_eq!(output, b"hi rill\n");
/// ```
pub struct Interpreter<'o, W: Write> {
    output: &'o mut W,
    globals: Rc<Environment>,
    env: Rc<Environment>,
    locals: HashMap<ExprId, usize>,
}

impl<'o, W: Write> Interpreter<'o, W> {
    pub fn new(output: &'o mut W) -> Self {
        let globals = Environment::new();
        for (name, native_function) in all_native_functions() {
            globals.define(name, native_function);
        }
        Interpreter {
            output,
            env: globals.clone(),
            globals,
            locals: HashMap::new(),
        }
    }

    /// Records how many frames separate a variable reference from its
    /// binding. Called by the resolver; absence of an entry means global.
    pub fn resolve(&mut self, id: ExprId, distance: usize) {
        self.locals.insert(id, distance);
    }

    /// Runs top-level statements in order. The first runtime fault aborts
    /// the rest and is handed back to the driver for reporting.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), RuntimeError> {
        for statement in statements {
            // The resolver rejects top-level returns, so a Return outcome
            // cannot leak past this loop
            if let ControlFlow::Return(_) = self.execute(statement)? {
                break;
            }
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<ControlFlow, RuntimeError> {
        match statement {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(ControlFlow::Normal)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.output, "{}", value).expect("program output write failed");
                Ok(ControlFlow::Normal)
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                self.env.define(name.lexeme.clone(), value);
                Ok(ControlFlow::Normal)
            }

            Stmt::Block(statements) => {
                self.execute_block(statements, Environment::with_enclosing(self.env.clone()))
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(ControlFlow::Normal)
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    prop!(self.execute(body));
                }
                Ok(ControlFlow::Normal)
            }

            Stmt::Function(declaration) => {
                // The closure is the environment at the point of
                // declaration, which is what makes closures lexical
                let function =
                    Function::new(declaration.clone(), self.env.clone(), false);
                self.env
                    .define(declaration.name.lexeme.clone(), Value::Fn(Rc::new(function)));
                Ok(ControlFlow::Normal)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Ok(ControlFlow::Return(value))
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> Result<ControlFlow, RuntimeError> {
        let superclass_value = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    let token = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name, // superclass references are always variables
                    };
                    return Err(RuntimeError::new(
                        token.clone(),
                        "Superclass must be a class.",
                    ));
                }
            },
            None => None,
        };

        // Two-step binding: the name exists (as nil) while methods are
        // compiled, so they can refer to the class by name
        self.env.define(name.lexeme.clone(), Value::Nil);

        let method_env = match &superclass_value {
            Some(superclass) => {
                let env = Environment::with_enclosing(self.env.clone());
                env.define("super", Value::Class(superclass.clone()));
                env
            }
            None => self.env.clone(),
        };

        let mut method_table = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = Function::new(method.clone(), method_env.clone(), is_initializer);
            method_table.insert(method.name.lexeme.clone(), Rc::new(function));
        }

        let class = Class::new(
            Rc::from(name.lexeme.as_str()),
            superclass_value,
            method_table,
        );
        self.env.assign(name, Value::Class(Rc::new(class)))?;
        Ok(ControlFlow::Normal)
    }

    fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<Environment>,
    ) -> Result<ControlFlow, RuntimeError> {
        let previous = std::mem::replace(&mut self.env, environment);

        let result = (|| {
            for statement in statements {
                prop!(self.execute(statement));
            }
            Ok(ControlFlow::Normal)
        })();

        self.env = previous;
        result
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Value, RuntimeError> {
        match expression {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Num(*n),
                Literal::Str(s) => Value::Str(Rc::from(s.as_str())),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, operand } => {
                let value = self.evaluate(operand)?;
                match operator.token_type {
                    TokenType::Minus => match value {
                        Value::Num(n) => Ok(Value::Num(-n)),
                        _ => Err(RuntimeError::new(
                            operator.clone(),
                            "Operand must be a number.",
                        )),
                    },
                    TokenType::Bang => Ok(Value::Bool(!value.is_truthy())),
                    _ => Err(RuntimeError::new(
                        operator.clone(),
                        format!("Unknown unary operator '{}'.", operator.lexeme),
                    )),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary_op(operator, left, right)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;

                // Short-circuit on the left operand's truthiness and yield
                // the operand value itself, not a coerced boolean
                if operator.token_type == TokenType::Or {
                    if left.is_truthy() {
                        return Ok(left);
                    }
                } else if !left.is_truthy() {
                    return Ok(left);
                }

                self.evaluate(right)
            }

            Expr::Variable { id, name } => self.look_up_variable(name, *id),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(id) {
                    Some(distance) => self.env.assign_at(*distance, name, value.clone()),
                    None => self.globals.assign(name, value.clone())?,
                }
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                // Arguments are evaluated left to right before any arity
                // checking
                let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(arguments.len());
                for argument in arguments {
                    values.push(self.evaluate(argument)?);
                }

                self.call_value(callee, values, paren)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => Instance::get(&instance, name),
                _ => Err(RuntimeError::new(
                    name.clone(),
                    "Only instances have properties.",
                )),
            },

            Expr::Set {
                object,
                name,
                value,
            } => match self.evaluate(object)? {
                Value::Instance(instance) => {
                    let value = self.evaluate(value)?;
                    instance.set(name, value.clone());
                    Ok(value)
                }
                _ => Err(RuntimeError::new(
                    name.clone(),
                    "Only instances have fields.",
                )),
            },

            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),

            Expr::Super { id, method, .. } => {
                let distance = self
                    .locals
                    .get(id)
                    .copied()
                    .expect("unresolved 'super' expression");
                let Value::Class(superclass) = self.env.get_at(distance, "super") else {
                    unreachable!("'super' frame holds a class");
                };
                // 'this' lives in the frame just inside the one holding
                // 'super'
                let Value::Instance(instance) = self.env.get_at(distance - 1, "this") else {
                    unreachable!("'this' frame holds an instance");
                };

                let resolved = superclass.find_method(&method.lexeme).ok_or_else(|| {
                    RuntimeError::new(
                        method.clone(),
                        format!("Undefined property '{}'.", method.lexeme),
                    )
                })?;
                Ok(Value::Fn(Rc::new(resolved.bind(instance))))
            }
        }
    }

    fn binary_op(
        &mut self,
        operator: &Token,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        match operator.token_type {
            TokenType::Plus => match (left, right) {
                (Value::Num(l), Value::Num(r)) => Ok(Value::Num(l + r)),
                (Value::Str(l), Value::Str(r)) => {
                    let mut s = String::with_capacity(l.len() + r.len());
                    s.push_str(&l);
                    s.push_str(&r);
                    Ok(Value::Str(Rc::from(s)))
                }
                _ => Err(RuntimeError::new(
                    operator.clone(),
                    "Operands must both be numbers or strings.",
                )),
            },

            TokenType::Minus => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Num(l - r))
            }
            TokenType::Slash => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Num(l / r))
            }
            TokenType::Star => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Num(l * r))
            }

            TokenType::Greater => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Bool(l > r))
            }
            TokenType::GreaterEqual => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Bool(l >= r))
            }
            TokenType::Less => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Bool(l < r))
            }
            TokenType::LessEqual => {
                let (l, r) = self.number_operands(operator, left, right)?;
                Ok(Value::Bool(l <= r))
            }

            TokenType::EqualEqual => Ok(Value::Bool(left == right)),
            TokenType::BangEqual => Ok(Value::Bool(left != right)),

            _ => Err(RuntimeError::new(
                operator.clone(),
                format!("Unknown binary operator '{}'.", operator.lexeme),
            )),
        }
    }

    fn number_operands(
        &self,
        operator: &Token,
        left: Value,
        right: Value,
    ) -> Result<(f64, f64), RuntimeError> {
        match (left, right) {
            (Value::Num(l), Value::Num(r)) => Ok((l, r)),
            _ => Err(RuntimeError::new(
                operator.clone(),
                "Operands must be numbers.",
            )),
        }
    }

    // Constant-distance read: the resolver's table first, then the global
    // frame by name. Never a search of the whole chain.
    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value, RuntimeError> {
        match self.locals.get(&id) {
            Some(distance) => Ok(self.env.get_at(*distance, &name.lexeme)),
            None => self.globals.get(name),
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        arguments: SmallVec<[Value; 4]>,
        paren: &Token,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Fn(function) => {
                self.check_arity(function.arity(), arguments.len(), paren)?;
                self.call_function(&function, arguments)
            }

            Value::NativeFn(native) => {
                self.check_arity(native.arity, arguments.len(), paren)?;
                (native.func)(&arguments)
                    .map_err(|message| RuntimeError::new(paren.clone(), message))
            }

            Value::Class(class) => {
                self.check_arity(class.arity(), arguments.len(), paren)?;
                let instance = Instance::new(class.clone());
                if let Some(initializer) = class.find_method("init") {
                    self.call_function(&initializer.bind(instance.clone()), arguments)?;
                }
                Ok(Value::Instance(instance))
            }

            _ => Err(RuntimeError::new(
                paren.clone(),
                "Can only call functions and classes.",
            )),
        }
    }

    fn check_arity(
        &self,
        expected: usize,
        actual: usize,
        paren: &Token,
    ) -> Result<(), RuntimeError> {
        if expected == actual {
            Ok(())
        } else {
            Err(RuntimeError::new(
                paren.clone(),
                format!("Expected {} arguments but got {}.", expected, actual),
            ))
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        arguments: SmallVec<[Value; 4]>,
    ) -> Result<Value, RuntimeError> {
        // The call frame hangs off the function's closure, not the caller's
        // environment; dynamic scoping would fall out of the latter
        let environment = Environment::with_enclosing(function.closure.clone());
        for (param, argument) in function.declaration.params.iter().zip(arguments) {
            environment.define(param.lexeme.clone(), argument);
        }

        let flow = self.execute_block(&function.declaration.body, environment)?;

        if function.is_initializer {
            // An initializer always answers with its bound instance, even
            // when the body hit a bare return
            return Ok(function.closure.get_at(0, "this"));
        }

        match flow {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::Normal => Ok(Value::Nil),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::NodeIds;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::Scanner;

    fn interpret(source: &str) -> Result<String, RuntimeError> {
        let mut output: Vec<u8> = Vec::new();
        let mut ids = NodeIds::new();
        let mut interpreter = Interpreter::new(&mut output);

        let scan = Scanner::new(source).scan_tokens();
        assert!(scan.errors.is_empty(), "scan errors: {:?}", scan.errors);
        let (statements, errors) = Parser::new(scan.tokens, &mut ids).parse();
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        let resolve_errors = Resolver::new(&mut interpreter).resolve(&statements);
        assert!(
            resolve_errors.is_empty(),
            "resolve errors: {:?}",
            resolve_errors
        );

        interpreter.interpret(&statements)?;
        Ok(String::from_utf8(output).expect("output is not utf-8"))
    }

    fn token(token_type: TokenType, lexeme: &str) -> Token {
        Token::new(token_type, lexeme, 1)
    }

    #[test]
    fn hand_built_tree_matches_parsed_source() -> Result<(), RuntimeError> {
        // print 1 + 2 * 3;
        let tree = vec![Stmt::Print(Expr::Binary {
            left: Box::new(Expr::Literal(Literal::Number(1.0))),
            operator: token(TokenType::Plus, "+"),
            right: Box::new(Expr::Binary {
                left: Box::new(Expr::Literal(Literal::Number(2.0))),
                operator: token(TokenType::Star, "*"),
                right: Box::new(Expr::Literal(Literal::Number(3.0))),
            }),
        })];

        let mut output: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut output);
        interpreter.interpret(&tree)?;
        let hand_built = String::from_utf8(output).expect("output is not utf-8");

        assert_eq!(hand_built, "7\n");
        assert_eq!(hand_built, interpret("print 1 + 2 * 3;")?);
        Ok(())
    }

    #[test]
    fn string_concatenation() -> Result<(), RuntimeError> {
        assert_eq!(interpret("print \"a\" + \"b\";")?, "ab\n");
        Ok(())
    }

    #[test]
    fn adding_string_and_number_is_a_type_fault() {
        let err = interpret("print \"a\" + 1;").unwrap_err();
        assert_eq!(err.message, "Operands must both be numbers or strings.");
    }

    #[test]
    fn unary_fault_names_a_single_operand() {
        let err = interpret("print -\"x\";").unwrap_err();
        assert_eq!(err.message, "Operand must be a number.");
    }

    #[test]
    fn binary_fault_names_both_operands() {
        let err = interpret("print true * 2;").unwrap_err();
        assert_eq!(err.message, "Operands must be numbers.");
    }

    #[test]
    fn comparison_requires_numbers() {
        let err = interpret("print \"a\" < \"b\";").unwrap_err();
        assert_eq!(err.message, "Operands must be numbers.");
    }

    #[test]
    fn logical_operators_return_the_operand_value() -> Result<(), RuntimeError> {
        assert_eq!(interpret("print \"left\" or \"right\";")?, "left\n");
        assert_eq!(interpret("print nil or \"right\";")?, "right\n");
        assert_eq!(interpret("print nil and \"right\";")?, "nil\n");
        assert_eq!(interpret("print 1 and 2;")?, "2\n");
        Ok(())
    }

    #[test]
    fn short_circuit_skips_the_right_operand() -> Result<(), RuntimeError> {
        // would fault if the call were evaluated
        assert_eq!(interpret("print false and missing();")?, "false\n");
        assert_eq!(interpret("print true or missing();")?, "true\n");
        Ok(())
    }

    #[test]
    fn zero_is_truthy() -> Result<(), RuntimeError> {
        assert_eq!(interpret("if (0) print \"yes\"; else print \"no\";")?, "yes\n");
        Ok(())
    }

    #[test]
    fn undefined_variable_read_is_a_fault() {
        let err = interpret("print missing;").unwrap_err();
        assert_eq!(err.message, "Undefined variable 'missing'.");
    }

    #[test]
    fn undefined_variable_assignment_is_a_fault() {
        let err = interpret("missing = 1;").unwrap_err();
        assert_eq!(err.message, "Undefined variable 'missing'.");
    }

    #[test]
    fn assignment_evaluates_to_the_assigned_value() -> Result<(), RuntimeError> {
        assert_eq!(interpret("var a = 1; print a = 2;")?, "2\n");
        Ok(())
    }

    #[test]
    fn calling_a_non_callable_is_a_fault() {
        let err = interpret("var x = 1; x();").unwrap_err();
        assert_eq!(err.message, "Can only call functions and classes.");
    }

    #[test]
    fn arity_mismatch_reports_expected_and_actual() {
        let err = interpret("fun f(a, b) {} f(1);").unwrap_err();
        assert_eq!(err.message, "Expected 2 arguments but got 1.");
    }

    #[test]
    fn function_without_return_yields_nil() -> Result<(), RuntimeError> {
        assert_eq!(interpret("fun f() {} print f();")?, "nil\n");
        Ok(())
    }

    #[test]
    fn runtime_fault_aborts_remaining_statements() {
        let mut output: Vec<u8> = Vec::new();
        let mut ids = NodeIds::new();
        let mut interpreter = Interpreter::new(&mut output);

        let scan = Scanner::new("print 1; print -\"x\"; print 2;").scan_tokens();
        let (statements, errors) = Parser::new(scan.tokens, &mut ids).parse();
        assert!(errors.is_empty());
        Resolver::new(&mut interpreter).resolve(&statements);
        assert!(interpreter.interpret(&statements).is_err());
        assert_eq!(output, b"1\n");
    }

    #[test]
    fn property_access_on_non_instance_is_a_fault() {
        let err = interpret("var x = 1; print x.field;").unwrap_err();
        assert_eq!(err.message, "Only instances have properties.");
        let err = interpret("var x = 1; x.field = 2;").unwrap_err();
        assert_eq!(err.message, "Only instances have fields.");
    }

    #[test]
    fn superclass_must_be_a_class() {
        let err = interpret("var NotAClass = 1; class Sub < NotAClass {}").unwrap_err();
        assert_eq!(err.message, "Superclass must be a class.");
    }

    #[test]
    fn clock_is_callable_from_the_global_frame() -> Result<(), RuntimeError> {
        assert_eq!(interpret("print clock() > 0;")?, "true\n");
        Ok(())
    }
}

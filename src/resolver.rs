use std::collections::HashMap;
use std::io::Write;

use crate::diagnostics::Diagnostic;
use crate::interpreter::Interpreter;
use crate::parser::ast::{Expr, ExprId, FunctionDecl, Stmt};
use crate::scanner::token::Token;

#[derive(Clone, Copy, PartialEq)]
enum FunctionKind {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Clone, Copy, PartialEq)]
enum ClassKind {
    None,
    Class,
    Subclass,
}

/// Static scope analysis. Walks the tree without executing anything,
/// records the lexical distance of every resolvable reference into the
/// interpreter's resolution table, and collects every misuse it can prove:
/// self-referential initializers, duplicate declarations, stray
/// `return`/`this`/`super`, self-inheriting classes.
///
/// Only local scopes are tracked; a name that no scope knows is left for
/// the global frame at runtime.
pub struct Resolver<'i, 'o, W: Write> {
    interpreter: &'i mut Interpreter<'o, W>,
    // name -> fully-initialized? (false between declare and define)
    scopes: Vec<HashMap<String, bool>>,
    current_function: FunctionKind,
    current_class: ClassKind,
    errors: Vec<Diagnostic>,
}

impl<'i, 'o, W: Write> Resolver<'i, 'o, W> {
    pub fn new(interpreter: &'i mut Interpreter<'o, W>) -> Self {
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionKind::None,
            current_class: ClassKind::None,
            errors: Vec::new(),
        }
    }

    pub fn resolve(mut self, statements: &[Stmt]) -> Vec<Diagnostic> {
        self.resolve_statements(statements);
        self.errors
    }

    fn resolve_statements(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_statement(statement);
        }
    }

    fn resolve_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Expression(expr) | Stmt::Print(expr) => self.resolve_expression(expr),

            Stmt::Var { name, initializer } => {
                self.declare(name);
                if let Some(initializer) = initializer {
                    self.resolve_expression(initializer);
                }
                self.define(name);
            }

            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_statements(statements);
                self.end_scope();
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expression(condition);
                self.resolve_statement(body);
            }

            Stmt::Function(declaration) => {
                // The name is defined before the body resolves, so a
                // function can recurse into itself
                self.declare(&declaration.name);
                self.define(&declaration.name);
                self.resolve_function(declaration, FunctionKind::Function);
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionKind::None {
                    self.error(keyword, "Can't return from top-level code.");
                }

                if let Some(value) = value {
                    if self.current_function == FunctionKind::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expression(value);
                }
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassKind::Class;

                self.declare(name);
                self.define(name);

                if let Some(superclass_expr) = superclass {
                    if let Expr::Variable {
                        name: superclass_name,
                        ..
                    } = superclass_expr
                    {
                        if superclass_name.lexeme == name.lexeme {
                            self.error(superclass_name, "A class can't inherit from itself.");
                        }
                    }

                    self.current_class = ClassKind::Subclass;
                    self.resolve_expression(superclass_expr);

                    // Methods of a subclass close over a scope holding
                    // 'super'
                    self.begin_scope();
                    self.scope_mut().insert("super".to_string(), true);
                }

                self.begin_scope();
                self.scope_mut().insert("this".to_string(), true);

                for method in methods {
                    let kind = if method.name.lexeme == "init" {
                        FunctionKind::Initializer
                    } else {
                        FunctionKind::Method
                    };
                    self.resolve_function(method, kind);
                }

                self.end_scope();

                if superclass.is_some() {
                    self.end_scope();
                }

                self.current_class = enclosing_class;
            }
        }
    }

    fn resolve_expression(&mut self, expression: &Expr) {
        match expression {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => self.resolve_expression(inner),

            Expr::Unary { operand, .. } => self.resolve_expression(operand),

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }

            Expr::Variable { id, name } => {
                if self.scopes.last().and_then(|scope| scope.get(&name.lexeme))
                    == Some(&false)
                {
                    self.error(name, "Can't read local variable in its own initializer.");
                }
                self.resolve_local(*id, name);
            }

            Expr::Assign { id, name, value } => {
                self.resolve_expression(value);
                self.resolve_local(*id, name);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee);
                for argument in arguments {
                    self.resolve_expression(argument);
                }
            }

            Expr::Get { object, .. } => self.resolve_expression(object),

            Expr::Set { object, value, .. } => {
                self.resolve_expression(value);
                self.resolve_expression(object);
            }

            Expr::This { id, keyword } => {
                if self.current_class == ClassKind::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                    return;
                }
                self.resolve_local(*id, keyword);
            }

            Expr::Super { id, keyword, .. } => {
                match self.current_class {
                    ClassKind::None => {
                        self.error(keyword, "Can't use 'super' outside of a class.");
                    }
                    ClassKind::Class => {
                        self.error(keyword, "Can't use 'super' in a class with no superclass.");
                    }
                    ClassKind::Subclass => {}
                }
                self.resolve_local(*id, keyword);
            }
        }
    }

    // Innermost match wins; its distance from the innermost scope goes into
    // the table. No match at all means the global frame.
    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                self.interpreter.resolve(id, distance);
                return;
            }
        }
    }

    fn resolve_function(&mut self, declaration: &FunctionDecl, kind: FunctionKind) {
        let enclosing_function = self.current_function;
        self.current_function = kind;

        self.begin_scope();
        for param in &declaration.params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_statements(&declaration.body);
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn scope_mut(&mut self) -> &mut HashMap<String, bool> {
        self.scopes.last_mut().expect("no open scope")
    }

    fn declare(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            return; // globals are not scope-tracked
        };

        if scope.contains_key(&name.lexeme) {
            self.error(name, "Already a variable with this name in this scope.");
            return;
        }

        self.scope_mut().insert(name.lexeme.clone(), false);
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(Diagnostic::at_token(token, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::NodeIds;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn resolve(source: &str) -> Vec<Diagnostic> {
        let mut output: Vec<u8> = Vec::new();
        let mut interpreter = Interpreter::new(&mut output);
        let mut ids = NodeIds::new();

        let scan = Scanner::new(source).scan_tokens();
        assert!(scan.errors.is_empty(), "scan errors: {:?}", scan.errors);
        let (statements, errors) = Parser::new(scan.tokens, &mut ids).parse();
        assert!(errors.is_empty(), "parse errors: {:?}", errors);

        Resolver::new(&mut interpreter).resolve(&statements)
    }

    fn messages(source: &str) -> Vec<String> {
        resolve(source).iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn self_referential_initializer_in_a_block_is_rejected() {
        assert_eq!(
            messages("{ var x = x; }"),
            vec!["Can't read local variable in its own initializer."]
        );
    }

    #[test]
    fn self_referential_initializer_at_global_scope_is_legal() {
        assert!(resolve("var x = x;").is_empty());
    }

    #[test]
    fn duplicate_declaration_in_one_scope_is_rejected() {
        assert_eq!(
            messages("{ var a = 1; var a = 2; }"),
            vec!["Already a variable with this name in this scope."]
        );
    }

    #[test]
    fn duplicate_declaration_at_global_scope_is_legal() {
        assert!(resolve("var a = 1; var a = 2;").is_empty());
    }

    #[test]
    fn shadowing_in_an_inner_scope_is_legal() {
        assert!(resolve("{ var a = 1; { var a = 2; } }").is_empty());
    }

    #[test]
    fn top_level_return_is_rejected() {
        assert_eq!(messages("return 1;"), vec!["Can't return from top-level code."]);
    }

    #[test]
    fn return_inside_a_function_is_legal() {
        assert!(resolve("fun f() { return 1; }").is_empty());
    }

    #[test]
    fn returning_a_value_from_an_initializer_is_rejected() {
        assert_eq!(
            messages("class A { init() { return 1; } }"),
            vec!["Can't return a value from an initializer."]
        );
    }

    #[test]
    fn bare_return_in_an_initializer_is_legal() {
        assert!(resolve("class A { init() { return; } }").is_empty());
    }

    #[test]
    fn this_outside_a_class_is_rejected() {
        assert_eq!(
            messages("print this;"),
            vec!["Can't use 'this' outside of a class."]
        );
        assert_eq!(
            messages("fun f() { return this; }"),
            vec!["Can't use 'this' outside of a class."]
        );
    }

    #[test]
    fn super_outside_a_class_is_rejected() {
        assert_eq!(
            messages("print super.x;"),
            vec!["Can't use 'super' outside of a class."]
        );
    }

    #[test]
    fn super_without_a_superclass_is_rejected() {
        assert_eq!(
            messages("class A { f() { return super.f(); } }"),
            vec!["Can't use 'super' in a class with no superclass."]
        );
    }

    #[test]
    fn super_with_a_superclass_is_legal() {
        assert!(resolve("class A { f() {} } class B < A { f() { return super.f(); } }").is_empty());
    }

    #[test]
    fn class_inheriting_from_itself_is_rejected() {
        let found = messages("class A < A {}");
        assert!(found.contains(&"A class can't inherit from itself.".to_string()));
    }

    #[test]
    fn every_fault_is_collected_not_just_the_first() {
        let found = messages("return 1; print this;");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn function_parameters_live_in_the_function_scope() {
        assert!(resolve("fun f(a) { print a; } var a = 1;").is_empty());
    }
}

pub mod ast;

use std::rc::Rc;

use crate::diagnostics::Diagnostic;
use crate::parser::ast::{Expr, FunctionDecl, Literal, NodeIds, Stmt};
use crate::scanner::token::{Token, TokenType};

pub struct Parser<'ids> {
    tokens: Vec<Token>,
    current: usize,
    ids: &'ids mut NodeIds,
    errors: Vec<Diagnostic>,
}

impl<'ids> Parser<'ids> {
    pub fn new(tokens: Vec<Token>, ids: &'ids mut NodeIds) -> Self {
        Self {
            tokens,
            current: 0,
            ids,
            errors: Vec::new(),
        }
    }

    // utility methods
    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, token_type: &TokenType) -> bool {
        self.peek().token_type == *token_type
    }

    fn match_any(&mut self, types: &[TokenType]) -> bool {
        for t in types {
            if self.check(t) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, Diagnostic> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(Diagnostic::at_token(self.peek(), message))
        }
    }

    // Report without aborting the current production
    fn report(&mut self, token: &Token, message: &str) {
        self.errors.push(Diagnostic::at_token(token, message));
    }

    /// Parses the whole token stream. Statements that parsed cleanly are
    /// returned even when others failed; the diagnostics decide whether the
    /// caller may execute them.
    pub fn parse(mut self) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }

        (statements, self.errors)
    }

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_any(&[TokenType::Class]) {
            self.class_declaration()
        } else if self.match_any(&[TokenType::Fun]) {
            self.function("function").map(Stmt::Function)
        } else if self.match_any(&[TokenType::Var]) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(statement) => Some(statement),
            Err(e) => {
                self.errors.push(e);
                self.synchronize(); // skip to the next statement boundary
                None
            }
        }
    }

    // Panic-mode recovery: discard tokens until just after a semicolon or
    // just before a token that can start a statement, so one defect yields
    // one diagnostic instead of a cascade.
    fn synchronize(&mut self) {
        self.advance(); // skip the token that caused the error

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt, Diagnostic> {
        let name = self
            .consume(TokenType::Identifier, "Expect class name.")?
            .clone();

        let superclass = if self.match_any(&[TokenType::Less]) {
            self.consume(TokenType::Identifier, "Expect superclass name.")?;
            Some(Expr::Variable {
                id: self.ids.next_id(),
                name: self.previous().clone(),
            })
        } else {
            None
        };

        self.consume(TokenType::LeftBrace, "Expect '{' before class body.")?;

        let mut methods = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
        })
    }

    fn function(&mut self, kind: &str) -> Result<Rc<FunctionDecl>, Diagnostic> {
        let name = self
            .consume(TokenType::Identifier, &format!("Expect {} name.", kind))?
            .clone();

        self.consume(
            TokenType::LeftParen,
            &format!("Expect '(' after {} name.", kind),
        )?;

        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if params.len() >= 255 {
                    let token = self.peek().clone();
                    self.report(&token, "Can't have more than 255 parameters.");
                }
                params.push(
                    self.consume(TokenType::Identifier, "Expect parameter name.")?
                        .clone(),
                );
                if !self.match_any(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;

        self.consume(
            TokenType::LeftBrace,
            &format!("Expect '{{' before {} body.", kind),
        )?;
        let body = self.block()?;

        Ok(Rc::new(FunctionDecl { name, params, body }))
    }

    fn var_declaration(&mut self) -> Result<Stmt, Diagnostic> {
        let name = self
            .consume(TokenType::Identifier, "Expect variable name.")?
            .clone();

        let initializer = if self.match_any(&[TokenType::Equal]) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        )?;

        Ok(Stmt::Var { name, initializer })
    }

    fn statement(&mut self) -> Result<Stmt, Diagnostic> {
        if self.match_any(&[TokenType::For]) {
            self.for_statement()
        } else if self.match_any(&[TokenType::If]) {
            self.if_statement()
        } else if self.match_any(&[TokenType::Print]) {
            self.print_statement()
        } else if self.match_any(&[TokenType::Return]) {
            self.return_statement()
        } else if self.match_any(&[TokenType::While]) {
            self.while_statement()
        } else if self.match_any(&[TokenType::LeftBrace]) {
            Ok(Stmt::Block(self.block()?))
        } else {
            self.expression_statement()
        }
    }

    // There is no for-loop at runtime: the clauses are rewritten here into
    // an initializer statement plus a while-loop with the increment appended
    // to the body. A missing condition defaults to literal true.
    fn for_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.match_any(&[TokenType::Semicolon]) {
            None
        } else if self.match_any(&[TokenType::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if !self.check(&TokenType::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
        }

        let condition = condition.unwrap_or(Expr::Literal(Literal::Bool(true)));
        body = Stmt::While {
            condition,
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }

        Ok(body)
    }

    fn if_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_any(&[TokenType::Else]) {
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

    fn print_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print(value))
    }

    fn return_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.previous().clone();

        let value = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;

        Ok(Stmt::Return { keyword, value })
    }

    fn while_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    // Called with the '{' already consumed
    fn block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut statements = Vec::new();

        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            if let Some(statement) = self.declaration() {
                statements.push(statement);
            }
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression(expr))
    }

    fn expression(&mut self) -> Result<Expr, Diagnostic> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.or()?;

        if self.match_any(&[TokenType::Equal]) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?); // right-associative

            return match expr {
                Expr::Variable { name, .. } => Ok(Expr::Assign {
                    id: self.ids.next_id(),
                    name,
                    value,
                }),
                Expr::Get { object, name } => Ok(Expr::Set {
                    object,
                    name,
                    value,
                }),
                other => {
                    // A diagnostic, not a parse abort: the expression itself
                    // is still well-formed
                    self.report(&equals, "Invalid assignment target.");
                    Ok(other)
                }
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.and()?;

        while self.match_any(&[TokenType::Or]) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.equality()?;

        while self.match_any(&[TokenType::And]) {
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

    fn equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.comparison()?;

        while self.match_any(&[TokenType::BangEqual, TokenType::EqualEqual]) {
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

    fn comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.term()?;

        while self.match_any(&[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
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

    fn term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.factor()?;

        while self.match_any(&[TokenType::Minus, TokenType::Plus]) {
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

    fn factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.unary()?;

        while self.match_any(&[TokenType::Slash, TokenType::Star]) {
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

    fn unary(&mut self) -> Result<Expr, Diagnostic> {
        if self.match_any(&[TokenType::Bang, TokenType::Minus]) {
            let operator = self.previous().clone();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.primary()?;

        loop {
            if self.match_any(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_any(&[TokenType::Dot]) {
                let name = self
                    .consume(TokenType::Identifier, "Expect property name after '.'.")?
                    .clone();
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, Diagnostic> {
        let mut arguments = Vec::new();

        if !self.check(&TokenType::RightParen) {
            loop {
                if arguments.len() >= 255 {
                    let token = self.peek().clone();
                    self.report(&token, "Can't have more than 255 arguments.");
                }
                arguments.push(self.expression()?);
                if !self.match_any(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let paren = self
            .consume(TokenType::RightParen, "Expect ')' after arguments.")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr, Diagnostic> {
        if self.match_any(&[TokenType::False]) {
            return Ok(Expr::Literal(Literal::Bool(false)));
        }
        if self.match_any(&[TokenType::True]) {
            return Ok(Expr::Literal(Literal::Bool(true)));
        }
        if self.match_any(&[TokenType::Nil]) {
            return Ok(Expr::Literal(Literal::Nil));
        }

        match &self.peek().token_type {
            TokenType::Number(n) => {
                let n = *n;
                self.advance();
                return Ok(Expr::Literal(Literal::Number(n)));
            }
            TokenType::Str(s) => {
                let s = s.clone();
                self.advance();
                return Ok(Expr::Literal(Literal::Str(s)));
            }
            _ => {}
        }

        if self.match_any(&[TokenType::Super]) {
            let keyword = self.previous().clone();
            self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
            let method = self
                .consume(TokenType::Identifier, "Expect superclass method name.")?
                .clone();
            return Ok(Expr::Super {
                id: self.ids.next_id(),
                keyword,
                method,
            });
        }

        if self.match_any(&[TokenType::This]) {
            return Ok(Expr::This {
                id: self.ids.next_id(),
                keyword: self.previous().clone(),
            });
        }

        if self.match_any(&[TokenType::Identifier]) {
            return Ok(Expr::Variable {
                id: self.ids.next_id(),
                name: self.previous().clone(),
            });
        }

        if self.match_any(&[TokenType::LeftParen]) {
            let expr = self.expression()?;
            self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
            return Ok(Expr::Grouping(Box::new(expr)));
        }

        Err(Diagnostic::at_token(self.peek(), "Expect expression."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn parse(source: &str) -> (Vec<Stmt>, Vec<Diagnostic>) {
        let result = Scanner::new(source).scan_tokens();
        assert!(result.errors.is_empty(), "scan errors: {:?}", result.errors);
        let mut ids = NodeIds::new();
        Parser::new(result.tokens, &mut ids).parse()
    }

    fn parse_ok(source: &str) -> Vec<Stmt> {
        let (statements, errors) = parse(source);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        statements
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let statements = parse_ok("1 + 2 * 3;");
        let Stmt::Expression(Expr::Binary {
            left,
            operator,
            right,
        }) = &statements[0]
        else {
            panic!("expected binary expression statement");
        };
        assert_eq!(operator.token_type, TokenType::Plus);
        assert_eq!(**left, Expr::Literal(Literal::Number(1.0)));
        assert!(matches!(**right, Expr::Binary { .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let statements = parse_ok("a = b = 1;");
        let Stmt::Expression(Expr::Assign { value, .. }) = &statements[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(**value, Expr::Assign { .. }));
    }

    #[test]
    fn property_assignment_becomes_set() {
        let statements = parse_ok("a.b = 1;");
        assert!(matches!(
            &statements[0],
            Stmt::Expression(Expr::Set { .. })
        ));
    }

    #[test]
    fn invalid_assignment_target_is_reported_not_fatal() {
        let (statements, errors) = parse("1 = 2; print 3;");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at '=': Invalid assignment target."
        );
        // both statements still came through
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn for_loop_desugars_into_while() {
        let statements = parse_ok("for (var i = 0; i < 3; i = i + 1) print i;");
        let Stmt::Block(outer) = &statements[0] else {
            panic!("expected desugared block");
        };
        assert!(matches!(outer[0], Stmt::Var { .. }));
        let Stmt::While { body, .. } = &outer[1] else {
            panic!("expected while loop");
        };
        let Stmt::Block(inner) = &**body else {
            panic!("expected body block with increment");
        };
        assert!(matches!(inner[0], Stmt::Print(_)));
        assert!(matches!(inner[1], Stmt::Expression(Expr::Assign { .. })));
    }

    #[test]
    fn for_loop_without_condition_defaults_to_true() {
        let statements = parse_ok("for (;;) print 1;");
        let Stmt::While { condition, .. } = &statements[0] else {
            panic!("expected bare while loop");
        };
        assert_eq!(*condition, Expr::Literal(Literal::Bool(true)));
    }

    #[test]
    fn chained_calls_parse_as_nested_call_nodes() {
        let statements = parse_ok("f()();");
        let Stmt::Expression(Expr::Call { callee, .. }) = &statements[0] else {
            panic!("expected call");
        };
        assert!(matches!(**callee, Expr::Call { .. }));
    }

    #[test]
    fn class_with_superclass_and_methods() {
        let statements = parse_ok("class B < A { init(x) {} go() { return 1; } }");
        let Stmt::Class {
            superclass,
            methods,
            ..
        } = &statements[0]
        else {
            panic!("expected class declaration");
        };
        assert!(matches!(superclass, Some(Expr::Variable { .. })));
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].name.lexeme, "init");
        assert_eq!(methods[1].name.lexeme, "go");
    }

    #[test]
    fn error_recovery_is_bounded_to_one_diagnostic_per_defect() {
        let (statements, errors) = parse("var ;\nprint 1;");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at ';': Expect variable name."
        );
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Stmt::Print(_)));
    }

    #[test]
    fn missing_expression_at_end_reports_at_end() {
        let (_, errors) = parse("print");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().ends_with("at end: Expect expression."));
    }

    #[test]
    fn too_many_arguments_is_a_diagnostic_not_an_abort() {
        let args = vec!["0"; 256].join(", ");
        let (statements, errors) = parse(&format!("f({});", args));
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .message
            .contains("Can't have more than 255 arguments."));
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn super_requires_a_method_name() {
        let (_, errors) = parse("print super;");
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at ';': Expect '.' after 'super'."
        );
    }
}

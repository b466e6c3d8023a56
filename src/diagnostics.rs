use std::error::Error;
use std::fmt;

use crate::scanner::token::{Token, TokenType};

/// A fault reported by the scanner, parser, or resolver.
///
/// Rendered as `[line <n>] Error<location>: <message>`, where the location
/// part is empty for lexical faults, ` at end` for a fault at end of input,
/// and ` at '<lexeme>'` otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub line: usize,
    pub location: Location,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Location {
    Lexical,
    AtEnd,
    AtLexeme(String),
}

impl Diagnostic {
    pub fn lexical(line: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            location: Location::Lexical,
            message: message.into(),
        }
    }

    pub fn at_token(token: &Token, message: impl Into<String>) -> Self {
        let location = if token.token_type == TokenType::Eof {
            Location::AtEnd
        } else {
            Location::AtLexeme(token.lexeme.clone())
        };
        Diagnostic {
            line: token.line,
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            Location::Lexical => {}
            Location::AtEnd => write!(f, " at end")?,
            Location::AtLexeme(lexeme) => write!(f, " at '{}'", lexeme)?,
        }
        write!(f, ": {}", self.message)
    }
}

impl Error for Diagnostic {}

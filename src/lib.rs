//! Tree-walking interpreter for the Rill scripting language.
//!
//! Source text flows through [`scanner::Scanner`], [`parser::Parser`], and
//! [`resolver::Resolver`] before [`interpreter::Interpreter`] executes it;
//! see the interpreter docs for a complete driving example. Faults from the
//! first three stages are collected as [`diagnostics::Diagnostic`] values
//! and suppress execution; runtime faults abort the current run and are
//! reported by the caller.

pub mod diagnostics;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod scanner;

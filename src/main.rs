use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use rustyline::DefaultEditor;

use rill::diagnostics::Diagnostic;
use rill::interpreter::Interpreter;
use rill::parser::ast::NodeIds;
use rill::parser::Parser;
use rill::resolver::Resolver;
use rill::scanner::Scanner;

const EXIT_USAGE: i32 = 64;
const EXIT_STATIC_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;

#[derive(ClapParser)]
#[command(name = "rill")]
#[command(about = "The Rill programming language")]
struct Cli {
    /// Script file to run (omit for REPL)
    script: Option<String>,
}

enum RunStatus {
    Success,
    HadError,
    HadRuntimeError,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            // Extra or malformed arguments are a usage error
            eprintln!("Usage: rill [script]");
            std::process::exit(EXIT_USAGE);
        }
        Err(e) => {
            // --help / --version
            e.print()?;
            return Ok(());
        }
    };

    match cli.script {
        None => run_prompt()?,
        Some(path) => run_file(&path)?,
    }

    Ok(())
}

fn run_file(path: &str) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("cannot read script '{}'", path))?;

    let mut stdout = io::stdout();
    let mut interpreter = Interpreter::new(&mut stdout);
    let mut ids = NodeIds::new();

    match run(&source, &mut interpreter, &mut ids) {
        RunStatus::Success => Ok(()),
        RunStatus::HadError => std::process::exit(EXIT_STATIC_ERROR),
        RunStatus::HadRuntimeError => std::process::exit(EXIT_RUNTIME_ERROR),
    }
}

fn run_prompt() -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    let history_path = dirs::home_dir().map(|p| p.join(".rill_history"));
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    let mut stdout = io::stdout();
    let mut interpreter = Interpreter::new(&mut stdout);
    let mut ids = NodeIds::new();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "> " } else { "| " };

        match rl.readline(prompt) {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');

                if is_complete(&buffer) {
                    if !buffer.trim().is_empty() {
                        let _ = rl.add_history_entry(buffer.trim());
                        // Faults are printed and forgotten; the session
                        // and its definitions carry on
                        run(&buffer, &mut interpreter, &mut ids);
                    }
                    buffer.clear();
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                buffer.clear();
                println!("^C");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }

    Ok(())
}

/// One trip through the pipeline. Any scan/parse/resolve diagnostic is
/// printed and suppresses execution; a runtime fault is printed after
/// aborting the run. The interpreter and id counter outlive the call so
/// REPL submissions build on each other.
fn run<W: Write>(
    source: &str,
    interpreter: &mut Interpreter<'_, W>,
    ids: &mut NodeIds,
) -> RunStatus {
    let scan = Scanner::new(source).scan_tokens();
    let (statements, parse_errors) = Parser::new(scan.tokens, ids).parse();

    let mut static_errors: Vec<Diagnostic> = scan.errors;
    static_errors.extend(parse_errors);

    if static_errors.is_empty() {
        static_errors.extend(Resolver::new(interpreter).resolve(&statements));
    }

    if !static_errors.is_empty() {
        for error in &static_errors {
            eprintln!("{}", error);
        }
        return RunStatus::HadError;
    }

    match interpreter.interpret(&statements) {
        Ok(()) => RunStatus::Success,
        Err(e) => {
            eprintln!("{}", e);
            RunStatus::HadRuntimeError
        }
    }
}

// A submission is complete once parens, braces, and strings balance out.
// Strings stay open across newlines here because the language allows
// multi-line string literals.
fn is_complete(source: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            _ => {}
        }
    }

    depth <= 0 && !in_string
}
